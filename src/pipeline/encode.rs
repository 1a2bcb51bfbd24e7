//! Page image → base64 PNG `ImageData` for the vision OCR request.
//!
//! PNG over JPEG: compression artefacts around thin strokes turn `і` into
//! `i`, `°` into `o` and small exponents into noise, which is exactly what
//! the normalizer then has to undo. `detail: "high"` keeps the tile budget
//! large enough for indices and fraction bars.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page for the OCR model.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let png = png_bytes(img)?;
    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Lossless PNG bytes of `img`; also what gets kept under `pages/`.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, GrayImage};

    #[test]
    fn grayscale_scan_encodes_as_png() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(12, 8, Luma([200])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
