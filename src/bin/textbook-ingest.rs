//! CLI binary for textbook-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, opens the store and prints results.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use textbook_ingest::{
    document_map, format_answer_message, normalize_page, search, CancelFlag, IngestMode,
    IngestProgressCallback, Ingestor, NewBook, Outcome, PipelineConfig, ProgressCallback,
    SearchFilter, Stage, Store,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// One bar, re-labelled and re-sized at every stage start.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, units: usize) {
        let unit = match stage {
            Stage::Correct | Stage::Distribute => "batches",
            _ => "pages",
        };
        let template = if units == 0 {
            "{spinner:.cyan} {prefix:.bold}  {msg}".to_string()
        } else {
            format!(
                "{{spinner:.cyan}} {{prefix:.bold}}  \
                 [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
                 ⏱ {{elapsed_precise}}  ETA {{eta_precise}}"
            )
        };
        self.bar.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
        );
        self.bar.set_length(units as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(stage.label());
        self.bar.reset_eta();
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _stage: Stage, batch: usize, _total: usize) {
        self.bar.set_position(batch as u64);
    }

    fn on_run_complete(&self, problems: usize, cancelled: bool) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if cancelled {
            eprintln!("{} cancelled, nothing committed", cyan("⚠"));
        } else if failed == 0 {
            eprintln!("{} {} problems stored", green("✔"), bold(&problems.to_string()));
        } else {
            eprintln!(
                "{} {} problems stored  ({} pages failed)",
                cyan("⚠"),
                bold(&problems.to_string()),
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Register a PDF for a book
  textbook-ingest add-source --subject geometry --grade 7 --title "Геометрия 7–9" geometry.pdf

  # OCR, normalize and segment it
  textbook-ingest ingest 1

  # Re-import after editing the normalized artefact by hand
  textbook-ingest ingest 1 --mode from_normalized

  # LLM correction and distribution (resumes from its checkpoint)
  textbook-ingest ingest 1 --mode from_normalized_llm

  # Ask a question
  textbook-ingest search "смежные углы, один на 80 градусов больше другого"

  # Inspect structure and cleanup
  textbook-ingest map 1
  textbook-ingest normalize page.txt

MODES:
  full                 render → OCR → normalize → segment
  from_normalized      normalized artefact → segment
  reanalyze            stored page text → segment
  llm_correct_only     normalized artefact → LLM correction → segment
  from_normalized_llm  normalized artefact → LLM correction → LLM distribution

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, e.g. textbook_ingest=debug
"#;

/// Ingest scanned textbooks and search their problems.
#[derive(Parser, Debug)]
#[command(
    name = "textbook-ingest",
    version,
    about = "Ingest scanned textbook PDFs into a searchable base of theory, problems and answers",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, env = "TEXTBOOK_DB", default_value = "data/textbooks.db")]
    db: PathBuf,

    /// Root directory for OCR text, checkpoints, maps and audit files.
    #[arg(long, global = true, env = "TEXTBOOK_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "TEXTBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a PDF, creating its book on first use.
    AddSource {
        pdf: PathBuf,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        grade: i32,
        #[arg(long)]
        title: String,
        #[arg(long)]
        authors: Option<String>,
        /// Volume of a multi-part book, e.g. "1".
        #[arg(long)]
        part: Option<String>,
        /// The PDF is an answer key / solutions book.
        #[arg(long)]
        solutions_book: bool,
    },

    /// Run one ingestion mode for a source. Ctrl-C cancels between batches.
    Ingest {
        source_id: i64,
        #[arg(long, value_enum, default_value = "full")]
        mode: ModeArg,
        /// Pages per LLM correction call.
        #[arg(long, env = "TEXTBOOK_CORRECTION_BATCH", default_value_t = 10)]
        correction_batch: usize,
        /// Skip LLM correction for pages scoring above this (0–100); 101 sends every page.
        #[arg(long, env = "TEXTBOOK_QUALITY_GATE", default_value_t = 95,
              value_parser = clap::value_parser!(u8).range(0..=101))]
        quality_gate: u8,
        /// Keep rendered page PNGs under the data directory.
        #[arg(long)]
        keep_images: bool,
        /// PDF user password for encrypted documents.
        #[arg(long, env = "TEXTBOOK_PDF_PASSWORD")]
        password: Option<String>,
        /// Disable progress bar.
        #[arg(long)]
        no_progress: bool,
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search stored problems.
    Search {
        query: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        grade: Option<i32>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Print every hit as JSON instead of the answer message.
        #[arg(long)]
        json: bool,
    },

    /// Print the document map of a source's stored pages as JSON.
    Map { source_id: i64 },

    /// Normalize OCR text from a file (or stdin with "-") and print it.
    Normalize {
        input: PathBuf,
        /// Print only the quality score.
        #[arg(long)]
        score_only: bool,
    },

    /// List sources and their processing status.
    Status {
        #[arg(long)]
        book: Option<i64>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "snake_case")]
enum ModeArg {
    Full,
    FromNormalized,
    Reanalyze,
    LlmCorrectOnly,
    FromNormalizedLlm,
}

impl From<ModeArg> for IngestMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Full => IngestMode::Full,
            ModeArg::FromNormalized => IngestMode::FromNormalized,
            ModeArg::Reanalyze => IngestMode::Reanalyze,
            ModeArg::LlmCorrectOnly => IngestMode::LlmCorrectOnly,
            ModeArg::FromNormalizedLlm => IngestMode::FromNormalizedLlm,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during ingestion.
    let bar_active = matches!(
        cli.command,
        Command::Ingest { no_progress: false, json: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || bar_active {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Normalize { input, score_only } => normalize_cmd(input, *score_only),
        Command::AddSource {
            pdf,
            subject,
            grade,
            title,
            authors,
            part,
            solutions_book,
        } => {
            if !pdf.exists() {
                bail!("PDF not found: {}", pdf.display());
            }
            let store = open_store(&cli)?;
            let book = store.find_or_create_book(&NewBook {
                subject: subject.clone(),
                grade: *grade,
                title: title.clone(),
                authors: authors.clone(),
                part: part.clone(),
                is_solutions_book: *solutions_book,
            })?;
            let source = store.add_source(book.id, pdf)?;
            println!("book {}  source {}", book.id, source.id);
            Ok(())
        }
        Command::Ingest { .. } => ingest_cmd(&cli, open_store(&cli)?, bar_active).await,
        Command::Search {
            query,
            subject,
            grade,
            limit,
            json,
        } => {
            let config = base_config(&cli).search_limit(*limit).build()?;
            let filter = SearchFilter {
                subject: subject.clone(),
                grade: *grade,
            };
            let store = open_store(&cli)?;
            let response = search(&store, &config, query, &filter)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", format_answer_message(&response));
                if !cli.quiet && !response.is_confident(config.confidence_threshold) {
                    eprintln!("{}", dim("(low confidence)"));
                }
            }
            Ok(())
        }
        Command::Map { source_id } => {
            let store = open_store(&cli)?;
            let pages = store.load_pages(*source_id)?;
            let texts: Vec<(usize, &str)> = pages
                .iter()
                .map(|p| (p.display_num(), p.normalized_text.as_str()))
                .collect();
            let map = document_map::build(&texts);
            println!("{}", serde_json::to_string_pretty(&map)?);
            Ok(())
        }
        Command::Status { book } => {
            let store = open_store(&cli)?;
            for source in store.list_sources(*book)? {
                let status = match source.status.as_str() {
                    "done" => green("done"),
                    "failed" => red("failed"),
                    other => cyan(other),
                };
                println!(
                    "{:>4}  book {:<4} {:<10} {:>5} pages  {}",
                    source.id,
                    source.book_id,
                    status,
                    source.page_count.map_or("?".to_string(), |n| n.to_string()),
                    source.pdf_path.display()
                );
                if let Some(msg) = &source.error_message {
                    println!("      {}", dim(msg));
                }
            }
            Ok(())
        }
    }
}

fn open_store(cli: &Cli) -> Result<Arc<Store>> {
    let store = Store::open(&cli.db)
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;
    Ok(Arc::new(store))
}

fn base_config(cli: &Cli) -> textbook_ingest::PipelineConfigBuilder {
    let mut builder = PipelineConfig::builder().data_dir(&cli.data_dir);
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider);
    }
    builder
}

async fn ingest_cmd(cli: &Cli, store: Arc<Store>, bar_active: bool) -> Result<()> {
    let Command::Ingest {
        source_id,
        mode,
        correction_batch,
        quality_gate,
        keep_images,
        password,
        json,
        ..
    } = &cli.command
    else {
        bail!("not an ingest command");
    };

    let mut builder = base_config(cli)
        .correction_batch_size(*correction_batch)
        .quality_gate((*quality_gate <= 100).then_some(*quality_gate))
        .keep_page_images(*keep_images);
    if let Some(pwd) = password {
        builder = builder.password(pwd);
    }
    if bar_active {
        builder = builder.progress_callback(CliProgressCallback::new() as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;

    let cancel = CancelFlag::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", cyan("Cancelling after the current batch…"));
            on_ctrl_c.cancel();
        }
    });

    let ingestor = Ingestor::new(store, config);
    let outcome = ingestor
        .run(*source_id, (*mode).into(), &cancel)
        .await
        .with_context(|| format!("Ingestion of source {source_id} failed"))?;
    let cancelled = outcome.is_cancelled();
    let report = match outcome {
        Outcome::Completed(r) | Outcome::Cancelled(r) => r,
    };

    if *json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        eprintln!(
            "{}  {} pages  {} problems ({} parts)  {} theory sections  {}ms",
            if cancelled { cyan("⚠") } else { green("✔") },
            report.pages,
            report.problems,
            report.parts,
            report.theory_sections,
            report.duration_ms
        );
        eprintln!(
            "   answers: {} linked, {} not found, {} kept  —  {} LLM calls, {} batches failed",
            report.answers_linked,
            report.answers_not_found,
            report.answers_skipped_existing,
            report.correction_calls + report.distribution_calls,
            report.batches_failed
        );
        for e in &report.errors {
            eprintln!("   {} {}", red("✗"), e);
        }
    }
    Ok(())
}

fn normalize_cmd(input: &PathBuf, score_only: bool) -> Result<()> {
    let raw = if input.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };
    let normalized = normalize_page(&raw, &Default::default());
    if score_only {
        println!("{}", normalized.quality);
    } else {
        println!("{}", normalized.text);
        eprintln!("{}", dim(&format!("quality: {}", normalized.quality)));
    }
    Ok(())
}
