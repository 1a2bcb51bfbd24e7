//! Search and answer delivery over a freshly ingested source.

mod common;

use common::Fixture;
use textbook_ingest::{
    format_answer_message, search, IngestMode, LogNotifier, NeverCancel, Notifier, ParsedAnswer,
    PipelineConfig, SearchFilter,
};

const PAGE: &str = "§4. Смежные углы\n\
4. Найдите смежные углы, если:\n\
1) один из них на 80° больше другого;\n\
2) их разность равна 40°.\n\
5. Найдите угол, вертикальный углу в 40°.";

async fn ingested() -> Fixture {
    let fx = Fixture::new();
    fx.write_normalized(&[PAGE]);
    fx.ingestor(fx.config().build().unwrap())
        .run(fx.source.id, IngestMode::FromNormalized, &NeverCancel)
        .await
        .unwrap();
    let linked = fx
        .store
        .link_answers(
            fx.book.id,
            &[ParsedAnswer {
                number: "4".into(),
                answer_text: "1) 130° и 50°; 2) 110° и 70°".into(),
                section: None,
            }],
        )
        .unwrap();
    assert_eq!(linked.updated, 1);
    fx
}

#[tokio::test]
async fn implicit_phrase_selects_first_part() {
    let fx = ingested().await;
    let config = PipelineConfig::default();

    let response = search(
        &fx.store,
        &config,
        "смежные углы, один на 80 градусов больше другого",
        &SearchFilter::default(),
    )
    .unwrap();

    assert_eq!(response.requested_part.as_deref(), Some("1"));
    assert_eq!(
        format_answer_message(&response),
        "📚 Геометрия 7–9, №4\n\n✅ Ответ на вариант 1): 130° и 50°"
    );
}

#[tokio::test]
async fn explicit_variant_selects_second_part() {
    let fx = ingested().await;

    let response = search(
        &fx.store,
        &PipelineConfig::default(),
        "смежные углы 2 вариант",
        &SearchFilter::default(),
    )
    .unwrap();

    assert_eq!(response.requested_part.as_deref(), Some("2"));
    let best = response.best().unwrap();
    assert_eq!(best.problem.number.as_deref(), Some("4"));
    assert_eq!(best.part_answer.as_deref(), Some("110° и 70°"));
}

#[tokio::test]
async fn without_a_part_every_part_answer_is_listed() {
    let fx = ingested().await;

    let response = search(
        &fx.store,
        &PipelineConfig::default(),
        "найдите смежные углы",
        &SearchFilter::default(),
    )
    .unwrap();

    let message = format_answer_message(&response);
    assert!(
        message.starts_with("📚 Геометрия 7–9, №4\n\n✅ Ответы:\n1) 130° и 50°; 2) 110° и 70°"),
        "got: {message}"
    );
    LogNotifier.send("chat-42", &message).await.unwrap();
}

#[tokio::test]
async fn stored_answers_are_never_overwritten() {
    let fx = ingested().await;

    let report = fx
        .store
        .link_answers(
            fx.book.id,
            &[
                ParsedAnswer {
                    number: "4".into(),
                    answer_text: "другой ответ".into(),
                    section: None,
                },
                ParsedAnswer {
                    number: "99".into(),
                    answer_text: "7".into(),
                    section: None,
                },
            ],
        )
        .unwrap();

    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(report.not_found, 1);
    let problems = fx.store.problems_for_source(fx.source.id).unwrap();
    let four = problems
        .iter()
        .find(|p| p.number.as_deref() == Some("4"))
        .unwrap();
    assert_eq!(four.answer_text.as_deref(), Some("1) 130° и 50°; 2) 110° и 70°"));
}

#[tokio::test]
async fn word_stem_still_finds_the_problem() {
    let fx = ingested().await;

    let response = search(
        &fx.store,
        &PipelineConfig::default(),
        "вертикальн",
        &SearchFilter::default(),
    )
    .unwrap();

    let best = response.best().expect("substring match");
    assert_eq!(best.problem.number.as_deref(), Some("5"));
}

#[tokio::test]
async fn filters_and_misses() {
    let fx = ingested().await;
    let config = PipelineConfig::default();

    let other_subject = SearchFilter {
        subject: Some("algebra".into()),
        grade: None,
    };
    assert!(search(&fx.store, &config, "смежные углы", &other_subject)
        .unwrap()
        .hits
        .is_empty());

    let miss = search(&fx.store, &config, "интеграл Римана", &SearchFilter::default()).unwrap();
    assert!(miss.hits.is_empty());
    assert!(format_answer_message(&miss).starts_with("❌ Задача не найдена"));
}
