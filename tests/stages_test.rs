mod common;

use anyhow::anyhow;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use creative_ledger::catalog::AppCatalog;
use creative_ledger::error::{ErrorScope, PipelineError};
use creative_ledger::ledger::{Ledger, RowFilter};
use creative_ledger::model::Status;
use creative_ledger::retry::Backoff;
use creative_ledger::stages::{self, IdeateDefaults, IdeateOptions};
use creative_ledger::table::SqliteTable;

fn quick_backoff() -> Backoff {
    Backoff {
        attempts: 3,
        min: Duration::from_millis(1),
        max: Duration::from_millis(2),
    }
}

fn defaults() -> IdeateDefaults {
    IdeateDefaults {
        count: 5,
        platform: "Meta".into(),
        backoff: quick_backoff(),
    }
}

fn for_app(app: &str, count: usize) -> IdeateOptions {
    IdeateOptions {
        app_name: Some(app.into()),
        count: Some(count),
        platform: None,
    }
}

async fn fixtures() -> (Ledger, AppCatalog, CountingTable) {
    let pool = setup_pool().await;
    let catalog = AppCatalog::new(seeded_catalog(&pool).await);
    let table = CountingTable::new(Arc::new(SqliteTable::named(pool, "ledger")));
    let mut ledger = Ledger::new(Arc::new(table.clone()));
    ledger.ensure_schema().await.unwrap();
    (ledger, catalog, table)
}

#[tokio::test]
async fn ideation_appends_consecutive_ideated_rows_in_one_call() {
    let (mut ledger, mut catalog, table) = fixtures().await;
    let text = ScriptedText::with_responses(vec![
        Ok(vec![concept("Curiosity")]),
        Ok(vec![concept("Urgency"), concept("Social proof"), concept("Humor")]),
    ]);
    stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 1), Utc::now())
        .await
        .unwrap();
    table.reset();

    let rows = stages::ideate(
        &mut ledger,
        &mut catalog,
        &text,
        &defaults(),
        &for_app("focustimer", 3),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(table.count("append_rows"), 1);
    assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3, 4]);
    assert!(rows.iter().all(|r| r.status == Status::Ideated));
    assert!(rows.iter().all(|r| r.app_name == "FocusTimer" && r.platform == "Meta"));
    let hooks: HashSet<_> = rows.iter().map(|r| r.hook.clone()).collect();
    assert_eq!(hooks.len(), 3);

    let stored = ledger.list_rows(&RowFilter::status(Status::Ideated)).await.unwrap();
    assert_eq!(stored.len(), 4);
    let calls = text.calls.lock().await.clone();
    assert_eq!(calls[1], ("FocusTimer".to_string(), 3, "Meta".to_string()));
}

#[tokio::test]
async fn ideation_truncates_surplus_and_keeps_a_shortfall() {
    let (mut ledger, mut catalog, _) = fixtures().await;
    let text = ScriptedText::with_responses(vec![
        Ok(vec![concept("A"), concept("B"), concept("C")]),
        Ok(vec![concept("D")]),
    ]);
    let rows = stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 2), Utc::now())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let rows = stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 4), Utc::now())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, 3);
}

#[tokio::test]
async fn ideation_defaults_to_first_app_and_configured_count() {
    let (mut ledger, mut catalog, _) = fixtures().await;
    let text = ScriptedText::with_responses(vec![Ok(vec![concept("A")])]);
    stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &IdeateOptions::default(), Utc::now())
        .await
        .unwrap();
    let calls = text.calls.lock().await.clone();
    assert_eq!(calls, vec![("FocusTimer".to_string(), 5, "Meta".to_string())]);
}

#[tokio::test]
async fn transient_generator_failure_is_retried() {
    let (mut ledger, mut catalog, table) = fixtures().await;
    let text = ScriptedText::with_responses(vec![
        Err(anyhow!("received 429 from OpenAI")),
        Ok(vec![concept("Curiosity"), concept("Urgency")]),
    ]);
    let rows = stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 2), Utc::now())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(text.calls.lock().await.len(), 2);
    assert_eq!(table.count("append_rows"), 1);
}

#[tokio::test]
async fn ideation_failures_write_nothing() {
    let (mut ledger, mut catalog, table) = fixtures().await;
    let text = ScriptedText::with_responses(vec![Ok(Vec::new()), Err(anyhow!("model timeout"))]);

    let err = stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 3), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ContentGeneration(_)));
    let err = stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 3), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ContentGeneration(_)));

    let err = stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("NoSuchApp", 3), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownApp(ref name) if name == "NoSuchApp"));
    assert_eq!(err.scope(), ErrorScope::App);
    assert_eq!(table.count("append_rows"), 0);
}

#[tokio::test]
async fn image_stage_promotes_rendered_rows_and_leaves_failures() {
    let (mut ledger, mut catalog, table) = fixtures().await;
    let mut broken = concept("Broken");
    broken.image_prompt = "please fail here".into();
    let mut empty = concept("Empty");
    empty.image_prompt = "  ".into();
    let text = ScriptedText::with_responses(vec![Ok(vec![
        concept("Curiosity"),
        concept("Urgency"),
        broken,
        empty,
    ])]);
    stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 4), Utc::now())
        .await
        .unwrap();
    table.reset();

    let images = FakeImages::default();
    let blobs = FakeBlobs::default();
    let report = stages::generate_images(&mut ledger, &images, &blobs, &quick_backoff()).await.unwrap();
    assert_eq!(report.succeeded, vec![1, 2]);
    assert_eq!(report.row_failures.len(), 1);
    assert_eq!(report.row_failures[0].row_id, 3);
    assert_eq!(report.skipped, vec![(4, "empty image prompt".to_string())]);
    let broken_attempts = images
        .prompts
        .lock()
        .await
        .iter()
        .filter(|p| p.contains("fail"))
        .count();
    assert_eq!(broken_attempts, 3);
    // asset URL and status go out together
    assert_eq!(table.count("batch_update"), 2);

    ledger.invalidate();
    let uploaded = ledger.list_rows(&RowFilter::status(Status::Uploaded)).await.unwrap();
    assert_eq!(uploaded.len(), 2);
    assert!(uploaded.iter().all(|r| !r.asset_url.is_empty()));
    let still_ideated = ledger.get_row(3).await.unwrap();
    assert_eq!(still_ideated.status, Status::Ideated);
    assert!(still_ideated.asset_url.is_empty());
    assert_eq!(
        blobs.stored_names().await,
        vec!["Image_1_Curiosity.png".to_string(), "Image_2_Urgency.png".to_string()]
    );

    // a second pass only retries what is still Ideated
    let report = stages::generate_images(&mut ledger, &images, &blobs, &quick_backoff()).await.unwrap();
    assert!(report.succeeded.is_empty());
    assert_eq!(report.row_failures.len(), 1);
    assert_eq!(ledger.get_row(1).await.unwrap().status, Status::Uploaded);
}

#[tokio::test]
async fn review_batches_status_changes_and_skips_what_it_may_not_touch() {
    let (mut ledger, mut catalog, table) = fixtures().await;
    let text = ScriptedText::with_responses(vec![Ok(vec![concept("A"), concept("B"), concept("C")])]);
    stages::ideate(&mut ledger, &mut catalog, &text, &defaults(), &for_app("FocusTimer", 3), Utc::now())
        .await
        .unwrap();
    let images = FakeImages::default();
    let blobs = FakeBlobs::default();
    stages::generate_images(&mut ledger, &images, &blobs, &quick_backoff()).await.unwrap();
    stages::review(&mut ledger, &[3], Status::Rejected).await.unwrap();
    table.reset();

    let report = stages::review(&mut ledger, &[1, 2, 3, 99, 1], Status::Tested).await.unwrap();
    assert_eq!(report.succeeded, vec![1, 2]);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(table.count("batch_update"), 1);

    ledger.invalidate();
    assert_eq!(ledger.get_row(1).await.unwrap().status, Status::Tested);
    assert_eq!(ledger.get_row(3).await.unwrap().status, Status::Rejected);
}
