mod common;

use std::sync::Arc;

use common::*;
use creative_ledger::config;
use creative_ledger::ledger::RowFilter;
use creative_ledger::model::Status;
use creative_ledger::runner::{FullRunOptions, Pipeline, Services};
use creative_ledger::table::SqliteTable;

#[tokio::test]
async fn full_run_takes_new_ideas_all_the_way_to_paused_ads() {
    let pool = setup_pool().await;
    let platform = FakePlatform::default();
    let blobs = FakeBlobs::default();
    let services = Services {
        ledger: Arc::new(SqliteTable::named(pool.clone(), "ledger")),
        apps: seeded_catalog(&pool).await,
        text: Arc::new(ScriptedText::with_responses(vec![Ok(vec![
            concept("Curiosity"),
            concept("Urgency"),
        ])])),
        images: Arc::new(FakeImages::default()),
        blobs: Arc::new(blobs.clone()),
        platform: Arc::new(platform.clone()),
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, config::example()).unwrap();
    let cfg = config::load(Some(&path)).unwrap();

    let mut pipeline = Pipeline::new(&cfg, services).unwrap();
    pipeline.prepare().await.unwrap();
    let opts = FullRunOptions {
        app_name: "FocusTimer".into(),
        count: Some(2),
        budget_minor: None,
    };
    let report = pipeline.full_run(&opts, today()).await.unwrap();

    assert_eq!(report.ideated, vec![1, 2]);
    assert_eq!(report.images.succeeded, vec![1, 2]);
    assert_eq!(report.sync.stage.succeeded, vec![1, 2]);
    assert_eq!(platform.count(Kind::Campaign).await, 1);
    assert_eq!(platform.count(Kind::AdSet).await, 1);
    assert_eq!(platform.count(Kind::Ad).await, 2);

    let rows = pipeline
        .ledger()
        .list_rows(&RowFilter::status(Status::Uploaded))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.refs.ad().is_some()));

    let report = pipeline.review(&[1], Status::Tested).await.unwrap();
    assert_eq!(report.succeeded, vec![1]);
    assert!(pipeline.lease_name().starts_with("ledger:sqlite:"));
}
