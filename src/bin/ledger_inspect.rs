use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

use creative_ledger::config;
use creative_ledger::db;
use creative_ledger::ledger::{Column, Ledger, RowFilter};
use creative_ledger::runner;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print the ledger header, row counts per status and rows the pipeline skips"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        format!("sqlite://{}/ledger.db", cfg.resolved_data_dir().display())
    });
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let (backend, _) = runner::table_backends(&cfg, &pool)?;
    let mut ledger = Ledger::new(backend);

    println!("ledger: {}", ledger.describe());
    let header = ledger.header().await?;
    println!("header: {}", header.join(" | "));
    let missing: Vec<&str> = Column::ALL
        .iter()
        .map(|c| c.header())
        .filter(|name| !header.iter().any(|h| h.trim().eq_ignore_ascii_case(name)))
        .collect();
    if !missing.is_empty() {
        println!("missing columns: {}", missing.join(", "));
    }

    let rows = ledger.list_rows(&RowFilter::default()).await?;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut pending = 0;
    for row in &rows {
        *counts.entry(row.status.as_str()).or_default() += 1;
        if RowFilter::sync_pending(None).matches(row) {
            pending += 1;
        }
    }
    println!("rows: {}", rows.len());
    for (status, count) in counts {
        println!("  {status:<10} {count}");
    }
    println!("awaiting synchronization: {pending}");

    let invalid = ledger.invalid_rows().await?;
    if invalid.is_empty() {
        println!("invalid rows: none");
    } else {
        println!("invalid rows: {}", invalid.len());
        for bad in invalid {
            let id = bad.id.map_or_else(|| "-".to_string(), |id| id.to_string());
            println!("  row {:>5}  id {:>5}  {}", bad.row_number, id, bad.reason);
        }
    }
    Ok(())
}
