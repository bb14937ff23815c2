use anyhow::{anyhow, bail, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use creative_ledger::config;
use creative_ledger::db;
use creative_ledger::lease::Lease;
use creative_ledger::model::Status;
use creative_ledger::naming;
use creative_ledger::report::{StageReport, SyncReport};
use creative_ledger::runner::{FullRunOptions, Pipeline, Services};
use creative_ledger::stages::IdeateOptions;
use creative_ledger::sync::SyncOptions;

#[derive(Debug, Parser)]
#[command(author, version, about = "Ad creative pipeline: ideate, render, publish paused ads")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run without taking the local run lease
    #[arg(long)]
    no_lease: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate ideas for an app and append them as Ideated rows
    Ideate {
        #[arg(long)]
        app_name: Option<String>,
        #[arg(long)]
        n: Option<usize>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Render images for every Ideated row
    GenerateImages,
    /// Create paused campaigns, ad sets, creatives and ads for Uploaded rows
    #[command(alias = "sync")]
    CreateCampaigns {
        #[arg(long, default_value = "1")]
        n: usize,
        #[arg(long)]
        app_name: Option<String>,
        /// Daily budget of new ad sets, in minor currency units
        #[arg(long)]
        budget_minor: Option<u64>,
    },
    /// Ideate, render and synchronize for one app
    FullRun {
        #[arg(long)]
        app_name: String,
        #[arg(long, default_value = "5")]
        n: usize,
        #[arg(long)]
        budget_minor: Option<u64>,
    },
    /// Mark rows Tested or Rejected
    Review {
        #[arg(long = "id", required = true, num_args = 1..)]
        ids: Vec<i64>,
        #[arg(long)]
        status: String,
    },
}

fn summarize_stage(stage: &StageReport) -> Result<()> {
    info!(
        succeeded = stage.succeeded.len(),
        skipped = stage.skipped.len(),
        row_failures = stage.row_failures.len(),
        app_failures = stage.app_failures.len(),
        "stage summary"
    );
    if stage.has_app_failures() {
        bail!("{} app batch(es) failed", stage.app_failures.len());
    }
    Ok(())
}

fn summarize_sync(report: &SyncReport) -> Result<()> {
    info!(
        created = ?report.created,
        reused = ?report.reused,
        "objects synchronized"
    );
    summarize_stage(&report.stage)
}

async fn run(pipeline: &mut Pipeline, command: Command) -> Result<()> {
    let today = naming::campaign_date(Utc::now());
    match command {
        Command::Ideate {
            app_name,
            n,
            platform,
        } => {
            let rows = pipeline
                .ideate(&IdeateOptions {
                    app_name,
                    count: n,
                    platform,
                })
                .await?;
            info!(count = rows.len(), "ideation finished");
            Ok(())
        }
        Command::GenerateImages => summarize_stage(&pipeline.generate_images().await?),
        Command::CreateCampaigns {
            n,
            app_name,
            budget_minor,
        } => {
            let report = pipeline
                .create_campaigns(&SyncOptions {
                    limit: Some(n),
                    app_name,
                    budget_minor,
                    today,
                })
                .await?;
            summarize_sync(&report)
        }
        Command::FullRun {
            app_name,
            n,
            budget_minor,
        } => {
            let report = pipeline
                .full_run(
                    &FullRunOptions {
                        app_name,
                        count: Some(n),
                        budget_minor,
                    },
                    today,
                )
                .await?;
            info!(ideated = report.ideated.len(), "ideation finished");
            summarize_stage(&report.images)?;
            summarize_sync(&report.sync)
        }
        Command::Review { ids, status } => {
            let status = Status::parse_status(&status)
                .filter(|s| matches!(s, Status::Tested | Status::Rejected))
                .ok_or_else(|| anyhow!("review status must be tested or rejected, got {status:?}"))?;
            summarize_stage(&pipeline.review(&ids, status).await?)
        }
    }
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
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        format!("sqlite://{}/ledger.db", cfg.resolved_data_dir().display())
    });
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let services = Services::from_config(&cfg, &pool)?;
    let mut pipeline = Pipeline::new(&cfg, services)?;

    let lease = if args.no_lease {
        None
    } else {
        let ttl = Duration::seconds(cfg.app.lease_ttl_seconds as i64);
        Some(Lease::acquire(&pool, &pipeline.lease_name(), ttl).await?)
    };

    let result = match pipeline.prepare().await {
        Ok(action) => {
            info!(?action, ledger = %pipeline.ledger().describe(), "ledger ready");
            run(&mut pipeline, args.command).await
        }
        Err(err) => Err(err.into()),
    };

    if let Some(lease) = lease {
        if let Err(err) = lease.release().await {
            error!(%err, "failed to release run lease");
        }
    }
    result
}
