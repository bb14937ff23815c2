//! Wires collaborators together and runs stage commands against them.
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

use crate::catalog::AppCatalog;
use crate::config::{Backend, Config, TableRef};
use crate::db::Pool;
use crate::drive::{BlobStore, DriveClient};
use crate::error::PipelineError;
use crate::ledger::{Ledger, SchemaAction};
use crate::meta::{AdPlatform, MetaClient};
use crate::model::{LedgerRow, Status};
use crate::openai::{ImageGenerator, OpenAiClient, TextGenerator};
use crate::report::{StageReport, SyncReport};
use crate::retry::Backoff;
use crate::stages::{self, IdeateDefaults, IdeateOptions};
use crate::sync::{SyncOptions, SyncSettings, Synchronizer};
use crate::table::{SheetsTable, SqliteTable, TableBackend};

/// External collaborators of every stage.
#[derive(Clone)]
pub struct Services {
    pub ledger: Arc<dyn TableBackend>,
    pub apps: Arc<dyn TableBackend>,
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub blobs: Arc<dyn BlobStore>,
    pub platform: Arc<dyn AdPlatform>,
}

fn table(cfg: &Config, pool: &Pool, table: &TableRef) -> Result<Arc<dyn TableBackend>> {
    Ok(match cfg.store.backend {
        Backend::Sheets => Arc::new(SheetsTable::from_config(cfg, table)?),
        Backend::Sqlite => Arc::new(SqliteTable::new(pool.clone(), table)),
    })
}

/// Ledger and catalog backends selected by `store.backend`.
pub fn table_backends(
    cfg: &Config,
    pool: &Pool,
) -> Result<(Arc<dyn TableBackend>, Arc<dyn TableBackend>)> {
    Ok((
        table(cfg, pool, &cfg.store.ledger)?,
        table(cfg, pool, &cfg.store.apps)?,
    ))
}

impl Services {
    pub fn from_config(cfg: &Config, pool: &Pool) -> Result<Self> {
        let (ledger, apps) = table_backends(cfg, pool)?;
        let openai = Arc::new(OpenAiClient::from_config(cfg)?);
        Ok(Self {
            ledger,
            apps,
            text: openai.clone(),
            images: openai,
            blobs: Arc::new(DriveClient::from_config(cfg)?),
            platform: Arc::new(MetaClient::from_config(cfg)?),
        })
    }
}

/// Options of the full ideate → images → sync sequence.
#[derive(Debug, Clone)]
pub struct FullRunOptions {
    pub app_name: String,
    pub count: Option<usize>,
    pub budget_minor: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct FullRunReport {
    pub ideated: Vec<i64>,
    pub images: StageReport,
    pub sync: SyncReport,
}

/// One session over the ledger: its caches live as long as the pipeline.
pub struct Pipeline {
    services: Services,
    ledger: Ledger,
    catalog: AppCatalog,
    defaults: IdeateDefaults,
    sync_settings: SyncSettings,
}

impl Pipeline {
    pub fn new(cfg: &Config, services: Services) -> Result<Self> {
        let sync_settings = SyncSettings::from_config(cfg).context("invalid sync settings")?;
        Ok(Self {
            ledger: Ledger::new(services.ledger.clone()),
            catalog: AppCatalog::new(services.apps.clone()),
            services,
            defaults: IdeateDefaults {
                count: cfg.app.default_num_ideas,
                platform: cfg.app.default_platform.clone(),
                backoff: Backoff::from_config(&cfg.openai),
            },
            sync_settings,
        })
    }

    pub fn ledger(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// Lease name shared by every process working on this ledger.
    pub fn lease_name(&self) -> String {
        format!("ledger:{}", self.ledger.describe())
    }

    pub async fn prepare(&mut self) -> Result<SchemaAction, PipelineError> {
        self.ledger.ensure_schema().await
    }

    pub async fn ideate(&mut self, opts: &IdeateOptions) -> Result<Vec<LedgerRow>, PipelineError> {
        stages::ideate(
            &mut self.ledger,
            &mut self.catalog,
            self.services.text.as_ref(),
            &self.defaults,
            opts,
            Utc::now(),
        )
        .await
    }

    pub async fn generate_images(&mut self) -> Result<StageReport, PipelineError> {
        stages::generate_images(
            &mut self.ledger,
            self.services.images.as_ref(),
            self.services.blobs.as_ref(),
            &self.defaults.backoff,
        )
        .await
    }

    pub async fn create_campaigns(&mut self, opts: &SyncOptions) -> Result<SyncReport, PipelineError> {
        let mut sync = Synchronizer {
            ledger: &mut self.ledger,
            catalog: &mut self.catalog,
            platform: self.services.platform.as_ref(),
            blobs: self.services.blobs.as_ref(),
            settings: &self.sync_settings,
        };
        sync.run(opts).await
    }

    pub async fn review(&mut self, ids: &[i64], status: Status) -> Result<StageReport, PipelineError> {
        stages::review(&mut self.ledger, ids, status).await
    }

    /// Ideate, render and synchronize for one app. Synchronization covers at
    /// most as many rows as were ideated.
    pub async fn full_run(
        &mut self,
        opts: &FullRunOptions,
        today: NaiveDate,
    ) -> Result<FullRunReport, PipelineError> {
        let rows = self
            .ideate(&IdeateOptions {
                app_name: Some(opts.app_name.clone()),
                count: opts.count,
                platform: None,
            })
            .await?;
        let images = self.generate_images().await?;
        let sync = self
            .create_campaigns(&SyncOptions {
                limit: Some(rows.len()),
                app_name: Some(opts.app_name.clone()),
                budget_minor: opts.budget_minor,
                today,
            })
            .await?;
        info!(app = %opts.app_name, ideated = rows.len(), "full run finished");
        Ok(FullRunReport {
            ideated: rows.iter().map(|r| r.id).collect(),
            images,
            sync,
        })
    }
}
