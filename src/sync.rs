//! Idempotent synchronization of Uploaded ledger rows into paused ad objects.
//!
//! For each app the synchronizer resolves one campaign and one ad set, then a
//! creative and an ad per row. Every remote id is written back to the ledger
//! as soon as the call that produced it returns, so the ledger is the
//! checkpoint a later run resumes from. An object is only created after both
//! the cached id and an exact-name lookup come up empty. Lookups ignore
//! retired objects, so clearing the ad id of a rejected ad yields a new ad.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use crate::catalog::AppCatalog;
use crate::config::{CampaignSettings, Campaigns, Config, ConfigError, Targeting};
use crate::drive::BlobStore;
use crate::error::{ErrorScope, ObjectRole, PipelineError};
use crate::ledger::{ref_fields, Ledger, RowFilter};
use crate::meta::{
    AdAccount, AdParams, AdPlatform, AdSetParams, CampaignParams, CreativeParams, Lookup,
};
use crate::model::LedgerRow;
use crate::naming::{self, AspectRatio};
use crate::report::SyncReport;

/// Configuration the synchronizer needs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub campaigns: Campaigns,
    pub targeting: Targeting,
    pub creative_message: String,
    pub aspect: AspectRatio,
}

impl SyncSettings {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let aspect = cfg
            .openai
            .image_size
            .parse()
            .map_err(|_| ConfigError::Invalid("openai.image_size must look like 1024x1536"))?;
        Ok(Self {
            campaigns: cfg.campaigns.clone(),
            targeting: cfg.targeting.clone(),
            creative_message: cfg.meta.creative_message.clone(),
            aspect,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of rows to attach ads for in this pass.
    pub limit: Option<usize>,
    pub app_name: Option<String>,
    /// Overrides the configured daily budget of newly created ad sets.
    pub budget_minor: Option<u64>,
    /// Date stamped into campaign names.
    pub today: NaiveDate,
}

pub struct Synchronizer<'a> {
    pub ledger: &'a mut Ledger,
    pub catalog: &'a mut AppCatalog,
    pub platform: &'a dyn AdPlatform,
    pub blobs: &'a dyn BlobStore,
    pub settings: &'a SyncSettings,
}

/// Rows grouped by app, keyed case-insensitively, in a stable order.
fn group_by_app(rows: Vec<LedgerRow>) -> BTreeMap<String, (String, Vec<LedgerRow>)> {
    let mut groups: BTreeMap<String, (String, Vec<LedgerRow>)> = BTreeMap::new();
    for row in rows {
        let key = row.app_name.trim().to_lowercase();
        groups
            .entry(key)
            .or_insert_with(|| (row.app_name.trim().to_string(), Vec::new()))
            .1
            .push(row);
    }
    groups
}

/// The single cached id for `role` across `rows`, if any.
fn cached_parent(
    app: &str,
    role: ObjectRole,
    rows: &[LedgerRow],
) -> Result<Option<String>, PipelineError> {
    let ids: BTreeSet<&str> = rows
        .iter()
        .filter_map(|r| match role {
            ObjectRole::Campaign => r.refs.campaign(),
            ObjectRole::AdSet => r.refs.ad_set(),
            _ => None,
        })
        .collect();
    match ids.len() {
        0 => Ok(None),
        1 => Ok(ids.into_iter().next().map(str::to_string)),
        _ => Err(PipelineError::ConflictingParents {
            app: app.to_string(),
            role,
            ids: ids.into_iter().map(str::to_string).collect(),
        }),
    }
}

impl<'a> Synchronizer<'a> {
    #[instrument(skip_all)]
    pub async fn run(&mut self, opts: &SyncOptions) -> Result<SyncReport, PipelineError> {
        let mut rows = self
            .ledger
            .list_rows(&RowFilter::sync_pending(opts.app_name.as_deref()))
            .await?;
        rows.sort_by_key(|r| r.id);
        if let Some(limit) = opts.limit {
            rows.truncate(limit);
        }
        let mut report = SyncReport::default();
        if rows.is_empty() {
            info!("no rows waiting for synchronization");
            return Ok(report);
        }

        for (_, (app, group)) in group_by_app(rows) {
            let count = group.len();
            match self.sync_app(&app, group, opts, &mut report).await {
                Ok(()) => info!(app = %app, rows = count, "app synchronized"),
                Err(err) if err.scope() == ErrorScope::Pass => return Err(err),
                Err(err) => report.stage.app_failed(&app, &err),
            }
        }
        info!(
            created = report.created.total(),
            reused = report.reused.total(),
            succeeded = report.stage.succeeded.len(),
            failed = report.stage.row_failures.len(),
            "synchronization pass finished"
        );
        Ok(report)
    }

    async fn account_for(
        &mut self,
        app: &str,
        settings: &CampaignSettings,
    ) -> Result<AdAccount, PipelineError> {
        let store_url = match &settings.store_url {
            Some(url) => url.clone(),
            None => self
                .catalog
                .find(app)
                .await?
                .map(|p| p.android_url)
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| PipelineError::MissingCampaignSettings(app.to_string()))?,
        };
        Ok(AdAccount {
            ad_account_id: settings.ad_account_id.clone(),
            page_id: settings.page_id.clone(),
            application_id: settings.application_id.clone(),
            store_url,
            instagram_id: settings.instagram_id.clone(),
        })
    }

    async fn sync_app(
        &mut self,
        app: &str,
        mut rows: Vec<LedgerRow>,
        opts: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), PipelineError> {
        let settings = self
            .settings
            .campaigns
            .settings_for(app)
            .ok_or_else(|| PipelineError::MissingCampaignSettings(app.to_string()))?;
        let account = self.account_for(app, &settings).await?;
        let campaign_name =
            naming::campaign_name(&settings.intent(), settings.run_counter, opts.today);
        let ad_set_name = naming::ad_set_name(&campaign_name);

        let campaign_id = match cached_parent(app, ObjectRole::Campaign, &rows)? {
            Some(id) => {
                report.reused.add(ObjectRole::Campaign);
                id
            }
            None => {
                let found = self
                    .lookup(&account, ObjectRole::Campaign, Lookup::Campaigns, &campaign_name)
                    .await?;
                match found {
                    Some(id) => {
                        report.reused.add(ObjectRole::Campaign);
                        id
                    }
                    None => {
                        let params = CampaignParams {
                            name: campaign_name.clone(),
                        };
                        let id = self
                            .platform
                            .create_campaign(&account, &params)
                            .await
                            .map_err(|e| PipelineError::external(ObjectRole::Campaign, e))?;
                        report.created.add(ObjectRole::Campaign);
                        id
                    }
                }
            }
        };
        self.persist_parent(&mut rows, ObjectRole::Campaign, &campaign_id)
            .await?;

        let ad_set_id = match cached_parent(app, ObjectRole::AdSet, &rows)? {
            Some(id) => {
                report.reused.add(ObjectRole::AdSet);
                id
            }
            None => {
                let lookup = Lookup::AdSets {
                    campaign_id: campaign_id.clone(),
                };
                match self
                    .lookup(&account, ObjectRole::AdSet, lookup, &ad_set_name)
                    .await?
                {
                    Some(id) => {
                        report.reused.add(ObjectRole::AdSet);
                        id
                    }
                    None => {
                        let params = AdSetParams {
                            name: ad_set_name.clone(),
                            campaign_id: campaign_id.clone(),
                            daily_budget_minor: opts
                                .budget_minor
                                .unwrap_or(settings.daily_budget_minor),
                            targeting: self.settings.targeting.spec(&settings.geo),
                        };
                        let id = self
                            .platform
                            .create_ad_set(&account, &params)
                            .await
                            .map_err(|e| PipelineError::external(ObjectRole::AdSet, e))?;
                        report.created.add(ObjectRole::AdSet);
                        id
                    }
                }
            }
        };
        self.persist_parent(&mut rows, ObjectRole::AdSet, &ad_set_id)
            .await?;

        for row in rows.iter_mut() {
            match self.sync_row(&account, &ad_set_id, row, report).await {
                Ok(()) => report.stage.succeed(row.id),
                Err(err) if err.scope() == ErrorScope::Pass => return Err(err),
                Err(err) => report.stage.row_failed(row.id, &err),
            }
        }
        Ok(())
    }

    /// Exact-name lookup; more than one match is never guessed between.
    async fn lookup(
        &self,
        account: &AdAccount,
        role: ObjectRole,
        lookup: Lookup,
        name: &str,
    ) -> Result<Option<String>, PipelineError> {
        let mut matches = self
            .platform
            .find_by_name(account, &lookup, name)
            .await
            .map_err(|e| PipelineError::external(role, e))?;
        match matches.len() {
            0 => Ok(None),
            1 => {
                debug!(%role, name, "reusing object found by name");
                Ok(matches.pop())
            }
            _ => Err(PipelineError::NamingCollisionRisk {
                role,
                name: name.to_string(),
                matches,
            }),
        }
    }

    /// Write a parent id to every row of the group that lacks it, in one call.
    async fn persist_parent(
        &mut self,
        rows: &mut [LedgerRow],
        role: ObjectRole,
        id: &str,
    ) -> Result<(), PipelineError> {
        let mut updated = Vec::new();
        let mut writes = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let current = match role {
                ObjectRole::Campaign => row.refs.campaign(),
                _ => row.refs.ad_set(),
            };
            if current.is_some() {
                continue;
            }
            let mut next = row.refs.clone();
            next.record(role, id)
                .map_err(|source| PipelineError::BrokenChain {
                    row_id: row.id,
                    source,
                })?;
            writes.push((row.id, ref_fields(role, id)));
            updated.push((index, next));
        }
        if writes.is_empty() {
            return Ok(());
        }
        self.ledger.batch_update(&writes).await?;
        for (index, refs) in updated {
            rows[index].refs = refs;
        }
        Ok(())
    }

    /// Record `id` under `role` for one row, remotely then in memory.
    async fn persist(
        &mut self,
        row: &mut LedgerRow,
        role: ObjectRole,
        id: &str,
    ) -> Result<(), PipelineError> {
        let mut next = row.refs.clone();
        next.record(role, id)
            .map_err(|source| PipelineError::BrokenChain {
                row_id: row.id,
                source,
            })?;
        self.ledger.update_fields(row.id, &ref_fields(role, id)).await?;
        row.refs = next;
        Ok(())
    }

    async fn sync_row(
        &mut self,
        account: &AdAccount,
        ad_set_id: &str,
        row: &mut LedgerRow,
        report: &mut SyncReport,
    ) -> Result<(), PipelineError> {
        let asset_name = match self.blobs.file_name(&row.asset_url).await {
            Ok(name) => name,
            Err(err) => {
                warn!(row_id = row.id, error = %err, "asset name unavailable, using derived name");
                naming::asset_file_name(row.id, &row.hook)
            }
        };

        let image_hash = match row.refs.image_hash() {
            Some(hash) => hash.to_string(),
            None => {
                let bytes = self
                    .blobs
                    .download(&row.asset_url)
                    .await
                    .map_err(PipelineError::asset_transfer)?;
                let hash = self
                    .platform
                    .upload_image(account, &asset_name, &bytes)
                    .await
                    .map_err(|e| PipelineError::external(ObjectRole::Image, e))?;
                report.created.add(ObjectRole::Image);
                self.persist(row, ObjectRole::Image, &hash).await?;
                hash
            }
        };

        let name = naming::ad_name(row, &asset_name, self.settings.aspect);

        let creative_id = match row.refs.creative() {
            Some(id) => id.to_string(),
            None => {
                let id = match self
                    .lookup(account, ObjectRole::Creative, Lookup::Creatives, &name)
                    .await?
                {
                    Some(id) => {
                        report.reused.add(ObjectRole::Creative);
                        id
                    }
                    None => {
                        let params = CreativeParams {
                            name: name.clone(),
                            image_hash,
                            message: self.settings.creative_message.clone(),
                        };
                        let id = self
                            .platform
                            .create_creative(account, &params)
                            .await
                            .map_err(|e| PipelineError::external(ObjectRole::Creative, e))?;
                        report.created.add(ObjectRole::Creative);
                        id
                    }
                };
                self.persist(row, ObjectRole::Creative, &id).await?;
                id
            }
        };

        let lookup = Lookup::Ads {
            ad_set_id: ad_set_id.to_string(),
        };
        let ad_id = match self.lookup(account, ObjectRole::Ad, lookup, &name).await? {
            Some(id) => {
                report.reused.add(ObjectRole::Ad);
                id
            }
            None => {
                let params = AdParams {
                    name,
                    ad_set_id: ad_set_id.to_string(),
                    creative_id,
                };
                let id = self
                    .platform
                    .create_ad(account, &params)
                    .await
                    .map_err(|e| PipelineError::external(ObjectRole::Ad, e))?;
                report.created.add(ObjectRole::Ad);
                id
            }
        };
        self.persist(row, ObjectRole::Ad, &ad_id).await?;
        info!(row_id = row.id, ad_id = %ad_id, "ad attached");
        Ok(())
    }
}
