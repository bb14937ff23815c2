//! Ideation and image stages.
//!
//! Both stages write each row at most once per pass: ideation appends all new
//! rows in a single call, the image stage writes asset URL and status of a row
//! together. Generation calls are retried with backoff; storage calls are not.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

use crate::catalog::AppCatalog;
use crate::drive::BlobStore;
use crate::error::{ErrorScope, PipelineError};
use crate::funnel::{self, Actor, Transition};
use crate::ledger::{status_fields, Column, FieldMap, Ledger, RowFilter};
use crate::model::{LedgerRow, Status};
use crate::naming;
use crate::openai::{ImageGenerator, TextGenerator};
use crate::report::StageReport;
use crate::retry::Backoff;

#[derive(Debug, Clone, Default)]
pub struct IdeateOptions {
    /// Catalog entry to ideate for; the first entry when absent.
    pub app_name: Option<String>,
    pub count: Option<usize>,
    pub platform: Option<String>,
}

/// Fallbacks for [`IdeateOptions`] taken from the `app` config section.
#[derive(Debug, Clone)]
pub struct IdeateDefaults {
    pub count: usize,
    pub platform: String,
    pub backoff: Backoff,
}

/// Generate ideas for one app and append them as `Ideated` rows.
#[instrument(skip_all)]
pub async fn ideate(
    ledger: &mut Ledger,
    catalog: &mut AppCatalog,
    text: &dyn TextGenerator,
    defaults: &IdeateDefaults,
    opts: &IdeateOptions,
    now: DateTime<Utc>,
) -> Result<Vec<LedgerRow>, PipelineError> {
    let app = catalog.resolve(opts.app_name.as_deref()).await?;
    let count = opts.count.unwrap_or(defaults.count);
    if count == 0 {
        return Ok(Vec::new());
    }
    let platform = opts
        .platform
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(&defaults.platform)
        .to_string();

    let mut ideas = defaults
        .backoff
        .retry("ideas", || text.generate_ideas(&app, count, &platform))
        .await
        .map_err(PipelineError::content)?;
    if ideas.is_empty() {
        return Err(PipelineError::content(anyhow::anyhow!(
            "generator returned no ideas for {}",
            app.name
        )));
    }
    if ideas.len() > count {
        ideas.truncate(count);
    } else if ideas.len() < count {
        warn!(app = %app.name, requested = count, received = ideas.len(), "fewer ideas than requested");
    }

    let ids = ledger.allocate_ids(ideas.len()).await?;
    let rows: Vec<LedgerRow> = ids
        .into_iter()
        .zip(&ideas)
        .map(|(id, idea)| LedgerRow::ideated(id, now, &app.name, &platform, idea))
        .collect();
    ledger.append_rows(&rows).await?;
    info!(
        app = %app.name,
        first_id = ?rows.first().map(|r| r.id),
        count = rows.len(),
        "ideas appended"
    );
    Ok(rows)
}

/// Render and store an image for every `Ideated` row, promoting it to
/// `Uploaded`.
#[instrument(skip_all)]
pub async fn generate_images(
    ledger: &mut Ledger,
    images: &dyn ImageGenerator,
    blobs: &dyn BlobStore,
    backoff: &Backoff,
) -> Result<StageReport, PipelineError> {
    let mut rows = ledger.list_rows(&RowFilter::status(Status::Ideated)).await?;
    rows.sort_by_key(|r| r.id);
    let mut report = StageReport::default();

    for mut row in rows {
        match render_row(ledger, images, blobs, backoff, &mut row).await {
            Ok(Transition::Apply) => report.succeed(row.id),
            Ok(Transition::Skip(reason)) => report.skip(row.id, reason),
            Err(err) if err.scope() == ErrorScope::Pass => return Err(err),
            Err(err) => report.row_failed(row.id, &err),
        }
    }
    info!(
        uploaded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.row_failures.len(),
        "image stage finished"
    );
    Ok(report)
}

async fn render_row(
    ledger: &mut Ledger,
    images: &dyn ImageGenerator,
    blobs: &dyn BlobStore,
    backoff: &Backoff,
    row: &mut LedgerRow,
) -> Result<Transition, PipelineError> {
    if row.asset_url.trim().is_empty() {
        if row.image_prompt.trim().is_empty() {
            return Ok(Transition::Skip("empty image prompt"));
        }
        let prompt = row.image_prompt.as_str();
        let bytes = backoff
            .retry("image", || images.generate_image(prompt))
            .await
            .map_err(PipelineError::content)?;
        let file_name = naming::asset_file_name(row.id, &row.hook);
        let stored = blobs
            .upload_png(&file_name, bytes)
            .await
            .map_err(PipelineError::asset_transfer)?;
        row.asset_url = stored.url;
    }

    let transition = funnel::apply(row, Status::Uploaded, Actor::Automation);
    if transition.is_apply() {
        let fields = FieldMap::from([
            (Column::ImageUrl, row.asset_url.clone()),
            (Column::Status, row.status.as_str().to_string()),
        ]);
        ledger.update_fields(row.id, &fields).await?;
    }
    Ok(transition)
}

/// Apply reviewer transitions to many rows in one write.
#[instrument(skip_all)]
pub async fn review(
    ledger: &mut Ledger,
    ids: &[i64],
    target: Status,
) -> Result<StageReport, PipelineError> {
    let mut report = StageReport::default();
    let mut updates = Vec::new();
    let unique: BTreeSet<i64> = ids.iter().copied().collect();
    for id in unique {
        let mut row = match ledger.get_row(id).await {
            Ok(row) => row,
            Err(PipelineError::UnknownRow(id)) => {
                report.skip(id, "row not found");
                continue;
            }
            Err(err) => return Err(err),
        };
        match funnel::apply(&mut row, target, Actor::Reviewer) {
            Transition::Apply => {
                updates.push((id, status_fields(target)));
                report.succeed(id);
            }
            Transition::Skip(reason) => report.skip(id, reason),
        }
    }
    ledger.batch_update(&updates).await?;
    info!(status = %target.as_str(), updated = report.succeeded.len(), "review applied");
    Ok(report)
}
