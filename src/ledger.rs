//! Typed, cached access to the ledger sheet.
//!
//! Reads are served from a session snapshot of the whole sheet; every write
//! drops the snapshot so the next read is fresh. Row positions are remembered
//! across snapshots because ledger rows are never deleted or reordered.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ObjectRole, PipelineError};
use crate::funnel;
use crate::ids;
use crate::model::{ExternalRefs, LedgerRow, Status};
use crate::table::{CellWrite, Grid, TableBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Id,
    Timestamp,
    Status,
    AppName,
    TargetAudience,
    Platform,
    Hook,
    Idea,
    ImagePrompt,
    ImageUrl,
    CampaignId,
    AdSetId,
    CreativeId,
    AdId,
    ImageHash,
}

impl Column {
    pub const ALL: [Column; 15] = [
        Column::Id,
        Column::Timestamp,
        Column::Status,
        Column::AppName,
        Column::TargetAudience,
        Column::Platform,
        Column::Hook,
        Column::Idea,
        Column::ImagePrompt,
        Column::ImageUrl,
        Column::CampaignId,
        Column::AdSetId,
        Column::CreativeId,
        Column::AdId,
        Column::ImageHash,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::Timestamp => "Timestamp",
            Column::Status => "Status",
            Column::AppName => "App_Name",
            Column::TargetAudience => "Target_Audience",
            Column::Platform => "Platform",
            Column::Hook => "Hook",
            Column::Idea => "Idea",
            Column::ImagePrompt => "Image_Prompt",
            Column::ImageUrl => "Image_URL",
            Column::CampaignId => "campaign_id",
            Column::AdSetId => "adset_id",
            Column::CreativeId => "creative_id",
            Column::AdId => "ad_id",
            Column::ImageHash => "image_hash",
        }
    }

    pub fn from_header(name: &str) -> Option<Column> {
        let name = name.trim();
        Column::ALL
            .into_iter()
            .find(|c| c.header().eq_ignore_ascii_case(name))
    }

    /// Columns later stages may rewrite. Everything else is written once by
    /// ideation.
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Column::Status
                | Column::ImageUrl
                | Column::CampaignId
                | Column::AdSetId
                | Column::CreativeId
                | Column::AdId
                | Column::ImageHash
        )
    }

    pub fn for_role(role: ObjectRole) -> Column {
        match role {
            ObjectRole::Campaign => Column::CampaignId,
            ObjectRole::AdSet => Column::AdSetId,
            ObjectRole::Creative => Column::CreativeId,
            ObjectRole::Ad => Column::AdId,
            ObjectRole::Image => Column::ImageHash,
        }
    }

    pub fn expected_header() -> Vec<String> {
        Column::ALL.iter().map(|c| c.header().to_string()).collect()
    }
}

/// Column → new cell value for one row.
pub type FieldMap = BTreeMap<Column, String>;

pub fn status_fields(status: Status) -> FieldMap {
    FieldMap::from([(Column::Status, status.as_str().to_string())])
}

pub fn ref_fields(role: ObjectRole, id: &str) -> FieldMap {
    FieldMap::from([(Column::for_role(role), id.to_string())])
}

#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub status: Option<Status>,
    pub app_name: Option<String>,
    /// Only rows the synchronizer still has to attach ads for.
    pub sync_pending: bool,
}

impl RowFilter {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn sync_pending(app_name: Option<&str>) -> Self {
        Self {
            status: Some(Status::Uploaded),
            app_name: app_name.map(str::to_string),
            sync_pending: true,
        }
    }

    pub fn matches(&self, row: &LedgerRow) -> bool {
        if let Some(status) = self.status {
            if row.status != status {
                return false;
            }
        }
        if let Some(app) = &self.app_name {
            if !row.app_name.trim().eq_ignore_ascii_case(app.trim()) {
                return false;
            }
        }
        !self.sync_pending || funnel::sync_eligible(row)
    }
}

/// A sheet row the core refuses to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRow {
    pub row_number: i64,
    pub id: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAction {
    Unchanged,
    Created,
    Extended,
    Remapped,
}

/// Where each known column sits in the actual header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    index: HashMap<Column, usize>,
    width: usize,
}

impl Layout {
    pub fn from_header(header: &[String]) -> Self {
        let mut index = HashMap::new();
        for (i, name) in header.iter().enumerate() {
            if let Some(col) = Column::from_header(name) {
                index.entry(col).or_insert(i);
            }
        }
        Self {
            index,
            width: header.len(),
        }
    }

    pub fn position(&self, column: Column) -> Option<usize> {
        self.index.get(&column).copied()
    }

    fn cell<'a>(&self, cells: &'a [String], column: Column) -> &'a str {
        self.position(column)
            .and_then(|i| cells.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    layout: Layout,
    header: Vec<String>,
    rows: Vec<LedgerRow>,
    invalid: Vec<InvalidRow>,
    ids: Vec<i64>,
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_row(layout: &Layout, cells: &[String]) -> Result<LedgerRow, String> {
    let get = |c: Column| layout.cell(cells, c);
    let id: i64 = get(Column::Id)
        .parse()
        .map_err(|_| format!("unparseable id {:?}", get(Column::Id)))?;
    if id <= 0 {
        return Err(format!("non-positive id {id}"));
    }
    let created_at = parse_timestamp(get(Column::Timestamp))
        .ok_or_else(|| format!("unparseable timestamp {:?}", get(Column::Timestamp)))?;
    let status = Status::parse_status(get(Column::Status))
        .ok_or_else(|| format!("unknown status {:?}", get(Column::Status)))?;
    let opt = |c: Column| Some(get(c).to_string());
    let refs = ExternalRefs::from_parts(
        opt(Column::CampaignId),
        opt(Column::AdSetId),
        opt(Column::CreativeId),
        opt(Column::AdId),
        opt(Column::ImageHash),
    )
    .map_err(|e| e.to_string())?;
    Ok(LedgerRow {
        id,
        created_at,
        status,
        app_name: get(Column::AppName).to_string(),
        target_audience: get(Column::TargetAudience).to_string(),
        platform: get(Column::Platform).to_string(),
        hook: get(Column::Hook).to_string(),
        idea: get(Column::Idea).to_string(),
        image_prompt: get(Column::ImagePrompt).to_string(),
        asset_url: get(Column::ImageUrl).to_string(),
        refs,
    })
}

/// Cell value of `column` for `row`.
pub fn cell_value(row: &LedgerRow, column: Column) -> String {
    let opt = |v: Option<&str>| v.unwrap_or_default().to_string();
    match column {
        Column::Id => row.id.to_string(),
        Column::Timestamp => format_timestamp(row.created_at),
        Column::Status => row.status.as_str().to_string(),
        Column::AppName => row.app_name.clone(),
        Column::TargetAudience => row.target_audience.clone(),
        Column::Platform => row.platform.clone(),
        Column::Hook => row.hook.clone(),
        Column::Idea => row.idea.clone(),
        Column::ImagePrompt => row.image_prompt.clone(),
        Column::ImageUrl => row.asset_url.clone(),
        Column::CampaignId => opt(row.refs.campaign()),
        Column::AdSetId => opt(row.refs.ad_set()),
        Column::CreativeId => opt(row.refs.creative()),
        Column::AdId => opt(row.refs.ad()),
        Column::ImageHash => opt(row.refs.image_hash()),
    }
}

fn row_cells(layout: &Layout, row: &LedgerRow) -> Vec<String> {
    let width = Column::ALL
        .iter()
        .filter_map(|c| layout.position(*c))
        .max()
        .map_or(0, |i| i + 1)
        .max(layout.width);
    let mut cells = vec![String::new(); width];
    for column in Column::ALL {
        if let Some(i) = layout.position(column) {
            cells[i] = cell_value(row, column);
        }
    }
    cells
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

pub struct Ledger {
    backend: Arc<dyn TableBackend>,
    positions: HashMap<i64, i64>,
    cache: Option<Snapshot>,
}

impl Ledger {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            positions: HashMap::new(),
            cache: None,
        }
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Drop the session snapshot; the next read goes to the backend.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    async fn load(&mut self) -> Result<Snapshot, PipelineError> {
        let grid = self
            .backend
            .read_all()
            .await
            .map_err(PipelineError::store_read)?;
        let layout = Layout::from_header(&grid.header);
        let mut snap = Snapshot {
            layout,
            header: grid.header.clone(),
            ..Default::default()
        };
        let mut seen = HashSet::new();
        for (index, cells) in grid.rows.iter().enumerate() {
            let row_number = Grid::row_number(index);
            if is_blank(cells) {
                continue;
            }
            let raw_id = snap.layout.cell(cells, Column::Id).parse::<i64>().ok();
            if let Some(id) = raw_id {
                snap.ids.push(id);
            }
            let parsed = parse_row(&snap.layout, cells).and_then(|row| {
                if seen.insert(row.id) {
                    Ok(row)
                } else {
                    Err(format!("duplicate id {}", row.id))
                }
            });
            match parsed {
                Ok(row) => {
                    self.positions.insert(row.id, row_number);
                    snap.rows.push(row);
                }
                Err(reason) => snap.invalid.push(InvalidRow {
                    row_number,
                    id: raw_id,
                    reason,
                }),
            }
        }
        if !snap.invalid.is_empty() {
            warn!(
                ledger = %self.backend.describe(),
                count = snap.invalid.len(),
                "ledger rows skipped as invalid"
            );
        }
        debug!(rows = snap.rows.len(), "ledger snapshot loaded");
        Ok(snap)
    }

    async fn snapshot(&mut self) -> Result<&Snapshot, PipelineError> {
        let snap = match self.cache.take() {
            Some(snap) => snap,
            None => self.load().await?,
        };
        Ok(&*self.cache.insert(snap))
    }

    /// Create or repair the header so it matches [`Column::ALL`].
    #[instrument(skip_all)]
    pub async fn ensure_schema(&mut self) -> Result<SchemaAction, PipelineError> {
        self.invalidate();
        let grid = self
            .backend
            .read_all()
            .await
            .map_err(PipelineError::store_read)?;
        let expected = Column::expected_header();
        let current: Vec<String> = grid.header.iter().map(|h| h.trim().to_string()).collect();

        let action = if current.starts_with(&expected) {
            SchemaAction::Unchanged
        } else if is_blank(&current) {
            self.backend
                .write_header(&expected)
                .await
                .map_err(PipelineError::store_write)?;
            SchemaAction::Created
        } else if current.len() < expected.len() && expected.starts_with(&current) {
            self.backend
                .write_header(&expected)
                .await
                .map_err(PipelineError::store_write)?;
            SchemaAction::Extended
        } else {
            self.remap(&grid).await?;
            SchemaAction::Remapped
        };
        if action != SchemaAction::Unchanged {
            info!(ledger = %self.backend.describe(), ?action, "ledger header repaired");
        }
        self.invalidate();
        Ok(action)
    }

    /// Rewrite header and data so every known column sits at its expected
    /// position. Unknown columns are kept after the known ones.
    async fn remap(&mut self, grid: &Grid) -> Result<(), PipelineError> {
        let old = Layout::from_header(&grid.header);
        let known: HashSet<usize> = Column::ALL.iter().filter_map(|c| old.position(*c)).collect();
        let extras: Vec<usize> = (0..grid.header.len())
            .filter(|i| !known.contains(i) && !grid.header[*i].trim().is_empty())
            .collect();

        let mut header = Column::expected_header();
        header.extend(extras.iter().map(|i| grid.header[*i].clone()));

        let source: Vec<Option<usize>> = Column::ALL
            .iter()
            .map(|c| old.position(*c))
            .chain(extras.iter().map(|i| Some(*i)))
            .collect();

        let mut cells = Vec::new();
        let width = header.len().max(grid.header.len());
        for (i, name) in header.iter().enumerate() {
            cells.push(CellWrite {
                row_number: 1,
                column: i,
                value: name.clone(),
            });
        }
        for i in header.len()..width {
            cells.push(CellWrite {
                row_number: 1,
                column: i,
                value: String::new(),
            });
        }
        for (index, row) in grid.rows.iter().enumerate() {
            let row_number = Grid::row_number(index);
            if row.len() > grid.header.len() {
                warn!(row_number, "cells beyond the header dropped during remap");
            }
            let row_width = width.max(row.len());
            for column in 0..row_width {
                let value = source
                    .get(column)
                    .copied()
                    .flatten()
                    .and_then(|from| row.get(from).cloned())
                    .unwrap_or_default();
                cells.push(CellWrite {
                    row_number,
                    column,
                    value,
                });
            }
        }
        self.backend
            .batch_update(&cells)
            .await
            .map_err(PipelineError::store_write)
    }

    /// Header as currently stored.
    pub async fn header(&mut self) -> Result<Vec<String>, PipelineError> {
        Ok(self.snapshot().await?.header.clone())
    }

    pub async fn list_rows(&mut self, filter: &RowFilter) -> Result<Vec<LedgerRow>, PipelineError> {
        let snap = self.snapshot().await?;
        Ok(snap.rows.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    pub async fn get_row(&mut self, id: i64) -> Result<LedgerRow, PipelineError> {
        let snap = self.snapshot().await?;
        snap.rows
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(PipelineError::UnknownRow(id))
    }

    pub async fn invalid_rows(&mut self) -> Result<Vec<InvalidRow>, PipelineError> {
        Ok(self.snapshot().await?.invalid.clone())
    }

    /// Next free id, computed from a fresh read.
    pub async fn next_id(&mut self) -> Result<i64, PipelineError> {
        self.invalidate();
        let snap = self.snapshot().await?;
        Ok(ids::next_id(snap.ids.iter().copied()))
    }

    /// `count` consecutive fresh ids, computed from a fresh read.
    pub async fn allocate_ids(&mut self, count: usize) -> Result<Vec<i64>, PipelineError> {
        self.invalidate();
        let snap = self.snapshot().await?;
        Ok(ids::allocate(snap.ids.iter().copied(), count))
    }

    pub async fn append_row(&mut self, row: &LedgerRow) -> Result<(), PipelineError> {
        self.append_rows(std::slice::from_ref(row)).await
    }

    /// Append all rows in one call.
    #[instrument(skip_all)]
    pub async fn append_rows(&mut self, rows: &[LedgerRow]) -> Result<(), PipelineError> {
        if rows.is_empty() {
            return Ok(());
        }
        let layout = self.snapshot().await?.layout.clone();
        if layout.position(Column::Id).is_none() {
            return Err(PipelineError::store_write(anyhow::anyhow!(
                "ledger header has no ID column"
            )));
        }
        let cells: Vec<Vec<String>> = rows.iter().map(|r| row_cells(&layout, r)).collect();
        let result = self.backend.append_rows(&cells).await;
        self.invalidate();
        result.map_err(PipelineError::store_write)?;
        debug!(count = rows.len(), "ledger rows appended");
        Ok(())
    }

    /// Write `fields` of one row in one call.
    pub async fn update_fields(&mut self, id: i64, fields: &FieldMap) -> Result<(), PipelineError> {
        self.batch_update(&[(id, fields.clone())]).await
    }

    /// Write the fields of many rows in one call.
    #[instrument(skip_all)]
    pub async fn batch_update(&mut self, updates: &[(i64, FieldMap)]) -> Result<(), PipelineError> {
        for (_, fields) in updates {
            if let Some(column) = fields.keys().find(|c| !c.is_mutable()) {
                return Err(PipelineError::ImmutableColumn(column.header()));
            }
        }
        if updates.iter().all(|(_, f)| f.is_empty()) {
            return Ok(());
        }
        if updates.iter().any(|(id, _)| !self.positions.contains_key(id)) {
            self.invalidate();
        }
        let layout = self.snapshot().await?.layout.clone();

        let mut cells = Vec::new();
        for (id, fields) in updates {
            let row_number = *self
                .positions
                .get(id)
                .ok_or(PipelineError::UnknownRow(*id))?;
            for (column, value) in fields {
                let position = layout.position(*column).ok_or_else(|| {
                    PipelineError::store_write(anyhow::anyhow!(
                        "ledger header has no {} column",
                        column.header()
                    ))
                })?;
                cells.push(CellWrite {
                    row_number,
                    column: position,
                    value: value.clone(),
                });
            }
        }
        let result = self.backend.batch_update(&cells).await;
        self.invalidate();
        result.map_err(PipelineError::store_write)?;
        debug!(rows = updates.len(), cells = cells.len(), "ledger cells written");
        Ok(())
    }
}
