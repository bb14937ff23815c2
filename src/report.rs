//! Outcome of one stage pass.
use tracing::{error, warn};

use crate::error::{ObjectRole, PipelineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub row_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppFailure {
    pub app: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub succeeded: Vec<i64>,
    pub skipped: Vec<(i64, String)>,
    pub row_failures: Vec<RowFailure>,
    pub app_failures: Vec<AppFailure>,
}

impl StageReport {
    pub fn succeed(&mut self, row_id: i64) {
        self.succeeded.push(row_id);
    }

    pub fn skip(&mut self, row_id: i64, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(row_id, %reason, "row skipped");
        self.skipped.push((row_id, reason));
    }

    pub fn row_failed(&mut self, row_id: i64, err: &PipelineError) {
        warn!(row_id, error = %err, "row failed");
        self.row_failures.push(RowFailure {
            row_id,
            error: err.to_string(),
        });
    }

    pub fn app_failed(&mut self, app: &str, err: &PipelineError) {
        error!(app, error = %err, "app batch aborted");
        self.app_failures.push(AppFailure {
            app: app.to_string(),
            error: err.to_string(),
        });
    }

    pub fn has_app_failures(&self) -> bool {
        !self.app_failures.is_empty()
    }
}

/// Remote objects per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectCounts {
    pub campaigns: usize,
    pub ad_sets: usize,
    pub creatives: usize,
    pub ads: usize,
    pub images: usize,
}

impl ObjectCounts {
    pub fn add(&mut self, role: ObjectRole) {
        match role {
            ObjectRole::Campaign => self.campaigns += 1,
            ObjectRole::AdSet => self.ad_sets += 1,
            ObjectRole::Creative => self.creatives += 1,
            ObjectRole::Ad => self.ads += 1,
            ObjectRole::Image => self.images += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.campaigns + self.ad_sets + self.creatives + self.ads + self.images
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub stage: StageReport,
    pub created: ObjectCounts,
    pub reused: ObjectCounts,
}
