//! Error taxonomy shared by every pipeline stage.
//!
//! Each error knows how far it reaches: a store failure ends the whole stage
//! pass, a parent-object failure ends one app's batch, anything else is
//! attributed to a single ledger row.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::meta::PlatformError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Role of a remote object inside the campaign → ad set → creative → ad chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectRole {
    Campaign,
    AdSet,
    Creative,
    Ad,
    Image,
}

impl ObjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectRole::Campaign => "campaign",
            ObjectRole::AdSet => "ad set",
            ObjectRole::Creative => "creative",
            ObjectRole::Ad => "ad",
            ObjectRole::Image => "image",
        }
    }

    /// Parent objects are shared by every row of an app.
    pub fn is_parent(&self) -> bool {
        matches!(self, ObjectRole::Campaign | ObjectRole::AdSet)
    }
}

impl fmt::Display for ObjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recording a child reference before its parent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{child} cannot be recorded before its {missing}")]
pub struct ChainError {
    pub child: ObjectRole,
    pub missing: ObjectRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Abort the current stage pass.
    Pass,
    /// Abort the current app's batch; other apps continue.
    App,
    /// Skip the current row; the batch continues.
    Row,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ledger read failed: {0}")]
    StoreRead(#[source] BoxError),

    #[error("ledger write failed: {0}")]
    StoreWrite(#[source] BoxError),

    #[error("content generation failed: {0}")]
    ContentGeneration(#[source] BoxError),

    #[error("asset transfer failed: {0}")]
    AssetTransfer(#[source] BoxError),

    #[error("advertising platform rejected {role} (subcode {subcode:?}): {message}")]
    ExternalObject {
        role: ObjectRole,
        subcode: Option<i64>,
        message: String,
    },

    #[error("{} {role}s are named {name:?}; refusing to pick one", .matches.len())]
    NamingCollisionRisk {
        role: ObjectRole,
        name: String,
        matches: Vec<String>,
    },

    #[error("row {row_id}: {source}")]
    BrokenChain {
        row_id: i64,
        #[source]
        source: ChainError,
    },

    #[error("rows of app {app:?} reference different {role} ids: {ids:?}")]
    ConflictingParents {
        app: String,
        role: ObjectRole,
        ids: Vec<String>,
    },

    #[error("no campaign settings configured for app {0:?}")]
    MissingCampaignSettings(String),

    #[error("app {0:?} not found in app catalog")]
    UnknownApp(String),

    #[error("lease {name:?} is held by {holder} until {expires_at}")]
    LeaseHeld {
        name: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("column {0} is immutable once written")]
    ImmutableColumn(&'static str),

    #[error("row {0} not found in ledger")]
    UnknownRow(i64),

    #[error("local state error: {0}")]
    State(#[from] sqlx::Error),
}

impl PipelineError {
    pub fn store_read(err: anyhow::Error) -> Self {
        PipelineError::StoreRead(err.into())
    }

    pub fn store_write(err: anyhow::Error) -> Self {
        PipelineError::StoreWrite(err.into())
    }

    pub fn content(err: anyhow::Error) -> Self {
        PipelineError::ContentGeneration(err.into())
    }

    pub fn asset_transfer(err: anyhow::Error) -> Self {
        PipelineError::AssetTransfer(err.into())
    }

    pub fn external(role: ObjectRole, err: PlatformError) -> Self {
        PipelineError::ExternalObject {
            role,
            subcode: err.subcode(),
            message: err.to_string(),
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            PipelineError::StoreRead(_)
            | PipelineError::StoreWrite(_)
            | PipelineError::LeaseHeld { .. }
            | PipelineError::ImmutableColumn(_)
            | PipelineError::UnknownRow(_)
            | PipelineError::State(_) => ErrorScope::Pass,
            PipelineError::ExternalObject { role, .. }
            | PipelineError::NamingCollisionRisk { role, .. }
                if role.is_parent() =>
            {
                ErrorScope::App
            }
            PipelineError::ConflictingParents { .. }
            | PipelineError::MissingCampaignSettings(_)
            | PipelineError::UnknownApp(_) => ErrorScope::App,
            _ => ErrorScope::Row,
        }
    }
}
