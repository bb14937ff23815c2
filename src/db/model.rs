//! Records returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

/// One stored grid row; `row_number` 1 is the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub row_number: i64,
    pub cells: Vec<String>,
}

/// Current owner of a named run lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
