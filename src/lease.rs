//! Advisory run lease held in local state.
//!
//! Two processes sharing the same state file never run a stage over the same
//! ledger at once. Processes on different hosts are not coordinated.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, Pool};
use crate::error::PipelineError;

#[derive(Debug)]
pub struct Lease {
    pool: Pool,
    name: String,
    holder: String,
}

impl Lease {
    /// Take the lease `name` for `ttl`, failing with `LeaseHeld` while another
    /// holder's lease is live. Expired leases are taken over.
    pub async fn acquire(pool: &Pool, name: &str, ttl: Duration) -> Result<Self, PipelineError> {
        let holder = Uuid::new_v4().to_string();
        let now = Utc::now();
        let acquired = db::try_acquire_lease(pool, name, &holder, now, now + ttl)
            .await
            .map_err(PipelineError::store_write)?;
        if !acquired {
            let current = db::fetch_lease(pool, name)
                .await
                .map_err(PipelineError::store_read)?;
            return Err(match current {
                Some(rec) => PipelineError::LeaseHeld {
                    name: rec.name,
                    holder: rec.holder,
                    expires_at: rec.expires_at,
                },
                None => PipelineError::LeaseHeld {
                    name: name.to_string(),
                    holder: "unknown".into(),
                    expires_at: now,
                },
            });
        }
        info!(lease = name, %holder, "run lease acquired");
        Ok(Self {
            pool: pool.clone(),
            name: name.to_string(),
            holder,
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn release(self) -> Result<(), PipelineError> {
        let released = db::release_lease(&self.pool, &self.name, &self.holder)
            .await
            .map_err(PipelineError::store_write)?;
        if released {
            debug!(lease = %self.name, "run lease released");
        } else {
            warn!(lease = %self.name, "run lease was taken over before release");
        }
        Ok(())
    }
}
