//! Time-to-live expiry for collections whose driver has no native TTL.
//!
//! A sweep deletes every document last written more than `retention` ago.
//! Sweeps are idempotent and each one is a single driver call, so running
//! one concurrently with reads and writes is safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::driver::Collection;
use crate::error::StoreResult;

/// Run one expiry pass over `collection`. Returns the number of removed documents.
pub async fn sweep_once(collection: &dyn Collection, retention: Duration) -> StoreResult<u64> {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    let cutoff = Utc::now().timestamp_millis().saturating_sub(retention_ms);
    let removed = collection.expire_before(cutoff).await?;
    if removed > 0 {
        info!(collection = collection.name(), removed, "expired documents swept");
    } else {
        debug!(collection = collection.name(), "expiry sweep found nothing");
    }
    Ok(removed)
}

/// Spawn a task sweeping `collection` every `interval`.
///
/// The first sweep runs immediately. Failures are logged and the loop keeps
/// going; abort the returned handle to stop it.
pub fn spawn_sweeper(
    collection: Arc<dyn Collection>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(collection.as_ref(), retention).await {
                warn!(collection = collection.name(), %err, "expiry sweep failed");
            }
        }
    })
}
