//! Policy directory freshness watcher.
//!
//! Evaluation nodes in split deployments do not see the management node's
//! writes except through the filesystem. The watcher scans the directory
//! fingerprint on an interval and reloads when it changed; the explicit
//! `POST /api/v1/reload` endpoint funnels into the same store reload.

use std::sync::Arc;
use std::time::Duration;

use bastion_policy::PolicyStore;
use tokio::task::JoinHandle;

/// Spawn the background scan. `interval_secs == 0` disables it.
pub fn spawn_watcher(store: Arc<PolicyStore>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if store.modified_since_load().await {
                match store.reload().await {
                    Ok(count) => {
                        tracing::info!(policies = count, "policy directory changed on disk; reloaded");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "policy reload after external change failed");
                    }
                }
            }
        }
    }))
}
