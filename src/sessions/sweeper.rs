//! Expired-session reclamation.
//!
//! Background task that periodically finds anonymous sessions inactive past
//! a threshold and deletes them together with everything they own. Each
//! resource's dependent records are removed before the resource, and every
//! resource before the session record, so referential order holds at each
//! step. One session's failure never stops the pass.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::store::{now_millis, SessionStore, SessionStoreError};
use crate::resources::ResourceStore;

const DAY_MS: i64 = 86_400_000;

/// Configuration for automatic session reclamation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Whether the background sweeper is enabled.
    pub enabled: bool,
    /// Sessions inactive for more than this many days are reclaimed.
    pub inactive_days: u32,
    /// How often (in hours) the sweeper runs.
    pub interval_hours: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactive_days: 30,
            interval_hours: 24,
        }
    }
}

/// Build a `SweeperConfig` from the top-level configuration value.
///
/// Reads from `sweeper.enabled`, `sweeper.inactiveDays`, and
/// `sweeper.intervalHours`, falling back to defaults when keys are absent.
pub fn build_sweeper_config(cfg: &Value) -> SweeperConfig {
    let sweeper = cfg.get("sweeper").and_then(|v| v.as_object());
    let defaults = SweeperConfig::default();

    SweeperConfig {
        enabled: sweeper
            .and_then(|o| o.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.enabled),
        inactive_days: sweeper
            .and_then(|o| o.get("inactiveDays"))
            .and_then(|v| v.as_u64())
            .map(|d| d as u32)
            .unwrap_or(defaults.inactive_days),
        interval_hours: sweeper
            .and_then(|o| o.get("intervalHours"))
            .and_then(|v| v.as_u64())
            .map(|h| h as u32)
            .unwrap_or(defaults.interval_hours),
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Sessions fully reclaimed.
    pub swept: usize,
    /// Sessions whose cascade failed and were skipped.
    pub failed: usize,
}

/// Reclaim every anonymous session inactive for more than `inactive_days`.
///
/// Per-session failures are logged and skipped; only total store
/// unavailability aborts the pass.
pub fn sweep(
    store: &SessionStore,
    resources: &dyn ResourceStore,
    inactive_days: u32,
) -> Result<SweepOutcome, SessionStoreError> {
    let cutoff = now_millis() - i64::from(inactive_days) * DAY_MS;
    sweep_before(store, resources, cutoff)
}

fn sweep_before(
    store: &SessionStore,
    resources: &dyn ResourceStore,
    cutoff: i64,
) -> Result<SweepOutcome, SessionStoreError> {
    let stale = store.list_inactive_since(cutoff)?;

    let mut outcome = SweepOutcome::default();
    for session in stale {
        match sweep_one(store, resources, &session.session_id) {
            Ok(removed_resources) => {
                outcome.swept += 1;
                debug!(
                    session_id = %session.session_id,
                    removed_resources,
                    "Reclaimed expired session"
                );
            }
            Err(e) => {
                outcome.failed += 1;
                warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Failed to reclaim session; continuing"
                );
            }
        }
    }
    Ok(outcome)
}

/// Cascade one session: dependents, then resources, then the session record.
fn sweep_one(
    store: &SessionStore,
    resources: &dyn ResourceStore,
    session_id: &str,
) -> Result<usize, String> {
    let owned = resources
        .list_owned_by_session(session_id)
        .map_err(|e| e.to_string())?;
    for resource_id in &owned {
        resources
            .delete_with_dependents(resource_id)
            .map_err(|e| e.to_string())?;
    }
    store
        .delete_anonymous(session_id)
        .map_err(|e| e.to_string())?;
    Ok(owned.len())
}

/// Background loop that periodically reclaims expired sessions.
///
/// Runs an initial pass after a short startup delay, then repeats at the
/// configured interval. Exits cleanly when the shutdown signal fires; an
/// in-flight pass finishes its current session first.
pub async fn sweeper_loop(
    store: Arc<SessionStore>,
    resources: Arc<dyn ResourceStore>,
    config: SweeperConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if !config.enabled {
        debug!("Session sweeper is disabled");
        return;
    }

    let interval = Duration::from_secs(u64::from(config.interval_hours) * 3600);

    info!(
        inactive_days = config.inactive_days,
        interval_hours = config.interval_hours,
        "Session sweeper scheduled"
    );

    if !wait_for_startup_delay(&mut shutdown).await {
        return;
    }

    // Run the first pass immediately after the startup delay.
    run_sweep(store.clone(), resources.clone(), config.inactive_days).await;

    // Then run on the configured interval.
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; consume it since we already ran above.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if *shutdown.borrow() {
            break;
        }

        run_sweep(store.clone(), resources.clone(), config.inactive_days).await;
    }
}

/// Wait for the initial startup delay, returning `false` if shutdown was
/// signalled before the delay elapsed.
async fn wait_for_startup_delay(shutdown: &mut watch::Receiver<bool>) -> bool {
    let startup_delay = Duration::from_secs(30);

    tokio::select! {
        _ = tokio::time::sleep(startup_delay) => {}
        _ = shutdown.changed() => return false,
    }

    !*shutdown.borrow()
}

/// Execute a single sweep pass, logging the result.
pub async fn run_sweep(
    store: Arc<SessionStore>,
    resources: Arc<dyn ResourceStore>,
    inactive_days: u32,
) {
    let outcome =
        tokio::task::spawn_blocking(move || sweep(&store, resources.as_ref(), inactive_days))
            .await;
    match outcome {
        Ok(Ok(result)) => {
            if result.swept > 0 || result.failed > 0 {
                info!(
                    swept = result.swept,
                    failed = result.failed,
                    inactive_days,
                    "Sweep pass complete"
                );
            } else {
                debug!(inactive_days, "Sweep pass found no expired sessions");
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Sweep pass failed");
        }
        Err(e) => {
            warn!(error = %e, "Sweep task failed");
        }
    }
}
