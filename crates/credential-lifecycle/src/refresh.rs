//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes the credential before it expires,
//! so foreground requests rarely pay refresh latency. The task goes through
//! the coordinator and therefore shares refresh tickets with foreground
//! callers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordinator::RefreshCoordinator;
use crate::error::Error;
use crate::state::CredentialState;

/// Spawn a background task that keeps the credential valid for `margin`.
///
/// Runs every `interval`. Rejected refresh tokens leave the credential
/// `Expired` and later cycles skip it until the next sign-in; transient
/// errors are retried on the next cycle.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_refresh_task(
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
    margin: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; the caller has just loaded or signed in
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&coordinator, margin).await;
        }
    })
}

/// Run one refresh cycle.
async fn refresh_cycle(coordinator: &RefreshCoordinator, margin: Duration) {
    match coordinator.store().state() {
        CredentialState::Absent => {
            debug!("no credential, skipping background refresh");
            return;
        }
        CredentialState::Expired => {
            debug!("credential expired, waiting for sign-in");
            return;
        }
        CredentialState::Active | CredentialState::Refreshing => {}
    }

    match coordinator.ensure_valid(margin).await {
        Ok(token_set) => {
            info!(expires_at = %token_set.expires_at(), "background refresh check passed");
        }
        Err(Error::InvalidatedRefreshToken(msg)) => {
            warn!(error = %msg, "refresh token rejected, sign-in required");
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
        }
    }
}
