//! Periodic removal of dead session rows.
//!
//! Expired and revoked sessions are already invalid; deleting them only keeps the table small.
//! API token rows are not touched here, they stay until their owner deletes them.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionService;

/// Run one sweep. Returns `(expired, revoked)` row counts.
pub async fn sweep_sessions(sessions: &SessionService) -> super::Result<(u64, u64)> {
    let expired = sessions.cleanup_expired().await?;
    let revoked = sessions.cleanup_revoked().await?;
    Ok((expired, revoked))
}

/// Sweep sessions every `interval` until `shutdown` is cancelled.
///
/// A failed sweep is logged and retried on the next tick.
pub async fn run_session_cleanup(sessions: SessionService, interval: Duration, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(interval = ?interval, "Starting session cleanup task");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session cleanup task shutting down");
                break;
            }
            _ = ticker.tick() => {
                match sweep_sessions(&sessions).await {
                    Ok((0, 0)) => debug!("Session sweep found nothing to remove"),
                    Ok((expired, revoked)) => info!(expired, revoked, "Removed dead sessions"),
                    Err(e) => warn!(error = %e, "Session sweep failed"),
                }
            }
        }
    }

    Ok(())
}
