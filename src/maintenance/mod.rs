use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::time::{Duration as TokioDuration, sleep};
use tracing::{error, info};

use crate::web::{AppState, auth};

const CLEANUP_INTERVAL_MINUTES: u64 = 15;
/// Unprocessed entries untouched for this long are assumed to have lost their analysis task.
const STALE_ANALYSIS_MINUTES: i64 = 10;

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = TokioDuration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(&state).await {
                error!(?err, "maintenance cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState) -> Result<()> {
    let sessions_removed = auth::purge_expired_sessions(state.pool_ref())
        .await
        .context("failed to purge expired sessions")?;

    let cutoff = Utc::now() - Duration::minutes(STALE_ANALYSIS_MINUTES);
    let analyses_recovered = state
        .journal()
        .engine()
        .recover_stale(cutoff)
        .await
        .context("failed to recover stale journal analyses")?;

    if sessions_removed > 0 || analyses_recovered > 0 {
        info!(sessions_removed, analyses_recovered, "maintenance cycle completed");
    }

    Ok(())
}
