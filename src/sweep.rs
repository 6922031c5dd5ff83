use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::actions::ActionKind;
use crate::db;
use crate::models::Submission;
use crate::state::SharedState;
use crate::submission::dispatch;
use crate::worker;

pub const SWEEP_LEASE: &str = "notify-bulk-email-sweep";

const LEASE_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Another process took the lease over before the run finished.
    pub lease_lost: bool,
}

/// Periodically deliver bulk-email submissions the queue has given up on.
pub async fn run_scheduler(state: SharedState, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(state.config.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        "Sweep scheduler started (every {}s)",
        state.config.sweep_interval.as_secs()
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        match run_once(&state, Utc::now()).await {
            Ok(Some(report)) if report.candidates > 0 => {
                tracing::info!(?report, "Sweep finished");
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Sweep error: {e}"),
        }

        if let Some(rate) = state.submission_limiter.rate() {
            match db::rate_limits::cleanup(&state.pool, rate.period.as_secs_f64()).await {
                Ok(removed) if removed > 0 => tracing::debug!("Removed {removed} expired rate limit counters"),
                Ok(_) => {}
                Err(e) => tracing::error!("Rate limit cleanup error: {e}"),
            }
        }
    }

    tracing::info!("Sweep scheduler stopped");
}

/// One sweep pass. Returns `None` when another process holds the sweep lease.
pub async fn run_once(state: &SharedState, now: DateTime<Utc>) -> Result<Option<SweepReport>, sqlx::Error> {
    let holder = format!("pid-{}", std::process::id());

    let Some(token) =
        db::leases::try_acquire(&state.pool, SWEEP_LEASE, &holder, lease_secs(state)).await?
    else {
        tracing::debug!("Sweep lease held elsewhere, skipping run");
        return Ok(None);
    };

    let result = run_with_lease(state, token, now).await;
    db::leases::release(&state.pool, SWEEP_LEASE, token).await?;
    result.map(Some)
}

/// Long enough to cover one interval, and always at least one delivery.
fn lease_secs(state: &SharedState) -> f64 {
    state
        .config
        .sweep_interval
        .max(worker::delivery_deadline(state) + LEASE_GRACE)
        .as_secs_f64()
}

/// Sweep under a lease identified by `token`. The lease is renewed before
/// every delivery and the run stops as soon as it is lost.
pub async fn run_with_lease(
    state: &SharedState,
    token: Uuid,
    now: DateTime<Utc>,
) -> Result<SweepReport, sqlx::Error> {
    let since = now - state.config.sweep_window;
    let candidates =
        db::submissions::list_unsent_abandoned(&state.pool, ActionKind::NotifyBulkEmail.names(), since)
            .await?;

    let mut report = SweepReport {
        candidates: candidates.len(),
        ..SweepReport::default()
    };

    for submission in &candidates {
        if !db::leases::renew(&state.pool, SWEEP_LEASE, token, lease_secs(state)).await? {
            tracing::warn!(
                remaining = report.candidates - report.sent - report.suppressed - report.failed,
                "Sweep lease lost, stopping run"
            );
            report.lease_lost = true;
            break;
        }

        match sweep_one(state, submission).await {
            Ok(true) => report.sent += 1,
            Ok(false) => report.suppressed += 1,
            Err(e) => {
                tracing::error!(
                    submission_id = %submission.id,
                    action = ActionKind::NotifyBulkEmail.as_str(),
                    error = %e,
                    "Sweep delivery failed"
                );
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Deliver one candidate directly. `Ok(false)` when its sender is disabled.
async fn sweep_one(state: &SharedState, submission: &Submission) -> Result<bool, String> {
    if !dispatch::sender_allows(state, submission)
        .await
        .map_err(|e| e.to_string())?
    {
        return Ok(false);
    }

    let payload = dispatch::prepare(submission).map_err(|e| e.to_string())?;
    worker::deliver(state, &payload)
        .await
        .map_err(|e| e.to_string())?;
    db::submissions::mark_sent(&state.pool, submission.id)
        .await
        .map_err(|e| format!("Delivered but not marked sent: {e}"))?;
    Ok(true)
}
