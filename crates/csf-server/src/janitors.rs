//! Three independent periodic sweeps, each cancellable by the same
//! shutdown token as the HTTP accept loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use csf_db::Repository;
use tokio_util::sync::CancellationToken;

const HOURLY: Duration = Duration::from_secs(3600);
const DAILY: Duration = Duration::from_secs(86400);
const AUDIT_RETENTION_DAYS: i64 = 90;

/// Spawn all three janitors. Returns immediately; each sweep runs in its
/// own `tokio::spawn`ed task until `cancel` fires.
pub fn spawn_all(repo: Arc<dyn Repository>, cancel: CancellationToken) {
    spawn_refresh_token_sweep(repo.clone(), cancel.clone());
    spawn_revocation_sweep(repo.clone(), cancel.clone());
    spawn_audit_log_sweep(repo, cancel);
}

fn spawn_refresh_token_sweep(repo: Arc<dyn Repository>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOURLY);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match repo.sweep_expired_refresh_tokens(Utc::now()).await {
                Ok(n) => tracing::info!(deleted = n, "expired refresh-token sweep"),
                Err(e) => tracing::error!(error = %e, "expired refresh-token sweep failed"),
            }
        }
    });
}

fn spawn_revocation_sweep(repo: Arc<dyn Repository>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOURLY);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match repo.sweep_revocations(Utc::now()).await {
                Ok(n) => tracing::info!(deleted = n, "revocation-list sweep"),
                Err(e) => tracing::error!(error = %e, "revocation-list sweep failed"),
            }
        }
    });
}

fn spawn_audit_log_sweep(repo: Arc<dyn Repository>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DAILY);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let cutoff = Utc::now() - chrono::Duration::days(AUDIT_RETENTION_DAYS);
            match repo.sweep_audit_log(cutoff).await {
                Ok(n) => tracing::info!(deleted = n, "audit-log sweep"),
                Err(e) => tracing::error!(error = %e, "audit-log sweep failed"),
            }
        }
    });
}
