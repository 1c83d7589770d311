//! C1 — scheduler & trigger loop.
//!
//! Translates a declarative trigger spec into timed calls into the
//! submission pipeline (C2). Grounded on `mqk-daemon::state::spawn_heartbeat`'s
//! ticker shape, generalized from a fixed interval to a `cron::Schedule`
//! (spec.md §9's `Mode = OneShot | Scheduled{cron}` sum type).

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("malformed cron expression: {0}")]
    InvalidCron(#[from] cron::error::Error),
}

/// One of the two operation modes spec.md §4.C1 describes. A malformed
/// cron expression at startup is fatal (spec.md: "reported via exit
/// status"), so parsing happens eagerly at construction, not on first fire.
pub enum Mode {
    OneShot,
    Scheduled(cron::Schedule),
}

impl Mode {
    /// Parse the 5-field (minute hour day-of-month month day-of-week) cron
    /// expression spec.md's configuration surface uses. The `cron` crate
    /// parses 6/7-field expressions with a leading seconds field, so a
    /// literal `0` is prefixed before delegating.
    pub fn scheduled(five_field_cron: &str) -> Result<Mode, ScheduleError> {
        let six_field = format!("0 {five_field_cron}");
        Ok(Mode::Scheduled(cron::Schedule::from_str(&six_field)?))
    }
}

/// Run `fire` once per scheduled trigger until `cancel` fires. On
/// cancellation the loop stops accepting new fires and returns as soon as
/// the current sleep (or the in-flight `fire`, which the caller lets run
/// to completion) unwinds — spec.md §4.C1's shutdown contract.
pub async fn run_scheduled<F, Fut>(cancel: &CancellationToken, schedule: &cron::Schedule, mut fire: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::warn!("cron schedule has no further occurrences; scheduler loop exiting");
            return;
        };
        let sleep_for = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = cancel.cancelled() => return,
        }

        if cancel.is_cancelled() {
            return;
        }

        fire().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn malformed_cron_expression_is_rejected_at_construction() {
        let err = Mode::scheduled("not a cron expression").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron(_)));
    }

    #[test]
    fn well_formed_five_field_cron_parses() {
        assert!(Mode::scheduled("*/5 * * * *").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_loop_fires_once_per_matching_minute() {
        let Mode::Scheduled(schedule) = Mode::scheduled("* * * * *").unwrap() else {
            unreachable!()
        };
        let cancel = CancellationToken::new();
        let fires = Arc::new(AtomicU32::new(0));

        let fires_clone = fires.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            run_scheduled(&cancel_clone, &schedule, || {
                let fires = fires_clone.clone();
                async move {
                    fires.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::advance(Duration::from_secs(130)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(fires.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancellation_before_first_fire_prevents_any_fire() {
        let Mode::Scheduled(schedule) = Mode::scheduled("* * * * *").unwrap() else {
            unreachable!()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fires = Arc::new(AtomicU32::new(0));

        let fires_clone = fires.clone();
        run_scheduled(&cancel, &schedule, || {
            let fires = fires_clone.clone();
            async move {
                fires.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }
}
