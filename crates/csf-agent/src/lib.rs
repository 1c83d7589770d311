//! The client: C1 scheduler + C2 submission pipeline.
//!
//! Grounded on `mqk-daemon/src/main.rs`'s tracing-init / shared-state /
//! signal-handling wiring (generalized from an `Arc<AppState>` web server to
//! a scheduler loop with no HTTP surface of its own) and `mqk-cli`'s
//! command-to-engine dispatch shape.

pub mod delivery;
pub mod pipeline;
pub mod scheduler;

use std::sync::Arc;

use csf_config::ClientConfig;
use csf_evaluator::EvaluatorHost;
use csf_outbox::Outbox;
use tokio_util::sync::CancellationToken;

pub use delivery::DeliveryTarget;
pub use pipeline::{Pipeline, PipelineError};
pub use scheduler::{Mode, ScheduleError};

/// Build the running pieces (outbox, delivery target, pipeline, mode) from
/// a loaded [`ClientConfig`] and a caller-supplied evaluator host. The
/// evaluator host is constructed by the caller because the real registry
/// reader/policy parser are out of scope (spec.md §1) — callers register
/// whatever `PolicyEvaluator`/`ReportRenderer` their deployment needs.
pub struct Agent {
    pub config: ClientConfig,
    pub pipeline: Pipeline,
    pub mode: Mode,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentBuildError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("failed to open outbox directory: {0}")]
    Outbox(#[from] csf_outbox::OutboxError),
}

impl Agent {
    pub fn build(config: ClientConfig, evaluator: Arc<EvaluatorHost>) -> Result<Self, AgentBuildError> {
        let outbox = Arc::new(Outbox::new(&config.cache.path)?);

        let delivery = config.server.is_configured().then(|| {
            DeliveryTarget::new(
                config.server.url.clone().unwrap_or_default(),
                config.server.api_key.clone(),
                config.server.timeout,
            )
        });

        let retry_config = csf_retry::RetryConfig {
            max_attempts: config.retry.max_attempts,
            initial_backoff: config.retry.initial_backoff,
            max_backoff: config.retry.max_backoff,
            multiplier: config.retry.multiplier,
            retry_on_server_error: config.retry.retry_on_server_error,
        };

        let pipeline = Pipeline {
            client_id: config.client.id.clone().unwrap_or_else(|| "unknown-client".to_string()),
            hostname: config.client.hostname.clone().unwrap_or_else(default_hostname),
            evaluator,
            outbox,
            retry_config,
            delivery,
            report_output_dir: config.reports.save_local.then(|| config.reports.output_path.clone()),
        };

        let mode = if config.schedule.enabled {
            Mode::scheduled(&config.schedule.cron)?
        } else {
            Mode::OneShot
        };

        Ok(Self { config, pipeline, mode })
    }

    /// Run every configured policy once, in sequence. A failing policy
    /// does not abort the batch (spec.md §4.C1).
    pub async fn fire_once(&self, cancel: &CancellationToken) {
        for policy_id in &self.config.reports.policy_ids {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.pipeline.run(cancel, policy_id).await {
                tracing::error!(policy_id, error = %e, "policy evaluation failed; continuing batch");
            }
        }
    }

    /// Drive the agent to completion: drain the outbox once, then either
    /// fire once (`Mode::OneShot`) or loop on the cron schedule until
    /// `cancel` fires (`Mode::Scheduled`).
    pub async fn run(&self, cancel: &CancellationToken) {
        self.pipeline.drain_outbox(cancel).await;

        if cancel.is_cancelled() {
            return;
        }

        match &self.mode {
            Mode::OneShot => {
                if self.config.schedule.run_on_startup || !self.config.schedule.enabled {
                    self.fire_once(cancel).await;
                }
            }
            Mode::Scheduled(schedule) => {
                if self.config.schedule.run_on_startup {
                    self.fire_once(cancel).await;
                }
                scheduler::run_scheduled(cancel, schedule, || self.fire_once(cancel)).await;
            }
        }
    }
}

fn default_hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use csf_config::*;
    use csf_evaluator::ReferenceEvaluator;
    use std::time::Duration;

    fn base_config(dir: &std::path::Path) -> ClientConfig {
        ClientConfig {
            client: ClientIdentity {
                id: Some("client-1".into()),
                hostname: Some("HOST-1".into()),
                enabled: true,
            },
            server: ServerEndpoint::default(),
            reports: ReportsConfig {
                config_path: "policies/".into(),
                output_path: "reports/".into(),
                save_local: false,
                policy_ids: vec!["baseline".into()],
            },
            schedule: ScheduleConfig {
                enabled: false,
                cron: "*/5 * * * *".into(),
                run_on_startup: false,
            },
            retry: csf_config::RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
                retry_on_server_error: true,
            },
            cache: CacheConfig {
                enabled: true,
                path: dir.to_string_lossy().to_string(),
                max_size_mb: 50,
                max_age: Duration::from_secs(3600),
                auto_clean: true,
            },
            logging: LoggingConfig::default(),
        }
    }

    #[tokio::test]
    async fn one_shot_agent_runs_configured_policies_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = EvaluatorHost::new();
        host.register_evaluator(Box::new(ReferenceEvaluator));

        let agent = Agent::build(base_config(dir.path()), Arc::new(host)).unwrap();
        let cancel = CancellationToken::new();

        agent.run(&cancel).await;
        // Local-only mode: nothing lands in the outbox, nothing delivered.
        assert!(agent.pipeline.outbox.list().unwrap().is_empty());
    }

    #[test]
    fn malformed_schedule_cron_is_rejected_at_build_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = base_config(dir.path());
        cfg.schedule.enabled = true;
        cfg.schedule.cron = "garbage".into();

        let mut host = EvaluatorHost::new();
        host.register_evaluator(Box::new(ReferenceEvaluator));

        let err = Agent::build(cfg, Arc::new(host)).unwrap_err();
        assert!(matches!(err, AgentBuildError::Schedule(_)));
    }
}
