//! C2 — submission pipeline: turns a policy identifier into a persisted
//! outcome (server acknowledgement or outbox entry).
//!
//! Contract per spec.md §4.C2: the pipeline returns failure only if the
//! external policy evaluator itself fails to produce a [`Submission`];
//! delivery failure is never reported upward — the outbox is the recovery
//! mechanism.

use std::sync::Arc;

use chrono::Utc;
use csf_evaluator::{EvaluationRequest, EvaluatorError, EvaluatorHost};
use csf_outbox::{Outbox, OutboxError};
use csf_retry::{RetryConfig, RetryOutcome};
use csf_types::Submission;
use tokio_util::sync::CancellationToken;

use crate::delivery::{self, DeliveryTarget};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("policy evaluator failed: {0}")]
    Evaluation(#[from] EvaluatorError),
}

pub struct Pipeline {
    pub client_id: String,
    pub hostname: String,
    pub evaluator: Arc<EvaluatorHost>,
    pub outbox: Arc<Outbox>,
    pub retry_config: RetryConfig,
    /// `None` forces local-only operation: an empty `server.url` in
    /// configuration (spec.md §6) means the outbox is never drained
    /// against a live server.
    pub delivery: Option<DeliveryTarget>,
    pub report_output_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub inspected: usize,
    pub delivered: usize,
    pub still_pending: usize,
}

impl Pipeline {
    /// Run one policy to completion.
    ///
    /// 1. Ask the evaluator for a completed submission.
    /// 2. Best-effort local report render (failure is logged, not
    ///    propagated).
    /// 3. Attempt delivery if a server endpoint is configured; on final
    ///    failure, persist to the outbox. If no endpoint is configured,
    ///    this step is skipped entirely (the submission is simply not
    ///    delivered or stored — local-only mode never uses the outbox).
    pub async fn run(&self, cancel: &CancellationToken, policy_id: &str) -> Result<(), PipelineError> {
        let req = EvaluationRequest {
            policy_id: policy_id.to_string(),
            client_id: self.client_id.clone(),
            hostname: self.hostname.clone(),
            scan_timestamp: Utc::now(),
        };
        let submission = self.evaluator.evaluate(&req)?;

        if let Some(dir) = &self.report_output_dir {
            let output_path = format!("{}/{}.html", dir.trim_end_matches('/'), submission.submission_id);
            if let Err(e) = self.evaluator.render(&submission, &output_path) {
                tracing::warn!(policy_id, error = %e, "report rendering failed; continuing");
            }
        }

        self.deliver_or_store(cancel, submission).await;
        Ok(())
    }

    async fn deliver_or_store(&self, cancel: &CancellationToken, submission: Submission) {
        let Some(target) = &self.delivery else {
            return;
        };

        match delivery::deliver(cancel, &self.retry_config, target, &submission).await {
            RetryOutcome::Delivered { .. } => {
                tracing::info!(submission_id = %submission.submission_id, "submission delivered");
            }
            RetryOutcome::Failed { .. } | RetryOutcome::Cancelled { .. } => {
                if let Err(e) = self.store_in_outbox(&submission) {
                    tracing::error!(submission_id = %submission.submission_id, error = %e, "failed to persist to outbox");
                }
            }
        }
    }

    fn store_in_outbox(&self, submission: &Submission) -> Result<(), OutboxError> {
        self.outbox.store(submission)
    }

    /// Startup drain (spec.md §4.C2): list the outbox, attempt delivery of
    /// each entry in scan-timestamp order, remove each acknowledged entry.
    /// Unacknowledged entries remain for the next drain. A no-op in
    /// local-only mode.
    pub async fn drain_outbox(&self, cancel: &CancellationToken) -> DrainReport {
        let mut report = DrainReport::default();
        let Some(target) = &self.delivery else {
            return report;
        };

        let mut entries = match self.outbox.list() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "failed to list outbox for startup drain");
                return report;
            }
        };
        entries.sort_by_key(|s| s.scan_timestamp);

        for submission in entries {
            report.inspected += 1;
            match delivery::deliver(cancel, &self.retry_config, target, &submission).await {
                RetryOutcome::Delivered { .. } => match self.outbox.remove(submission.submission_id) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        tracing::error!(submission_id = %submission.submission_id, error = %e, "failed to remove drained entry");
                    }
                },
                RetryOutcome::Failed { .. } | RetryOutcome::Cancelled { .. } => {
                    report.still_pending += 1;
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        tracing::info!(
            inspected = report.inspected,
            delivered = report.delivered,
            still_pending = report.still_pending,
            "startup drain complete"
        );
        report
    }
}
