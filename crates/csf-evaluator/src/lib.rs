//! Trait surface for the client's external collaborators (spec.md §1):
//! the Windows Registry reader, the HTML report renderer, the evidence-log
//! writer, and the policy-file parser. None of these are implemented for
//! real here — only their interfaces, an in-memory host that dispatches to
//! a registered implementation, and a deterministic reference evaluator
//! used by tests.
//!
//! Grounded on `mqk-strategy::host::StrategyHost`: exactly one
//! implementation is registered and validated before use, generalized here
//! from one `Strategy` trait to four independent collaborator traits.

use chrono::{DateTime, Utc};
use csf_types::{PolicyRecord, Submission};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("no evaluator registered")]
    NotRegistered,
    #[error("unknown policy id: {0}")]
    UnknownPolicy(String),
    #[error("evaluation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub policy_id: String,
    pub client_id: String,
    pub hostname: String,
    pub scan_timestamp: DateTime<Utc>,
}

/// Produces a fully populated [`Submission`] for one policy evaluation.
/// Consumed read-only by the client pipeline (C2, step 1).
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, req: &EvaluationRequest) -> Result<Submission, EvaluatorError>;
}

/// Writes a local HTML (or other) report for a completed submission.
/// Best-effort: the pipeline logs failures here but never propagates them.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, submission: &Submission, output_path: &str) -> Result<(), EvaluatorError>;
}

/// Appends a durable evidence-log entry for a completed submission.
/// Out of scope for this crate's implementation surface; only the
/// interface is defined, per spec.md §1.
pub trait EvidenceLogWriter: Send + Sync {
    fn append(&self, submission: &Submission) -> Result<(), EvaluatorError>;
}

/// Parses a local policy definition file into a [`PolicyRecord`].
/// Out of scope for this crate's implementation surface; only the
/// interface is defined, per spec.md §1.
pub trait PolicyFileParser: Send + Sync {
    fn parse(&self, path: &str) -> Result<PolicyRecord, EvaluatorError>;
}

/// Holds exactly one registered [`PolicyEvaluator`] and exactly one
/// registered [`ReportRenderer`], validating presence before dispatch.
/// Mirrors `StrategyHost`'s "exactly one strategy" invariant.
pub struct EvaluatorHost {
    evaluator: Option<Box<dyn PolicyEvaluator>>,
    renderer: Option<Box<dyn ReportRenderer>>,
}

impl Default for EvaluatorHost {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorHost {
    pub fn new() -> Self {
        Self {
            evaluator: None,
            renderer: None,
        }
    }

    pub fn register_evaluator(&mut self, evaluator: Box<dyn PolicyEvaluator>) {
        self.evaluator = Some(evaluator);
    }

    pub fn register_renderer(&mut self, renderer: Box<dyn ReportRenderer>) {
        self.renderer = Some(renderer);
    }

    pub fn evaluate(&self, req: &EvaluationRequest) -> Result<Submission, EvaluatorError> {
        self.evaluator
            .as_ref()
            .ok_or(EvaluatorError::NotRegistered)?
            .evaluate(req)
    }

    /// Best-effort render; callers should log-and-continue on error, never
    /// propagate it (spec.md §4.C2 step 2).
    pub fn render(&self, submission: &Submission, output_path: &str) -> Result<(), EvaluatorError> {
        match &self.renderer {
            Some(r) => r.render(submission, output_path),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic reference evaluator (tests only)
// ---------------------------------------------------------------------------

/// A deterministic evaluator used by tests: every check passes unless the
/// policy id contains the literal substring `"fail"`, `"warn"`, or `"error"`,
/// in which case it produces one check of that status. This keeps test
/// fixtures free of any real registry access while still exercising the
/// full aggregate-derivation path in [`csf_types::CheckCounts`].
pub struct ReferenceEvaluator;

impl PolicyEvaluator for ReferenceEvaluator {
    fn evaluate(&self, req: &EvaluationRequest) -> Result<Submission, EvaluatorError> {
        use csf_types::{CheckOutcome, CheckStatus, SystemInfo};

        let status = if req.policy_id.contains("fail") {
            CheckStatus::Fail
        } else if req.policy_id.contains("warn") {
            CheckStatus::Warn
        } else if req.policy_id.contains("error") {
            CheckStatus::Error
        } else {
            CheckStatus::Pass
        };

        let checks = vec![CheckOutcome {
            name: "reference-check".to_string(),
            description: "deterministic reference check".to_string(),
            status,
            expected: "compliant".to_string(),
            actual: format!("{status:?}"),
            message: String::new(),
        }];

        Ok(Submission::new(
            Uuid::new_v4(),
            req.client_id.clone(),
            req.hostname.clone(),
            req.scan_timestamp,
            req.policy_id.clone(),
            "1.0.0".to_string(),
            checks,
            vec![],
            SystemInfo::default(),
        ))
    }
}

/// A renderer that always succeeds without writing anything, used in tests
/// that don't care about report output.
pub struct NullRenderer;

impl ReportRenderer for NullRenderer {
    fn render(&self, _submission: &Submission, _output_path: &str) -> Result<(), EvaluatorError> {
        Ok(())
    }
}
