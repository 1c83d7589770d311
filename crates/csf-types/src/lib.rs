//! Wire and domain types shared by the client (`csf-agent`) and server
//! (`csf-server`). Everything here is data-only: `Serialize`/`Deserialize`
//! structs and enums, plus the handful of pure derivations spec.md §3
//! pins down (aggregate-result arithmetic, submission invariants).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Outcome of a single policy check within a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: String,
    pub description: String,
    pub status: CheckStatus,
    pub expected: String,
    pub actual: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Error,
}

/// One evidence record: a read action taken against the endpoint while
/// evaluating a check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceRecord {
    pub check_name: String,
    pub action: String,
    pub location: String,
    pub duration_ms: u64,
    pub outcome: String,
}

/// System descriptor captured at scan time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SystemInfo {
    pub os_id: String,
    pub os_build: String,
    pub arch: String,
    pub domain: String,
    pub primary_ipv4: String,
    pub primary_mac: String,
}

/// The derived overall verdict of a submission.
///
/// Derivation is deterministic and pinned down in `CheckCounts::aggregate`:
/// `compliant` iff no failures and no errors, `error` iff any error,
/// `partial` iff only warnings remain, else `non_compliant`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateResult {
    Compliant,
    NonCompliant,
    Partial,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CheckCounts {
    pub passed: u32,
    pub failed: u32,
    pub warn: u32,
    pub error: u32,
}

impl CheckCounts {
    pub fn from_checks(checks: &[CheckOutcome]) -> Self {
        let mut counts = CheckCounts::default();
        for c in checks {
            match c.status {
                CheckStatus::Pass => counts.passed += 1,
                CheckStatus::Fail => counts.failed += 1,
                CheckStatus::Warn => counts.warn += 1,
                CheckStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.warn + self.error
    }

    /// Deterministic derivation of the aggregate result from counts.
    ///
    /// `compliant` iff `failed == 0 && error == 0`; `error` iff `error > 0`;
    /// otherwise `non_compliant` if any check failed, else `partial` (only
    /// warnings present). See spec.md §9's Open Question on `partial`.
    pub fn aggregate(&self) -> AggregateResult {
        if self.error > 0 {
            AggregateResult::Error
        } else if self.failed > 0 {
            AggregateResult::NonCompliant
        } else if self.warn > 0 {
            AggregateResult::Partial
        } else {
            AggregateResult::Compliant
        }
    }
}

/// One complete compliance scan result from one client at one point in
/// time. Immutable once constructed; the submission identifier is the only
/// cross-boundary reference between the outbox and the server store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub submission_id: Uuid,
    pub client_id: String,
    pub hostname: String,
    pub scan_timestamp: DateTime<Utc>,
    pub policy_id: String,
    pub policy_version: String,
    pub aggregate_result: AggregateResult,
    pub checks: Vec<CheckOutcome>,
    pub evidence: Vec<EvidenceRecord>,
    pub system_info: SystemInfo,
}

impl Submission {
    /// Build a submission from a completed set of checks/evidence, deriving
    /// `aggregate_result` from the check counts rather than accepting it as
    /// an independent field — this is what keeps the
    /// `total = passed + failed + warn + error` invariant unconditionally
    /// true.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        submission_id: Uuid,
        client_id: impl Into<String>,
        hostname: impl Into<String>,
        scan_timestamp: DateTime<Utc>,
        policy_id: impl Into<String>,
        policy_version: impl Into<String>,
        checks: Vec<CheckOutcome>,
        evidence: Vec<EvidenceRecord>,
        system_info: SystemInfo,
    ) -> Self {
        let aggregate_result = CheckCounts::from_checks(&checks).aggregate();
        Self {
            submission_id,
            client_id: client_id.into(),
            hostname: hostname.into(),
            scan_timestamp,
            policy_id: policy_id.into(),
            policy_version: policy_version.into(),
            aggregate_result,
            checks,
            evidence,
            system_info,
        }
    }

    pub fn counts(&self) -> CheckCounts {
        CheckCounts::from_checks(&self.checks)
    }
}

// ---------------------------------------------------------------------------
// Client record / summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Inactive,
}

/// Server-side projection of a client's most recent liveness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub client_id: String,
    pub hostname: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_system_info: SystemInfo,
    pub status: ClientStatus,
    /// Percentage (0.0..=100.0) of historical submissions with a `compliant`
    /// aggregate result. Zero for clients with no submissions.
    pub compliance_score: f64,
}

/// Lightweight projection of a submission, used in history/list views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionSummary {
    pub submission_id: Uuid,
    pub client_id: String,
    pub hostname: String,
    pub scan_timestamp: DateTime<Utc>,
    pub policy_id: String,
    pub policy_version: String,
    pub aggregate_result: AggregateResult,
    pub counts: CheckCounts,
}

impl From<&Submission> for SubmissionSummary {
    fn from(s: &Submission) -> Self {
        Self {
            submission_id: s.submission_id,
            client_id: s.client_id.clone(),
            hostname: s.hostname.clone(),
            scan_timestamp: s.scan_timestamp,
            policy_id: s.policy_id.clone(),
            policy_version: s.policy_version.clone(),
            aggregate_result: s.aggregate_result,
            counts: s.counts(),
        }
    }
}

/// Per-policy statistics surfaced on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyStats {
    pub policy_id: String,
    pub total_submissions: u64,
    pub mean_score: f64,
    pub pass_rate: f64,
    pub fail_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSummary {
    pub total_clients: u64,
    pub active_clients: u64,
    pub compliant_clients: u64,
    pub recent_submissions: Vec<SubmissionSummary>,
    pub policy_stats: Vec<PolicyStats>,
}

// ---------------------------------------------------------------------------
// Policy records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Inactive,
    Draft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRecord {
    pub policy_id: String,
    pub name: String,
    pub framework: String,
    pub version: String,
    pub author: String,
    pub status: PolicyStatus,
    /// Opaque evaluator payload; immutable per version.
    pub evaluator_payload: Value,
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Viewer,
    Auditor,
}

/// Runtime identity attached to an authenticated request. Never persisted
/// as a whole; derived from request credentials on each call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    MachineKey {
        key_id: i64,
        name: String,
    },
    UserToken {
        subject: String,
        role: UserRole,
        token_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl Principal {
    pub fn role(&self) -> Option<UserRole> {
        match self {
            Principal::UserToken { role, .. } => Some(*role),
            Principal::MachineKey { .. } => None,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Principal::MachineKey { name, .. } => name,
            Principal::UserToken { subject, .. } => subject,
        }
    }
}

// ---------------------------------------------------------------------------
// Auth records — persisted shapes shared between csf-auth and csf-db.
// ---------------------------------------------------------------------------

/// A machine key as stored server-side. The plain key is never stored; only
/// its bcrypt hash and an 8-character display prefix survive creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineKeyRecord {
    pub id: i64,
    pub name: String,
    pub bcrypt_hash: String,
    pub display_prefix: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl MachineKeyRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// A user account. `token_generation` increments on global logout,
/// invalidating every outstanding access/refresh token signed against the
/// previous generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub bcrypt_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub token_generation: i64,
}

/// One link in a refresh-token rotation chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    pub token_id: Uuid,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub replaced_by: Option<Uuid>,
}

/// A revoked access-token id, kept until its original expiry passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationEntry {
    pub token_id: Uuid,
    pub original_expires_at: DateTime<Utc>,
}

/// One authentication attempt, successful or not, for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub principal_attempt: String,
    pub reason: String,
    pub remote_addr: String,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Wire bodies (§6) — one struct per route, teacher's api_types.rs style.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: Uuid,
    pub status: &'static str,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub client_id: String,
    pub hostname: String,
    pub system_info: SystemInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearHistoryResponse {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub principal: Principal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateApiKeyRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateApiKeyResponse {
    pub id: i64,
    /// Plain key text. Returned exactly once, at creation.
    pub plain_key: String,
    pub display_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: i64,
    pub name: String,
    pub display_prefix: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleApiKeyRequest {
    pub id: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteApiKeyRequest {
    pub id: i64,
}

/// Stable error envelope for every non-2xx JSON response, so callers branch
/// on `kind` rather than matching `message` text (spec.md §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Conflict,
    NotFound,
    Transient,
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: CheckStatus) -> CheckOutcome {
        CheckOutcome {
            name: "n".into(),
            description: "d".into(),
            status,
            expected: "e".into(),
            actual: "a".into(),
            message: "m".into(),
        }
    }

    #[test]
    fn aggregate_is_compliant_when_all_pass() {
        let counts = CheckCounts::from_checks(&[check(CheckStatus::Pass), check(CheckStatus::Pass)]);
        assert_eq!(counts.aggregate(), AggregateResult::Compliant);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn aggregate_is_error_when_any_error_present() {
        let counts = CheckCounts::from_checks(&[check(CheckStatus::Fail), check(CheckStatus::Error)]);
        assert_eq!(counts.aggregate(), AggregateResult::Error);
    }

    #[test]
    fn aggregate_is_non_compliant_when_failed_without_error() {
        let counts = CheckCounts::from_checks(&[check(CheckStatus::Fail), check(CheckStatus::Warn)]);
        assert_eq!(counts.aggregate(), AggregateResult::NonCompliant);
    }

    #[test]
    fn aggregate_is_partial_with_only_warnings() {
        let counts = CheckCounts::from_checks(&[check(CheckStatus::Pass), check(CheckStatus::Warn)]);
        assert_eq!(counts.aggregate(), AggregateResult::Partial);
    }

    #[test]
    fn submission_new_derives_aggregate_from_checks() {
        let s = Submission::new(
            Uuid::new_v4(),
            "client-1",
            "host-1",
            Utc::now(),
            "policy-1",
            "1.0.0",
            vec![check(CheckStatus::Fail)],
            vec![],
            SystemInfo::default(),
        );
        assert_eq!(s.aggregate_result, AggregateResult::NonCompliant);
        let counts = s.counts();
        assert_eq!(counts.total(), counts.passed + counts.failed + counts.warn + counts.error);
    }

    #[test]
    fn machine_key_with_no_expiry_is_usable_while_active() {
        let key = MachineKeyRecord {
            id: 1,
            name: "n".into(),
            bcrypt_hash: "h".into(),
            display_prefix: "abcd1234".into(),
            created_by: "admin".into(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            active: true,
        };
        assert!(key.is_usable(Utc::now()));
    }

    #[test]
    fn machine_key_past_expiry_is_not_usable() {
        let now = Utc::now();
        let key = MachineKeyRecord {
            id: 1,
            name: "n".into(),
            bcrypt_hash: "h".into(),
            display_prefix: "abcd1234".into(),
            created_by: "admin".into(),
            created_at: now,
            last_used_at: None,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            active: true,
        };
        assert!(!key.is_usable(now));
    }

    #[test]
    fn submission_serialization_round_trips() {
        let s = Submission::new(
            Uuid::new_v4(),
            "client-1",
            "host-1",
            Utc::now(),
            "policy-1",
            "1.0.0",
            vec![check(CheckStatus::Pass), check(CheckStatus::Warn)],
            vec![EvidenceRecord {
                check_name: "n".into(),
                action: "read_key".into(),
                location: "HKLM\\x".into(),
                duration_ms: 12,
                outcome: "ok".into(),
            }],
            SystemInfo {
                os_id: "windows".into(),
                os_build: "19045".into(),
                arch: "x86_64".into(),
                domain: "CORP".into(),
                primary_ipv4: "10.0.0.5".into(),
                primary_mac: "aa:bb:cc:dd:ee:ff".into(),
            },
        );
        let json = serde_json::to_string(&s).unwrap();
        let back: Submission = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
