//! In-memory double for [`csf_db::Repository`] (itself an extension of
//! [`csf_auth::AuthRepository`]), so `csf-server`'s router can be exercised
//! in-process without a live Postgres instance.
//!
//! Grounded on `mqk-testkit::recovery::FakeBroker`'s shape (plain `Mutex`-
//! guarded collections, no actual I/O) and on `csf-auth`'s own `FakeRepo`
//! test double, generalized to cover the C7/C8/C6/C9 surface `csf-db`
//! exposes via `Repository`.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csf_auth::{AuthRepository, AuthRepositoryError};
use csf_db::StoreError;
use csf_types::{
    AuditEvent, ClientInfo, ClientStatus, DashboardSummary, MachineKeyRecord, PolicyStats,
    RefreshTokenRecord, RevocationEntry, Submission, SubmissionSummary, SystemInfo, UserRecord,
    UserRole,
};
use uuid::Uuid;

#[derive(Default)]
pub struct FakeRepository {
    submissions: Mutex<Vec<Submission>>,
    clients: Mutex<Vec<ClientInfo>>,
    users: Mutex<Vec<UserRecord>>,
    machine_keys: Mutex<Vec<MachineKeyRecord>>,
    next_machine_key_id: Mutex<i64>,
    refresh_tokens: Mutex<Vec<RefreshTokenRecord>>,
    revocations: Mutex<Vec<RevocationEntry>>,
    audit_events: Mutex<Vec<AuditEvent>>,
    next_audit_id: Mutex<i64>,
    fail_ping: Mutex<bool>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user directly, bypassing `create_user`, for tests that need a
    /// known bcrypt hash or role up front.
    pub fn seed_user(&self, user: UserRecord) {
        self.users.lock().unwrap().push(user);
    }

    pub fn seed_machine_key(&self, key: MachineKeyRecord) {
        self.machine_keys.lock().unwrap().push(key);
    }

    /// Make the next `ping` (and therefore `/api/v1/health`) report failure,
    /// simulating a store outage.
    pub fn set_healthy(&self, healthy: bool) {
        *self.fail_ping.lock().unwrap() = !healthy;
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit_events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthRepository for FakeRepository {
    async fn active_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, AuthRepositoryError> {
        Ok(self.machine_keys.lock().unwrap().iter().filter(|k| k.active).cloned().collect())
    }

    async fn touch_machine_key(&self, id: i64, now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
        if let Some(k) = self.machine_keys.lock().unwrap().iter_mut().find(|k| k.id == id) {
            k.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, AuthRepositoryError> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.username == username).cloned())
    }

    async fn touch_last_login(&self, username: &str, now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
        if let Some(u) = self.users.lock().unwrap().iter_mut().find(|u| u.username == username) {
            u.last_login = Some(now);
        }
        Ok(())
    }

    async fn bump_token_generation(&self, username: &str) -> Result<(), AuthRepositoryError> {
        if let Some(u) = self.users.lock().unwrap().iter_mut().find(|u| u.username == username) {
            u.token_generation += 1;
        }
        Ok(())
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), AuthRepositoryError> {
        self.refresh_tokens.lock().unwrap().push(record);
        Ok(())
    }

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AuthRepositoryError> {
        Ok(self.refresh_tokens.lock().unwrap().iter().find(|t| t.token_id == token_id).cloned())
    }

    async fn revoke_refresh_token(&self, token_id: Uuid, replaced_by: Option<Uuid>) -> Result<(), AuthRepositoryError> {
        if let Some(t) = self.refresh_tokens.lock().unwrap().iter_mut().find(|t| t.token_id == token_id) {
            t.revoked = true;
            t.replaced_by = replaced_by;
        }
        Ok(())
    }

    async fn revoke_chain_from(&self, token_id: Uuid) -> Result<(), AuthRepositoryError> {
        let mut tokens = self.refresh_tokens.lock().unwrap();
        let mut cursor = Some(token_id);
        while let Some(id) = cursor {
            let next = tokens.iter().find(|t| t.token_id == id).and_then(|t| t.replaced_by);
            if let Some(t) = tokens.iter_mut().find(|t| t.token_id == id) {
                t.revoked = true;
            }
            cursor = next;
        }
        Ok(())
    }

    async fn insert_revocation(&self, entry: RevocationEntry) -> Result<(), AuthRepositoryError> {
        self.revocations.lock().unwrap().push(entry);
        Ok(())
    }

    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, AuthRepositoryError> {
        Ok(self.revocations.lock().unwrap().iter().any(|r| r.token_id == token_id))
    }
}

#[async_trait]
impl csf_db::Repository for FakeRepository {
    async fn ping(&self) -> Result<(), StoreError> {
        if *self.fail_ping.lock().unwrap() {
            return Err(StoreError::Sqlx(sqlx_unavailable()));
        }
        Ok(())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        {
            let submissions = self.submissions.lock().unwrap();
            if submissions.iter().any(|s| s.submission_id == submission.submission_id) {
                return Err(StoreError::DuplicateSubmission);
            }
        }
        self.submissions.lock().unwrap().push(submission.clone());
        self.upsert_client_liveness(&submission.client_id, &submission.hostname, &submission.system_info, submission.scan_timestamp)
            .await
    }

    async fn upsert_client_liveness(
        &self,
        client_id: &str,
        hostname: &str,
        system_info: &SystemInfo,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut clients = self.clients.lock().unwrap();
        if let Some(c) = clients.iter_mut().find(|c| c.client_id == client_id) {
            c.hostname = hostname.to_string();
            c.last_seen = now;
            c.last_system_info = system_info.clone();
            c.status = ClientStatus::Active;
        } else {
            clients.push(ClientInfo {
                client_id: client_id.to_string(),
                hostname: hostname.to_string(),
                first_seen: now,
                last_seen: now,
                last_system_info: system_info.clone(),
                status: ClientStatus::Active,
                compliance_score: 0.0,
            });
        }
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.lock().unwrap().iter().find(|s| s.submission_id == id).cloned())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientInfo>, StoreError> {
        Ok(self.clients.lock().unwrap().iter().find(|c| c.client_id == client_id).cloned().map(|mut c| {
            c.compliance_score = self.compliance_score_for(client_id);
            c
        }))
    }

    async fn list_client_submissions(&self, client_id: &str) -> Result<Vec<SubmissionSummary>, StoreError> {
        let mut out: Vec<SubmissionSummary> = self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.client_id == client_id)
            .map(SubmissionSummary::from)
            .collect();
        out.sort_by(|a, b| b.scan_timestamp.cmp(&a.scan_timestamp));
        Ok(out)
    }

    async fn list_clients(&self) -> Result<Vec<ClientInfo>, StoreError> {
        let clients = self.clients.lock().unwrap().clone();
        Ok(clients
            .into_iter()
            .map(|mut c| {
                c.compliance_score = self.compliance_score_for(&c.client_id);
                c
            })
            .collect())
    }

    async fn dashboard_summary(&self) -> Result<DashboardSummary, StoreError> {
        let clients = self.clients.lock().unwrap().clone();
        let submissions = self.submissions.lock().unwrap().clone();

        let total_clients = clients.len() as u64;
        let active_clients = clients.iter().filter(|c| c.status == ClientStatus::Active).count() as u64;

        let compliant_clients = clients
            .iter()
            .filter(|c| self.latest_is_compliant(&c.client_id))
            .count() as u64;

        let mut recent: Vec<SubmissionSummary> = submissions.iter().map(SubmissionSummary::from).collect();
        recent.sort_by(|a, b| b.scan_timestamp.cmp(&a.scan_timestamp));
        recent.truncate(10);

        let mut by_policy: std::collections::BTreeMap<String, (u64, u64, u64, f64, u64)> = Default::default();
        for s in &submissions {
            let entry = by_policy.entry(s.policy_id.clone()).or_insert((0, 0, 0, 0.0, 0));
            entry.0 += 1;
            let counts = s.counts();
            match s.aggregate_result {
                csf_types::AggregateResult::Compliant => entry.1 += 1,
                csf_types::AggregateResult::NonCompliant | csf_types::AggregateResult::Error => entry.2 += 1,
                csf_types::AggregateResult::Partial => {}
            }
            let total = counts.total();
            if total > 0 {
                entry.3 += 100.0 * counts.passed as f64 / total as f64;
                entry.4 += 1;
            }
        }
        let policy_stats = by_policy
            .into_iter()
            .map(|(policy_id, (total, passed, failed, score_sum, scored))| PolicyStats {
                policy_id,
                total_submissions: total,
                mean_score: if scored == 0 { 0.0 } else { score_sum / scored as f64 },
                pass_rate: if total == 0 { 0.0 } else { 100.0 * passed as f64 / total as f64 },
                fail_rate: if total == 0 { 0.0 } else { 100.0 * failed as f64 / total as f64 },
            })
            .collect();

        Ok(DashboardSummary { total_clients, active_clients, compliant_clients, recent_submissions: recent, policy_stats })
    }

    async fn clear_client_history(&self, client_id: &str) -> Result<u64, StoreError> {
        let mut submissions = self.submissions.lock().unwrap();
        let before = submissions.len();
        submissions.retain(|s| s.client_id != client_id);
        Ok((before - submissions.len()) as u64)
    }

    async fn list_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, StoreError> {
        Ok(self.machine_keys.lock().unwrap().clone())
    }

    async fn create_machine_key(
        &self,
        name: &str,
        bcrypt_hash: &str,
        display_prefix: &str,
        created_by: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        let mut next_id = self.next_machine_key_id.lock().unwrap();
        *next_id += 1;
        let id = *next_id;
        self.machine_keys.lock().unwrap().push(MachineKeyRecord {
            id,
            name: name.to_string(),
            bcrypt_hash: bcrypt_hash.to_string(),
            display_prefix: display_prefix.to_string(),
            created_by: created_by.to_string(),
            created_at,
            last_used_at: None,
            expires_at,
            active: true,
        });
        Ok(id)
    }

    async fn set_machine_key_active(&self, id: i64, active: bool) -> Result<(), StoreError> {
        let mut keys = self.machine_keys.lock().unwrap();
        let key = keys.iter_mut().find(|k| k.id == id).ok_or(StoreError::NotFound)?;
        key.active = active;
        Ok(())
    }

    async fn delete_machine_key(&self, id: i64) -> Result<(), StoreError> {
        let mut keys = self.machine_keys.lock().unwrap();
        let before = keys.len();
        keys.retain(|k| k.id != id);
        if keys.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn sweep_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = self.refresh_tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }

    async fn sweep_revocations(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut revocations = self.revocations.lock().unwrap();
        let before = revocations.len();
        revocations.retain(|r| r.original_expires_at >= now);
        Ok((before - revocations.len()) as u64)
    }

    async fn sweep_audit_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut events = self.audit_events.lock().unwrap();
        let before = events.len();
        events.retain(|e| e.occurred_at >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn insert_audit_event(
        &self,
        principal_attempt: &str,
        reason: &str,
        remote_addr: &str,
        success: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut next_id = self.next_audit_id.lock().unwrap();
        *next_id += 1;
        self.audit_events.lock().unwrap().push(AuditEvent {
            id: *next_id,
            occurred_at,
            principal_attempt: principal_attempt.to_string(),
            reason: reason.to_string(),
            remote_addr: remote_addr.to_string(),
            success,
        });
        Ok(())
    }

    async fn user_count(&self) -> Result<i64, StoreError> {
        Ok(self.users.lock().unwrap().len() as i64)
    }

    async fn create_user(&self, username: &str, bcrypt_hash: &str, role: UserRole) -> Result<(), StoreError> {
        self.users.lock().unwrap().push(UserRecord {
            username: username.to_string(),
            bcrypt_hash: bcrypt_hash.to_string(),
            role,
            created_at: Utc::now(),
            last_login: None,
            token_generation: 0,
        });
        Ok(())
    }
}

impl FakeRepository {
    fn compliance_score_for(&self, client_id: &str) -> f64 {
        let submissions = self.submissions.lock().unwrap();
        let for_client: Vec<&Submission> = submissions.iter().filter(|s| s.client_id == client_id).collect();
        if for_client.is_empty() {
            return 0.0;
        }
        let compliant = for_client.iter().filter(|s| s.aggregate_result == csf_types::AggregateResult::Compliant).count();
        100.0 * compliant as f64 / for_client.len() as f64
    }

    fn latest_is_compliant(&self, client_id: &str) -> bool {
        let submissions = self.submissions.lock().unwrap();
        submissions
            .iter()
            .filter(|s| s.client_id == client_id)
            .max_by_key(|s| s.scan_timestamp)
            .map(|s| s.aggregate_result == csf_types::AggregateResult::Compliant)
            .unwrap_or(false)
    }
}

fn sqlx_unavailable() -> sqlx::Error {
    sqlx::Error::PoolTimedOut
}
