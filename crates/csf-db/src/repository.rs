//! Persistence seam for `csf-server`: extends [`AuthRepository`] with the
//! C7/C8 submission and client operations and the C6/C9 administration and
//! janitor operations, so the server can be exercised against an in-memory
//! fake (`csf-testkit`) instead of a live Postgres instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csf_auth::AuthRepository;
use csf_types::{ClientInfo, DashboardSummary, MachineKeyRecord, Submission, SubmissionSummary, SystemInfo, UserRole};
use uuid::Uuid;

use crate::{Store, StoreError};

#[async_trait]
pub trait Repository: AuthRepository + Send + Sync {
    /// `GET /api/v1/health`: cheapest possible round trip to the store.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError>;
    async fn upsert_client_liveness(
        &self,
        client_id: &str,
        hostname: &str,
        system_info: &SystemInfo,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError>;
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientInfo>, StoreError>;
    async fn list_client_submissions(&self, client_id: &str) -> Result<Vec<SubmissionSummary>, StoreError>;
    async fn list_clients(&self) -> Result<Vec<ClientInfo>, StoreError>;
    async fn dashboard_summary(&self) -> Result<DashboardSummary, StoreError>;
    async fn clear_client_history(&self, client_id: &str) -> Result<u64, StoreError>;

    async fn list_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, StoreError>;
    #[allow(clippy::too_many_arguments)]
    async fn create_machine_key(
        &self,
        name: &str,
        bcrypt_hash: &str,
        display_prefix: &str,
        created_by: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError>;
    async fn set_machine_key_active(&self, id: i64, active: bool) -> Result<(), StoreError>;
    async fn delete_machine_key(&self, id: i64) -> Result<(), StoreError>;

    async fn sweep_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn sweep_revocations(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn sweep_audit_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn insert_audit_event(
        &self,
        principal_attempt: &str,
        reason: &str,
        remote_addr: &str,
        success: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn user_count(&self) -> Result<i64, StoreError>;
    async fn create_user(&self, username: &str, bcrypt_hash: &str, role: UserRole) -> Result<(), StoreError>;
}

#[async_trait]
impl Repository for Store {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("select 1").execute(self.pool()).await?;
        Ok(())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        Store::save_submission(self, submission).await
    }

    async fn upsert_client_liveness(
        &self,
        client_id: &str,
        hostname: &str,
        system_info: &SystemInfo,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Store::upsert_client_liveness(self, client_id, hostname, system_info, now).await
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Store::get_submission(self, id).await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientInfo>, StoreError> {
        Store::get_client(self, client_id).await
    }

    async fn list_client_submissions(&self, client_id: &str) -> Result<Vec<SubmissionSummary>, StoreError> {
        Store::list_client_submissions(self, client_id).await
    }

    async fn list_clients(&self) -> Result<Vec<ClientInfo>, StoreError> {
        Store::list_clients(self).await
    }

    async fn dashboard_summary(&self) -> Result<DashboardSummary, StoreError> {
        Store::dashboard_summary(self).await
    }

    async fn clear_client_history(&self, client_id: &str) -> Result<u64, StoreError> {
        Store::clear_client_history(self, client_id).await
    }

    async fn list_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, StoreError> {
        Store::list_machine_keys(self).await
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
        Store::create_machine_key(self, name, bcrypt_hash, display_prefix, created_by, created_at, expires_at).await
    }

    async fn set_machine_key_active(&self, id: i64, active: bool) -> Result<(), StoreError> {
        Store::set_machine_key_active(self, id, active).await
    }

    async fn delete_machine_key(&self, id: i64) -> Result<(), StoreError> {
        Store::delete_machine_key(self, id).await
    }

    async fn sweep_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Store::sweep_expired_refresh_tokens(self, now).await
    }

    async fn sweep_revocations(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Store::sweep_revocations(self, now).await
    }

    async fn sweep_audit_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Store::sweep_audit_log(self, cutoff).await
    }

    async fn insert_audit_event(
        &self,
        principal_attempt: &str,
        reason: &str,
        remote_addr: &str,
        success: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Store::insert_audit_event(self, principal_attempt, reason, remote_addr, success, occurred_at).await
    }

    async fn user_count(&self) -> Result<i64, StoreError> {
        Store::user_count(self).await
    }

    async fn create_user(&self, username: &str, bcrypt_hash: &str, role: UserRole) -> Result<(), StoreError> {
        Store::create_user(self, username, bcrypt_hash, role).await
    }
}
