//! Data-access seam this crate depends on but does not implement. `csf-db`
//! provides the real implementation; tests use an in-memory one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csf_types::{MachineKeyRecord, RefreshTokenRecord, RevocationEntry, UserRecord};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AuthRepositoryError {
    #[error("backing store error: {0}")]
    Store(String),
}

#[async_trait]
pub trait AuthRepository: Send + Sync {
    async fn active_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, AuthRepositoryError>;
    async fn touch_machine_key(&self, id: i64, now: DateTime<Utc>) -> Result<(), AuthRepositoryError>;

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, AuthRepositoryError>;
    async fn touch_last_login(&self, username: &str, now: DateTime<Utc>) -> Result<(), AuthRepositoryError>;
    async fn bump_token_generation(&self, username: &str) -> Result<(), AuthRepositoryError>;

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), AuthRepositoryError>;
    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AuthRepositoryError>;
    async fn revoke_refresh_token(&self, token_id: Uuid, replaced_by: Option<Uuid>) -> Result<(), AuthRepositoryError>;
    /// Revoke every token reachable from `token_id` by following `replaced_by`
    /// links forward. Used when replay of an already-rotated token is
    /// detected.
    async fn revoke_chain_from(&self, token_id: Uuid) -> Result<(), AuthRepositoryError>;

    async fn insert_revocation(&self, entry: RevocationEntry) -> Result<(), AuthRepositoryError>;
    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, AuthRepositoryError>;
}

/// Lets `AuthService` hold a type-erased repository (`Arc<dyn Repository>`
/// in `csf-db`, or any other trait object built on top of this trait)
/// without a generic parameter leaking into `csf-server`'s `AppState`.
#[async_trait]
impl<T: AuthRepository + ?Sized> AuthRepository for std::sync::Arc<T> {
    async fn active_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, AuthRepositoryError> {
        (**self).active_machine_keys().await
    }
    async fn touch_machine_key(&self, id: i64, now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
        (**self).touch_machine_key(id, now).await
    }
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, AuthRepositoryError> {
        (**self).find_user(username).await
    }
    async fn touch_last_login(&self, username: &str, now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
        (**self).touch_last_login(username, now).await
    }
    async fn bump_token_generation(&self, username: &str) -> Result<(), AuthRepositoryError> {
        (**self).bump_token_generation(username).await
    }
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), AuthRepositoryError> {
        (**self).insert_refresh_token(record).await
    }
    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AuthRepositoryError> {
        (**self).find_refresh_token(token_id).await
    }
    async fn revoke_refresh_token(&self, token_id: Uuid, replaced_by: Option<Uuid>) -> Result<(), AuthRepositoryError> {
        (**self).revoke_refresh_token(token_id, replaced_by).await
    }
    async fn revoke_chain_from(&self, token_id: Uuid) -> Result<(), AuthRepositoryError> {
        (**self).revoke_chain_from(token_id).await
    }
    async fn insert_revocation(&self, entry: RevocationEntry) -> Result<(), AuthRepositoryError> {
        (**self).insert_revocation(entry).await
    }
    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, AuthRepositoryError> {
        (**self).is_revoked(token_id).await
    }
}
