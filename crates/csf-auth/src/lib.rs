//! Authentication and key/token lifecycle.
//!
//! Two coexisting credential schemes feed into one [`Principal`]: machine
//! keys (bcrypt) and user access tokens (HS256 JWT). Login/refresh/logout
//! flows manage the latter's lifecycle, including rotation and replay
//! detection.
//!
//! Fail-closed, explicit-transition style throughout: every branch below
//! ends in an explicit `Ok`/`Err`, never an implicit fallthrough, and
//! ambiguous or stale state (revoked, replayed, generation-mismatched) is
//! always treated as a failure.

pub mod credentials;
pub mod jwt;
pub mod machine_key;
pub mod repository;

use chrono::{DateTime, Utc};
use csf_config::secrets::JwtSecret;
use csf_types::{Principal, RefreshTokenRecord, RevocationEntry, UserRole};
use uuid::Uuid;

pub use credentials::{discover_credential, Credential};
pub use jwt::JwtParams;
pub use machine_key::StaticKey;
pub use repository::{AuthRepository, AuthRepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("credential not recognized")]
    Unrecognized,
    #[error("token expired or not yet valid")]
    TokenExpired,
    #[error("token has been revoked")]
    Revoked,
    #[error("global logout has invalidated this token")]
    GenerationMismatch,
    #[error("refresh token reuse detected; chain revoked")]
    ReplayDetected,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jwt::JwtError),
    #[error(transparent)]
    Repository(#[from] AuthRepositoryError),
}

pub struct AuthService<R: AuthRepository> {
    repo: R,
    jwt_secret: JwtSecret,
    jwt_params: JwtParams,
    static_fallback_keys: Vec<StaticKey>,
    refresh_ttl: chrono::Duration,
}

impl<R: AuthRepository> AuthService<R> {
    /// `jwt_config` supplies the issuer/audience/access lifetime and the
    /// refresh token lifetime; `jwt_secret` is resolved separately since it
    /// may come from the environment rather than the config file.
    pub fn new(
        repo: R,
        jwt_secret: JwtSecret,
        static_fallback_keys: Vec<StaticKey>,
        jwt_config: &csf_config::JwtConfig,
    ) -> Self {
        Self {
            repo,
            jwt_secret,
            jwt_params: JwtParams::from(jwt_config),
            static_fallback_keys,
            refresh_ttl: chrono::Duration::days(jwt_config.refresh_lifetime_days),
        }
    }

    /// Resolve whatever credential was discovered on the request into a
    /// [`Principal`]. This is the single entry point C5's middleware calls.
    pub async fn authenticate(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let token = credential.token();

        if let Ok(claims) = jwt::verify_access_token(&self.jwt_secret, &self.jwt_params, token) {
            return self.finish_user_token_auth(claims, now).await;
        }

        let records = self.repo.active_machine_keys().await?;
        if let Some(key_id) = machine_key::validate_against_records(token, &records, now) {
            self.repo.touch_machine_key(key_id, now).await?;
            let name = records
                .into_iter()
                .find(|r| r.id == key_id)
                .map(|r| r.name)
                .unwrap_or_default();
            return Ok(Principal::MachineKey { key_id, name });
        }

        if machine_key::validate_against_static_fallback(token, &self.static_fallback_keys) {
            tracing::warn!(
                "authenticated via statically configured machine key fallback; migrate this \
                 caller to a database-issued key"
            );
            return Ok(Principal::MachineKey { key_id: -1, name: "static-fallback".to_string() });
        }

        Err(AuthError::Unrecognized)
    }

    async fn finish_user_token_auth(
        &self,
        claims: jwt::AccessClaims,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        if claims.exp <= now.timestamp() || claims.nbf > now.timestamp() {
            return Err(AuthError::TokenExpired);
        }
        if self.repo.is_revoked(claims.jti).await? {
            return Err(AuthError::Revoked);
        }
        let user = self
            .repo
            .find_user(&claims.sub)
            .await?
            .ok_or(AuthError::Unrecognized)?;
        if user.token_generation != claims.tgen {
            return Err(AuthError::GenerationMismatch);
        }

        Ok(Principal::UserToken {
            subject: claims.sub,
            role: claims.role,
            token_id: claims.jti,
            issued_at: DateTime::from_timestamp(claims.iat, 0).unwrap_or(now),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(now),
        })
    }

    /// `POST /api/auth/login`. Verifies bcrypt, touches `last_login`, issues
    /// a fresh access + refresh token pair.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, String, DateTime<Utc>), AuthError> {
        let user = self
            .repo
            .find_user(username)
            .await?
            .ok_or(AuthError::BadCredentials)?;

        if !bcrypt::verify(password, &user.bcrypt_hash).unwrap_or(false) {
            return Err(AuthError::BadCredentials);
        }

        self.repo.touch_last_login(username, now).await?;
        self.issue_token_pair(username, user.role, user.token_generation, now).await
    }

    /// `POST /api/auth/refresh`. Rotates the refresh token on every use;
    /// detects replay of an already-rotated token and revokes the whole
    /// chain if so.
    pub async fn refresh(
        &self,
        presented_token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, String, DateTime<Utc>), AuthError> {
        let record = self
            .repo
            .find_refresh_token(presented_token_id)
            .await?
            .ok_or(AuthError::Unrecognized)?;

        if record.revoked {
            if record.replaced_by.is_some() {
                self.repo.revoke_chain_from(presented_token_id).await?;
                return Err(AuthError::ReplayDetected);
            }
            return Err(AuthError::Revoked);
        }
        if record.expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .repo
            .find_user(&record.subject)
            .await?
            .ok_or(AuthError::Unrecognized)?;

        let (access, refresh, expires_at) = self
            .issue_token_pair(&record.subject, user.role, user.token_generation, now)
            .await?;

        let new_refresh_id = refresh_token_id_from(&refresh)?;
        self.repo.revoke_refresh_token(presented_token_id, Some(new_refresh_id)).await?;

        Ok((access, refresh, expires_at))
    }

    /// `POST /api/auth/logout`. Revokes the current access token (by id,
    /// until its original expiry) and the current refresh token.
    pub async fn logout(
        &self,
        access_token_id: Uuid,
        access_original_expiry: DateTime<Utc>,
        refresh_token_id: Uuid,
    ) -> Result<(), AuthError> {
        self.repo
            .insert_revocation(RevocationEntry {
                token_id: access_token_id,
                original_expires_at: access_original_expiry,
            })
            .await?;
        self.repo.revoke_refresh_token(refresh_token_id, None).await?;
        Ok(())
    }

    /// Global logout: bump the user's token-generation counter, which fails
    /// the generation check on every outstanding access token on next use.
    pub async fn global_logout(&self, username: &str) -> Result<(), AuthError> {
        self.repo.bump_token_generation(username).await?;
        Ok(())
    }

    async fn issue_token_pair(
        &self,
        subject: &str,
        role: UserRole,
        token_generation: i64,
        now: DateTime<Utc>,
    ) -> Result<(String, String, DateTime<Utc>), AuthError> {
        let (access, claims) =
            jwt::issue_access_token(&self.jwt_secret, &self.jwt_params, subject, role, token_generation, now)?;

        let refresh_id = Uuid::new_v4();
        let refresh_expires_at = now + self.refresh_ttl;
        self.repo
            .insert_refresh_token(RefreshTokenRecord {
                token_id: refresh_id,
                subject: subject.to_string(),
                issued_at: now,
                expires_at: refresh_expires_at,
                revoked: false,
                replaced_by: None,
            })
            .await?;

        Ok((access, refresh_id.to_string(), DateTime::from_timestamp(claims.exp, 0).unwrap_or(now)))
    }
}

fn refresh_token_id_from(token: &str) -> Result<Uuid, AuthError> {
    Uuid::parse_str(token).map_err(|_| AuthError::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use csf_config::secrets::{resolve_jwt_secret, RunMode};
    use csf_types::{MachineKeyRecord, UserRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRepo {
        machine_keys: Mutex<Vec<MachineKeyRecord>>,
        users: Mutex<Vec<UserRecord>>,
        refresh_tokens: Mutex<Vec<RefreshTokenRecord>>,
        revocations: Mutex<Vec<RevocationEntry>>,
        touched_keys: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl AuthRepository for FakeRepo {
        async fn active_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, AuthRepositoryError> {
            Ok(self.machine_keys.lock().unwrap().clone())
        }
        async fn touch_machine_key(&self, id: i64, _now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
            self.touched_keys.lock().unwrap().push(id);
            Ok(())
        }
        async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, AuthRepositoryError> {
            Ok(self.users.lock().unwrap().iter().find(|u| u.username == username).cloned())
        }
        async fn touch_last_login(&self, _username: &str, _now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
            Ok(())
        }
        async fn bump_token_generation(&self, username: &str) -> Result<(), AuthRepositoryError> {
            let mut users = self.users.lock().unwrap();
            if let Some(u) = users.iter_mut().find(|u| u.username == username) {
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
            let mut tokens = self.refresh_tokens.lock().unwrap();
            if let Some(t) = tokens.iter_mut().find(|t| t.token_id == token_id) {
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

    fn service(repo: FakeRepo) -> AuthService<FakeRepo> {
        let secret = resolve_jwt_secret(RunMode::Production, Some("test-secret".into())).unwrap();
        let jwt_config = csf_config::JwtConfig::default();
        AuthService::new(repo, secret, vec![StaticKey::Plain("legacy".into())], &jwt_config)
    }

    fn user(username: &str, password: &str) -> UserRecord {
        UserRecord {
            username: username.to_string(),
            bcrypt_hash: bcrypt::hash(password, bcrypt::DEFAULT_COST).unwrap(),
            role: UserRole::Admin,
            created_at: Utc::now(),
            last_login: None,
            token_generation: 0,
        }
    }

    #[tokio::test]
    async fn login_then_authenticate_round_trips() {
        let repo = FakeRepo { users: Mutex::new(vec![user("alice", "hunter2")]), ..Default::default() };
        let svc = service(repo);
        let now = Utc::now();

        let (access, _refresh, _exp) = svc.login("alice", "hunter2", now).await.unwrap();
        let principal = svc.authenticate(&Credential::AuthorizationHeader(access), now).await.unwrap();
        assert!(matches!(principal, Principal::UserToken { subject, .. } if subject == "alice"));
    }

    #[tokio::test]
    async fn login_with_wrong_password_fails() {
        let repo = FakeRepo { users: Mutex::new(vec![user("alice", "hunter2")]), ..Default::default() };
        let svc = service(repo);
        let err = svc.login("alice", "wrong", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthError::BadCredentials));
    }

    #[tokio::test]
    async fn global_logout_invalidates_outstanding_tokens() {
        let repo = FakeRepo { users: Mutex::new(vec![user("alice", "hunter2")]), ..Default::default() };
        let svc = service(repo);
        let now = Utc::now();

        let (access, ..) = svc.login("alice", "hunter2", now).await.unwrap();
        svc.global_logout("alice").await.unwrap();

        let err = svc.authenticate(&Credential::AuthorizationHeader(access), now).await.unwrap_err();
        assert!(matches!(err, AuthError::GenerationMismatch));
    }

    #[tokio::test]
    async fn refresh_rotates_token_and_revokes_predecessor() {
        let repo = FakeRepo { users: Mutex::new(vec![user("alice", "hunter2")]), ..Default::default() };
        let svc = service(repo);
        let now = Utc::now();

        let (_access, refresh, _exp) = svc.login("alice", "hunter2", now).await.unwrap();
        let refresh_id = Uuid::parse_str(&refresh).unwrap();

        let (_access2, refresh2, _exp2) = svc.refresh(refresh_id, now).await.unwrap();
        assert_ne!(refresh, refresh2);

        // Using the rotated-away token again is replay.
        let err = svc.refresh(refresh_id, now).await.unwrap_err();
        assert!(matches!(err, AuthError::ReplayDetected));
    }

    #[tokio::test]
    async fn machine_key_authenticates_via_database_record() {
        let (plain, hash, _) = machine_key::generate_key().unwrap();
        let record = MachineKeyRecord {
            id: 7,
            name: "ci-runner".into(),
            bcrypt_hash: hash,
            display_prefix: "abcd1234".into(),
            created_by: "admin".into(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            active: true,
        };
        let repo = FakeRepo { machine_keys: Mutex::new(vec![record]), ..Default::default() };
        let svc = service(repo);

        let principal = svc
            .authenticate(&Credential::AuthorizationHeader(plain), Utc::now())
            .await
            .unwrap();
        assert!(matches!(principal, Principal::MachineKey { key_id: 7, .. }));
    }

    #[tokio::test]
    async fn static_fallback_used_only_after_database_miss() {
        let repo = FakeRepo::default();
        let svc = service(repo);
        let principal = svc
            .authenticate(&Credential::AuthorizationHeader("legacy".into()), Utc::now())
            .await
            .unwrap();
        assert!(matches!(principal, Principal::MachineKey { key_id: -1, .. }));
    }

    #[tokio::test]
    async fn unrecognized_credential_is_rejected() {
        let repo = FakeRepo::default();
        let svc = service(repo);
        let err = svc
            .authenticate(&Credential::AuthorizationHeader("garbage".into()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unrecognized));
    }
}
