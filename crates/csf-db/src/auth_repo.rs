//! `csf_auth::AuthRepository` backed by the tables this crate migrates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csf_auth::{AuthRepository, AuthRepositoryError};
use csf_types::{MachineKeyRecord, RefreshTokenRecord, RevocationEntry, UserRecord, UserRole};
use sqlx::Row;
use uuid::Uuid;

use crate::Store;

fn store_err(e: sqlx::Error) -> AuthRepositoryError {
    AuthRepositoryError::Store(e.to_string())
}

fn role_from_str(s: &str) -> UserRole {
    match s {
        "admin" => UserRole::Admin,
        "auditor" => UserRole::Auditor,
        _ => UserRole::Viewer,
    }
}

fn role_to_str(role: UserRole) -> &'static str {
    match role {
        UserRole::Admin => "admin",
        UserRole::Viewer => "viewer",
        UserRole::Auditor => "auditor",
    }
}

#[async_trait]
impl AuthRepository for Store {
    async fn active_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, AuthRepositoryError> {
        let rows = sqlx::query(
            "select id, name, bcrypt_hash, display_prefix, created_by, created_at, \
             last_used_at, expires_at, active from machine_keys where active = true",
        )
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| -> Result<MachineKeyRecord, AuthRepositoryError> {
                Ok(MachineKeyRecord {
                    id: row.try_get("id").map_err(store_err)?,
                    name: row.try_get("name").map_err(store_err)?,
                    bcrypt_hash: row.try_get("bcrypt_hash").map_err(store_err)?,
                    display_prefix: row.try_get("display_prefix").map_err(store_err)?,
                    created_by: row.try_get("created_by").map_err(store_err)?,
                    created_at: row.try_get("created_at").map_err(store_err)?,
                    last_used_at: row.try_get("last_used_at").map_err(store_err)?,
                    expires_at: row.try_get("expires_at").map_err(store_err)?,
                    active: row.try_get("active").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn touch_machine_key(&self, id: i64, now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
        sqlx::query("update machine_keys set last_used_at = $1 where id = $2")
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, AuthRepositoryError> {
        let row = sqlx::query(
            "select username, bcrypt_hash, role, created_at, last_login, token_generation \
             from users where username = $1",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        row.map(|row| -> Result<UserRecord, AuthRepositoryError> {
            Ok(UserRecord {
                username: row.try_get("username").map_err(store_err)?,
                bcrypt_hash: row.try_get("bcrypt_hash").map_err(store_err)?,
                role: role_from_str(row.try_get::<String, _>("role").map_err(store_err)?.as_str()),
                created_at: row.try_get("created_at").map_err(store_err)?,
                last_login: row.try_get("last_login").map_err(store_err)?,
                token_generation: row.try_get("token_generation").map_err(store_err)?,
            })
        })
        .transpose()
    }

    async fn touch_last_login(&self, username: &str, now: DateTime<Utc>) -> Result<(), AuthRepositoryError> {
        sqlx::query("update users set last_login = $1 where username = $2")
            .bind(now)
            .bind(username)
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn bump_token_generation(&self, username: &str) -> Result<(), AuthRepositoryError> {
        sqlx::query("update users set token_generation = token_generation + 1 where username = $1")
            .bind(username)
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), AuthRepositoryError> {
        sqlx::query(
            "insert into refresh_tokens (token_id, subject, issued_at, expires_at, revoked, replaced_by) \
             values ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.token_id)
        .bind(&record.subject)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.replaced_by)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AuthRepositoryError> {
        let row = sqlx::query(
            "select token_id, subject, issued_at, expires_at, revoked, replaced_by \
             from refresh_tokens where token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        row.map(|row| -> Result<RefreshTokenRecord, AuthRepositoryError> {
            Ok(RefreshTokenRecord {
                token_id: row.try_get("token_id").map_err(store_err)?,
                subject: row.try_get("subject").map_err(store_err)?,
                issued_at: row.try_get("issued_at").map_err(store_err)?,
                expires_at: row.try_get("expires_at").map_err(store_err)?,
                revoked: row.try_get("revoked").map_err(store_err)?,
                replaced_by: row.try_get("replaced_by").map_err(store_err)?,
            })
        })
        .transpose()
    }

    async fn revoke_refresh_token(&self, token_id: Uuid, replaced_by: Option<Uuid>) -> Result<(), AuthRepositoryError> {
        sqlx::query("update refresh_tokens set revoked = true, replaced_by = $1 where token_id = $2")
            .bind(replaced_by)
            .bind(token_id)
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn revoke_chain_from(&self, token_id: Uuid) -> Result<(), AuthRepositoryError> {
        let mut cursor = Some(token_id);
        while let Some(id) = cursor {
            let row = sqlx::query("select replaced_by from refresh_tokens where token_id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .map_err(store_err)?;
            let next: Option<Uuid> = row.and_then(|r| r.try_get("replaced_by").ok());

            sqlx::query("update refresh_tokens set revoked = true where token_id = $1")
                .bind(id)
                .execute(self.pool())
                .await
                .map_err(store_err)?;

            cursor = next;
        }
        Ok(())
    }

    async fn insert_revocation(&self, entry: RevocationEntry) -> Result<(), AuthRepositoryError> {
        sqlx::query(
            "insert into revocations (token_id, original_expires_at) values ($1, $2) \
             on conflict (token_id) do nothing",
        )
        .bind(entry.token_id)
        .bind(entry.original_expires_at)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, AuthRepositoryError> {
        let row = sqlx::query("select 1 from revocations where token_id = $1")
            .bind(token_id)
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        Ok(row.is_some())
    }
}

impl Store {
    pub async fn user_count(&self) -> Result<i64, crate::StoreError> {
        let count: i64 = sqlx::query_scalar("select count(*) from users")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// First-run bootstrap (spec.md §4.C6): called once at startup when the
    /// user table is empty. Creates a single administrator with a
    /// well-known default credential; the caller is responsible for
    /// emitting the accompanying warning.
    pub async fn create_user(&self, username: &str, bcrypt_hash: &str, role: UserRole) -> Result<(), crate::StoreError> {
        sqlx::query("insert into users (username, bcrypt_hash, role) values ($1, $2, $3)")
            .bind(username)
            .bind(bcrypt_hash)
            .bind(role_to_str(role))
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
