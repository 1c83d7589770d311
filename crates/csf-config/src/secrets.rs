//! Runtime secret resolution for `csf-server`.
//!
//! Grounded on the teacher's `mqk-config::secrets` contract: secrets are
//! resolved **once** at startup into a redacted-`Debug` struct and passed
//! into constructors; call sites never scatter raw lookups.
//!
//! # Mode-aware enforcement
//! - `Production`: `auth.jwt.secret` must be present in config/env; a
//!   missing secret is a fatal startup error (spec.md §9's explicit
//!   correction of the auto-generate-on-boot bootstrap convenience).
//! - `Development`: a missing secret is auto-generated once and logged as a
//!   `tracing::warn!`, since restarts would otherwise invalidate every
//!   outstanding token silently.

use anyhow::{bail, Result};
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Development,
    Production,
}

impl RunMode {
    pub fn from_env() -> Self {
        match std::env::var("CSF_ENV").as_deref() {
            Ok("production") => RunMode::Production,
            _ => RunMode::Development,
        }
    }
}

/// The resolved HMAC secret used to sign/verify access and refresh tokens.
/// **Value is redacted in `Debug` output.**
#[derive(Clone)]
pub struct JwtSecret(String);

impl JwtSecret {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("JwtSecret").field(&"<REDACTED>").finish()
    }
}

/// Resolve the JWT signing secret for the given mode.
///
/// `configured` is `auth.jwt.secret` as loaded from config/env. In
/// production a missing value is fatal; in development it is generated
/// once and a warning is logged so the operator knows to persist it.
pub fn resolve_jwt_secret(mode: RunMode, configured: Option<String>) -> Result<JwtSecret> {
    match (mode, configured) {
        (_, Some(s)) if !s.is_empty() => Ok(JwtSecret(s)),
        (RunMode::Production, _) => {
            bail!("auth.jwt.secret is required when CSF_ENV=production; refusing to start")
        }
        (RunMode::Development, _) => {
            let generated = generate_secret();
            tracing::warn!(
                "auth.jwt.secret not configured; generated an ephemeral secret for this \
                 process. All tokens will be invalidated on restart. Persist this value in \
                 auth.jwt.secret to avoid that in a long-lived deployment."
            );
            Ok(JwtSecret(generated))
        }
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
