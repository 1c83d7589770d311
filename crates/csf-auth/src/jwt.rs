//! HS256 access-token issuance and verification.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use csf_config::secrets::JwtSecret;
use csf_config::JwtConfig;
use csf_types::UserRole;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer, audience and access-token lifetime, resolved once from
/// `csf_config::JwtConfig` at startup and carried alongside the signing
/// secret for the life of the `AuthService`.
#[derive(Debug, Clone)]
pub struct JwtParams {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: ChronoDuration,
}

impl From<&JwtConfig> for JwtParams {
    fn from(config: &JwtConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: ChronoDuration::minutes(config.access_lifetime_min),
        }
    }
}

impl Default for JwtParams {
    fn default() -> Self {
        Self::from(&JwtConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
    /// Token-generation counter at issuance time; a mismatch against the
    /// user's current counter means a global logout has fired since.
    pub tgen: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token signature or structure invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

pub fn issue_access_token(
    secret: &JwtSecret,
    params: &JwtParams,
    subject: &str,
    role: UserRole,
    token_generation: i64,
    now: DateTime<Utc>,
) -> Result<(String, AccessClaims), JwtError> {
    let claims = AccessClaims {
        sub: subject.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + params.access_ttl).timestamp(),
        nbf: now.timestamp(),
        iss: params.issuer.clone(),
        aud: params.audience.clone(),
        jti: Uuid::new_v4(),
        tgen: token_generation,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, claims))
}

/// Verify signature, expiry, not-before, issuer, and audience. Does not
/// check revocation or token-generation — those require a repository
/// lookup and are the caller's responsibility (`csf_auth::authenticate`).
pub fn verify_access_token(secret: &JwtSecret, params: &JwtParams, token: &str) -> Result<AccessClaims, JwtError> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_issuer(&[params.issuer.as_str()]);
    validation.set_audience(&[params.audience.as_str()]);

    let data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csf_config::secrets::{resolve_jwt_secret, RunMode};

    fn secret() -> JwtSecret {
        resolve_jwt_secret(RunMode::Production, Some("test-secret-value".into())).unwrap()
    }

    #[test]
    fn issued_token_verifies_successfully() {
        let secret = secret();
        let params = JwtParams::default();
        let now = Utc::now();
        let (token, claims) = issue_access_token(&secret, &params, "alice", UserRole::Admin, 0, now).unwrap();
        let verified = verify_access_token(&secret, &params, &token).unwrap();
        assert_eq!(verified.sub, "alice");
        assert_eq!(verified.jti, claims.jti);
    }

    #[test]
    fn token_signed_with_different_secret_fails_verification() {
        let params = JwtParams::default();
        let now = Utc::now();
        let (token, _) = issue_access_token(&secret(), &params, "alice", UserRole::Admin, 0, now).unwrap();
        let other = resolve_jwt_secret(RunMode::Production, Some("other-secret".into())).unwrap();
        assert!(verify_access_token(&other, &params, &token).is_err());
    }

    #[test]
    fn expired_token_fails_verification() {
        let secret = secret();
        let params = JwtParams::default();
        let past = Utc::now() - ChronoDuration::hours(1);
        let (token, _) = issue_access_token(&secret, &params, "alice", UserRole::Viewer, 0, past).unwrap();
        assert!(verify_access_token(&secret, &params, &token).is_err());
    }

    #[test]
    fn configured_issuer_and_audience_are_honored() {
        let secret = secret();
        let configured = JwtParams {
            issuer: "custom-issuer".into(),
            audience: "custom-audience".into(),
            access_ttl: ChronoDuration::minutes(5),
        };
        let now = Utc::now();
        let (token, claims) = issue_access_token(&secret, &configured, "alice", UserRole::Admin, 0, now).unwrap();
        assert_eq!(claims.iss, "custom-issuer");
        assert_eq!(claims.aud, "custom-audience");

        // A verifier expecting the default issuer/audience must reject it.
        assert!(verify_access_token(&secret, &JwtParams::default(), &token).is_err());
        assert!(verify_access_token(&secret, &configured, &token).is_ok());
    }
}
