//! Machine-key issuance and validation.

use chrono::{DateTime, Utc};
use csf_types::MachineKeyRecord;
use rand::RngCore;

/// A statically configured fallback key, checked only after every active
/// database record has failed to match. Supports both a plain value (legacy
/// deployments that never migrated to bcrypt) and a bcrypt hash.
#[derive(Debug, Clone)]
pub enum StaticKey {
    Plain(String),
    BcryptHash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MachineKeyError {
    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// Generate a new plain-text machine key plus its bcrypt hash and
/// 8-character display prefix. The plain value is returned exactly once;
/// callers must not persist it.
pub fn generate_key() -> Result<(String, String, String), MachineKeyError> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plain = format!("csf_{}", hex::encode(bytes));
    let hash = bcrypt::hash(&plain, bcrypt::DEFAULT_COST)?;
    let display_prefix = plain.chars().take(8).collect();
    Ok((plain, hash, display_prefix))
}

/// Validate `presented` against every active, unexpired record, returning
/// the matching record's id. Checked in the order given; callers should
/// pass `active_machine_keys()` from the repository directly.
pub fn validate_against_records(
    presented: &str,
    records: &[MachineKeyRecord],
    now: DateTime<Utc>,
) -> Option<i64> {
    records
        .iter()
        .filter(|r| r.is_usable(now))
        .find(|r| bcrypt::verify(presented, &r.bcrypt_hash).unwrap_or(false))
        .map(|r| r.id)
}

/// Checked only once the database has failed to match. Returns true on a
/// match; callers attach a synthetic `MachineKey` principal and should log a
/// deprecation warning (spec.md §9's explicit call-out that this path is
/// legacy-only).
pub fn validate_against_static_fallback(presented: &str, configured: &[StaticKey]) -> bool {
    configured.iter().any(|key| match key {
        StaticKey::Plain(plain) => constant_time_eq(presented.as_bytes(), plain.as_bytes()),
        StaticKey::BcryptHash(hash) => bcrypt::verify(presented, hash).unwrap_or(false),
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, active: bool, expires_at: Option<DateTime<Utc>>) -> MachineKeyRecord {
        MachineKeyRecord {
            id: 1,
            name: "n".into(),
            bcrypt_hash: hash.into(),
            display_prefix: "abcd1234".into(),
            created_by: "admin".into(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
            active,
        }
    }

    #[test]
    fn generated_key_validates_against_its_own_record() {
        let (plain, hash, prefix) = generate_key().unwrap();
        assert_eq!(prefix.len(), 8);
        let rec = record(&hash, true, None);
        assert_eq!(validate_against_records(&plain, &[rec], Utc::now()), Some(1));
    }

    #[test]
    fn inactive_record_never_matches() {
        let (plain, hash, _) = generate_key().unwrap();
        let rec = record(&hash, false, None);
        assert_eq!(validate_against_records(&plain, &[rec], Utc::now()), None);
    }

    #[test]
    fn expired_record_never_matches() {
        let (plain, hash, _) = generate_key().unwrap();
        let rec = record(&hash, true, Some(Utc::now() - chrono::Duration::seconds(1)));
        assert_eq!(validate_against_records(&plain, &[rec], Utc::now()), None);
    }

    #[test]
    fn static_plain_fallback_matches_exact_value() {
        let keys = vec![StaticKey::Plain("legacy-key".into())];
        assert!(validate_against_static_fallback("legacy-key", &keys));
        assert!(!validate_against_static_fallback("wrong", &keys));
    }

    #[test]
    fn static_bcrypt_fallback_matches_hash() {
        let hash = bcrypt::hash("legacy-key", bcrypt::DEFAULT_COST).unwrap();
        let keys = vec![StaticKey::BcryptHash(hash)];
        assert!(validate_against_static_fallback("legacy-key", &keys));
    }
}
