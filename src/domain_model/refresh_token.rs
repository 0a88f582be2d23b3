use super::AccountId;
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const REFRESH_SECRET_LEN: usize = 48;

const REFRESH_SECRET_ALPHABET: [char; 64] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j',
    'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1',
    '2', '3', '4', '5', '6', '7', '8', '9', '_', '-',
];

#[derive(
    Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct RefreshTokenId(pub uuid::Uuid);

impl RefreshTokenId {
    pub fn new_v4() -> Self {
        RefreshTokenId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for RefreshTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RefreshTokenId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::from_str(s).map(RefreshTokenId)
    }
}

/// Opaque refresh credential as handed to the client.
///
/// Only its [`lookup_key`](RefreshSecret::lookup_key) is ever persisted.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RefreshSecret(String);

impl RefreshSecret {
    pub fn generate() -> Self {
        RefreshSecret(nanoid!(REFRESH_SECRET_LEN, &REFRESH_SECRET_ALPHABET))
    }

    /// Wraps a secret presented by a client. Surrounding whitespace is ignored.
    pub fn from_presented(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else {
            Some(RefreshSecret(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the secret; the value stores index records by.
    pub fn lookup_key(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret(<redacted>)")
    }
}

/// `now + ttl`, or `None` when the sum leaves chrono's range.
pub fn expires_after(now: DateTime<Utc>, ttl: std::time::Duration) -> Option<DateTime<Utc>> {
    chrono::TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RefreshTokenState {
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: RefreshTokenId,
    pub owner: AccountId,
    pub lookup_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    /// Expiry is evaluated lazily, at the moment of use.
    pub fn state(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.revoked {
            RefreshTokenState::Revoked
        } else if now >= self.expires_at {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Active
        }
    }

    #[inline]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == RefreshTokenState::Active
    }
}

#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub id: RefreshTokenId,
    pub secret: RefreshSecret,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RotatedRefreshToken {
    pub id: RefreshTokenId,
    pub owner: AccountId,
    pub secret: RefreshSecret,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    #[test]
    fn generated_secrets_use_the_fixed_alphabet_and_length() {
        let secret = RefreshSecret::generate();
        assert_eq!(secret.as_str().chars().count(), REFRESH_SECRET_LEN);
        assert!(
            secret
                .as_str()
                .chars()
                .all(|c| REFRESH_SECRET_ALPHABET.contains(&c))
        );
    }

    #[test]
    fn generated_secrets_do_not_repeat() {
        let seen: HashSet<String> = (0..1000)
            .map(|_| RefreshSecret::generate().as_str().to_string())
            .collect();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn lookup_key_is_stable_hex_sha256() {
        let secret = RefreshSecret::from_presented("abc").unwrap();
        assert_eq!(
            secret.lookup_key(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(secret.lookup_key(), secret.clone().lookup_key());
    }

    #[test]
    fn blank_presented_secret_is_rejected() {
        assert!(RefreshSecret::from_presented("   ").is_none());
        assert_eq!(
            RefreshSecret::from_presented(" s3cret ").unwrap().as_str(),
            "s3cret"
        );
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let secret = RefreshSecret::generate();
        assert!(!format!("{:?}", secret).contains(secret.as_str()));
    }

    #[test]
    fn state_is_derived_from_revocation_then_expiry() {
        let now = Utc::now();
        let mut record = RefreshTokenRecord {
            id: RefreshTokenId::new_v4(),
            owner: AccountId::new_v4(),
            lookup_key: "k".to_string(),
            created_at: now,
            expires_at: now + Duration::days(7),
            revoked: false,
        };
        assert_eq!(record.state(now), RefreshTokenState::Active);
        assert_eq!(
            record.state(record.expires_at),
            RefreshTokenState::Expired
        );
        record.revoked = true;
        assert_eq!(record.state(now), RefreshTokenState::Revoked);
        assert!(!record.is_live(now));
    }
}
