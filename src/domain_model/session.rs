use super::AccountId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Verified content of a session token. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub subject: AccountId,
    pub name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignedSession {
    pub token: SessionToken,
    pub claims: SessionClaims,
}

/// The caller of a single request, as proven by its session token.
///
/// Handed to handlers by value; it lives exactly as long as the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: AccountId,
    pub name: String,
}

impl Identity {
    pub fn owns(&self, owner: AccountId) -> bool {
        self.subject == owner
    }
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Identity {
            subject: claims.subject,
            name: claims.name,
        }
    }
}
