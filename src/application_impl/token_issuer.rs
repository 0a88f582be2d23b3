use crate::application_port::{AuthError, TokenIssuer};
use crate::domain_model::*;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const MIN_SIGNING_KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct JwtConfig {
    pub session_ttl: Duration,
    pub signing_key: Vec<u8>,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("session_ttl", &self.session_ttl)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionWireClaims {
    sub: String,
    name: String,
    iat: i64,
    exp: i64,
}

/// HS256 session tokens signed with the process-wide key.
pub struct JwtHs256Issuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    session_ttl_secs: i64,
}

impl JwtHs256Issuer {
    pub fn new(cfg: JwtConfig) -> Result<Self, AuthError> {
        if cfg.signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(AuthError::SigningFailure(format!(
                "signing key must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        let session_ttl_secs = i64::try_from(cfg.session_ttl.as_secs())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                AuthError::SigningFailure("session lifetime must be at least one second".into())
            })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(JwtHs256Issuer {
            encoding_key: EncodingKey::from_secret(&cfg.signing_key),
            decoding_key: DecodingKey::from_secret(&cfg.signing_key),
            validation,
            session_ttl_secs,
        })
    }

    fn issue_at(&self, account: &Account, now: DateTime<Utc>) -> Result<SignedSession, AuthError> {
        // Whole seconds on both ends keep exp - iat equal to the lifetime.
        let iat = now.timestamp();
        let exp = iat
            .checked_add(self.session_ttl_secs)
            .ok_or_else(|| AuthError::SigningFailure("expiry overflow".into()))?;
        let wire = SessionWireClaims {
            sub: account.id.to_string(),
            name: account.display_name.clone(),
            iat,
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &wire, &self.encoding_key)
            .map_err(|e| AuthError::SigningFailure(e.to_string()))?;

        Ok(SignedSession {
            token: SessionToken(token),
            claims: SessionClaims {
                subject: account.id,
                name: wire.name,
                issued_at: timestamp(iat).ok_or_else(|| {
                    AuthError::SigningFailure("issued-at out of range".into())
                })?,
                expires_at: timestamp(exp)
                    .ok_or_else(|| AuthError::SigningFailure("expiry out of range".into()))?,
            },
        })
    }

    /// A session is dead from the second of its `exp` on, like a refresh record.
    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AuthError> {
        let data = decode::<SessionWireClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify)?;
        let wire = data.claims;

        let subject = wire
            .sub
            .parse::<AccountId>()
            .map_err(|_| AuthError::MalformedToken)?;
        if wire.exp <= wire.iat {
            return Err(AuthError::MalformedToken);
        }
        if wire.exp <= now.timestamp() {
            return Err(AuthError::ExpiredToken);
        }
        let issued_at = timestamp(wire.iat).ok_or(AuthError::MalformedToken)?;
        let expires_at = timestamp(wire.exp).ok_or(AuthError::MalformedToken)?;

        Ok(SessionClaims {
            subject,
            name: wire.name,
            issued_at,
            expires_at,
        })
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn classify(error: jsonwebtoken::errors::Error) -> AuthError {
    match error.kind() {
        ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        _ => AuthError::MalformedToken,
    }
}

impl TokenIssuer for JwtHs256Issuer {
    fn issue(&self, account: &Account) -> Result<SignedSession, AuthError> {
        self.issue_at(account, Utc::now())
    }

    fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.verify_at(token, Utc::now())
    }
}
