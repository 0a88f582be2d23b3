use crate::domain_model::*;
use crate::domain_port::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authorization header missing")]
    MissingAuthHeader,
    #[error("authorization header malformed")]
    MalformedAuthHeader,
    #[error("session token malformed")]
    MalformedToken,
    #[error("session token signature invalid")]
    InvalidSignature,
    #[error("session token expired")]
    ExpiredToken,
    #[error("refresh token invalid or expired")]
    InvalidOrExpiredRefreshToken,
    #[error("account already exists")]
    AccountExists,
    #[error("account not found")]
    AccountNotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("signing failure: {0}")]
    SigningFailure(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("transaction failure: {0}")]
    TransactionFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Errors caused by what the client sent; safe to report as such.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::MissingAuthHeader
                | AuthError::MalformedAuthHeader
                | AuthError::MalformedToken
                | AuthError::InvalidSignature
                | AuthError::ExpiredToken
                | AuthError::InvalidOrExpiredRefreshToken
                | AuthError::AccountExists
                | AuthError::AccountNotFound
                | AuthError::InvalidInput(_)
        )
    }

    /// Internal failures after which the same request may simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::StoreUnavailable(_) | AuthError::TransactionFailure(_)
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Transient(e) => AuthError::StoreUnavailable(e),
            StoreError::ConstraintViolation(e) => AuthError::TransactionFailure(e),
            StoreError::Timeout(e) => AuthError::TransactionFailure(e),
            StoreError::NotFound => AuthError::Internal("unexpected missing record".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct RegisterInput {
    pub display_name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegisterInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterInput")
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInput")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub account_id: AccountId,
    pub tokens: SessionTokens,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub session_token: SessionToken,
    pub refresh_token: RefreshSecret,
    pub session_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;
    async fn verify_password(&self, password: &str, password_hash: &str)
    -> Result<bool, AuthError>;
}

pub trait TokenIssuer: Send + Sync {
    fn issue(&self, account: &Account) -> Result<SignedSession, AuthError>;
    fn verify(&self, token: &str) -> Result<SessionClaims, AuthError>;
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn register(&self, request: RegisterInput) -> Result<AccountId, AuthError>;
    async fn login(&self, request: LoginInput) -> Result<LoginResult, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, AuthError>;
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
    /// Revoke every live refresh token of the caller; returns how many.
    async fn logout_all(&self, identity: &Identity) -> Result<u64, AuthError>;
    async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthError>;
    async fn profile(&self, identity: &Identity) -> Result<AccountProfile, AuthError>;
}
