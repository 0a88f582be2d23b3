use crate::application_port::{AuthError, TokenIssuer};
use crate::domain_model::Identity;
use crate::logger::*;
use std::sync::Arc;

const BEARER: &str = "Bearer";

/// Turns an `Authorization` header value into the caller's [`Identity`].
///
/// Resource-level decisions are left to the handler holding the identity.
pub struct SessionAuthenticator {
    issuer: Arc<dyn TokenIssuer>,
}

impl SessionAuthenticator {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { issuer }
    }

    pub fn verify(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        let raw = authorization
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingAuthHeader)?;
        let token = bearer_token(raw)?;

        let claims = self
            .issuer
            .verify(token)
            .inspect_err(|e| debug!("session rejected: {e}"))?;
        Ok(Identity::from(claims))
    }
}

fn bearer_token(raw: &str) -> Result<&str, AuthError> {
    let mut parts = raw.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case(BEARER) => Ok(token),
        _ => Err(AuthError::MalformedAuthHeader),
    }
}
