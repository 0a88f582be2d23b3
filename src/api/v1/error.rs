use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use crate::logger::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if let Some(code) = err.find::<ApiErrorCode>() {
        *code
    } else if err.is_not_found() {
        ApiErrorCode::NotFound
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some()
        || err.find::<reject::UnsupportedMediaType>().is_some()
        || err.find::<reject::InvalidHeader>().is_some()
        || err.find::<reject::LengthRequired>().is_some()
        || err.find::<reject::PayloadTooLarge>().is_some()
    {
        ApiErrorCode::InvalidRequest
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        ApiErrorCode::NotFound
    } else {
        error!("unhandled rejection: {:?}", err);
        ApiErrorCode::InternalServerError
    };

    let json = warp::reply::json(&ApiResponse::<()>::err(code, code.to_string()));
    Ok(warp::reply::with_status(json, code.status()))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    #[error("Invalid email or password")]
    AuthInvalidCredentials,
    #[error("Authorization header is missing")]
    AuthTokenMissing,
    #[error("Authorization header is not a bearer token")]
    InvalidFormat,
    #[error("Session token is not valid")]
    AuthTokenInvalid,
    #[error("Session token has expired")]
    AuthTokenExpired,
    #[error("Refresh token is missing")]
    RefreshTokenMissing,
    #[error("Refresh token is invalid or expired")]
    RefreshTokenNotValid,
    #[error("Email is already registered")]
    UserEmailAlreadyExists,
    #[error("Request is not valid")]
    InvalidRequest,
    #[error("Access to this resource is forbidden")]
    Forbidden,
    #[error("Resource not found")]
    NotFound,
    #[error("Service temporarily unavailable, retry later")]
    ServiceUnavailable,
    #[error("Internal error")]
    InternalServerError,
}

impl ApiErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::AuthInvalidCredentials
            | ApiErrorCode::AuthTokenMissing
            | ApiErrorCode::AuthTokenInvalid
            | ApiErrorCode::AuthTokenExpired => StatusCode::UNAUTHORIZED,
            ApiErrorCode::InvalidFormat
            | ApiErrorCode::RefreshTokenMissing
            | ApiErrorCode::RefreshTokenNotValid
            | ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::UserEmailAlreadyExists => StatusCode::CONFLICT,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        error!("Internal error: {}", error);
        ApiErrorCode::InternalServerError
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<AuthError> for ApiErrorCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => ApiErrorCode::AuthInvalidCredentials,
            AuthError::MissingAuthHeader => ApiErrorCode::AuthTokenMissing,
            AuthError::MalformedAuthHeader => ApiErrorCode::InvalidFormat,
            AuthError::MalformedToken | AuthError::InvalidSignature => {
                ApiErrorCode::AuthTokenInvalid
            }
            AuthError::ExpiredToken => ApiErrorCode::AuthTokenExpired,
            AuthError::InvalidOrExpiredRefreshToken => ApiErrorCode::RefreshTokenNotValid,
            AuthError::AccountExists => ApiErrorCode::UserEmailAlreadyExists,
            AuthError::AccountNotFound => ApiErrorCode::NotFound,
            AuthError::InvalidInput(reason) => {
                debug!("invalid input: {reason}");
                ApiErrorCode::InvalidRequest
            }
            e @ (AuthError::StoreUnavailable(_) | AuthError::TransactionFailure(_)) => {
                warn!("retryable failure: {e}");
                ApiErrorCode::ServiceUnavailable
            }
            e @ (AuthError::SigningFailure(_) | AuthError::Internal(_)) => {
                ApiErrorCode::internal(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_in_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(ApiErrorCode::UserEmailAlreadyExists).unwrap(),
            "USER_EMAIL_ALREADY_EXISTS"
        );
        assert_eq!(
            serde_json::to_value(ApiErrorCode::AuthTokenMissing).unwrap(),
            "AUTH_TOKEN_MISSING"
        );
    }

    #[test]
    fn auth_errors_map_to_codes_and_statuses() {
        let cases = [
            (AuthError::InvalidCredentials, ApiErrorCode::AuthInvalidCredentials, 401),
            (AuthError::MissingAuthHeader, ApiErrorCode::AuthTokenMissing, 401),
            (AuthError::MalformedAuthHeader, ApiErrorCode::InvalidFormat, 400),
            (AuthError::InvalidSignature, ApiErrorCode::AuthTokenInvalid, 401),
            (AuthError::ExpiredToken, ApiErrorCode::AuthTokenExpired, 401),
            (
                AuthError::InvalidOrExpiredRefreshToken,
                ApiErrorCode::RefreshTokenNotValid,
                400,
            ),
            (AuthError::AccountExists, ApiErrorCode::UserEmailAlreadyExists, 409),
            (
                AuthError::TransactionFailure("timeout".into()),
                ApiErrorCode::ServiceUnavailable,
                503,
            ),
            (
                AuthError::Internal("boom".into()),
                ApiErrorCode::InternalServerError,
                500,
            ),
        ];
        for (error, code, status) in cases {
            let mapped = ApiErrorCode::from(error);
            assert_eq!(mapped, code);
            assert_eq!(mapped.status().as_u16(), status);
        }
    }

    #[test]
    fn internal_detail_is_not_in_the_message() {
        let code = ApiErrorCode::from(AuthError::Internal("db password wrong".into()));
        assert!(!code.to_string().contains("db password"));
    }
}
