mod argon2_hasher;
mod auth_service_impl;
mod credential_validator;
mod session_authenticator;
mod token_issuer;

pub use argon2_hasher::*;
pub use auth_service_impl::*;
pub use credential_validator::*;
pub use session_authenticator::*;
pub use token_issuer::*;
