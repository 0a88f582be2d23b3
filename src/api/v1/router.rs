use super::error::*;
use super::handler;
use crate::application_port::AuthService;
use crate::domain_model::{AccountId, Identity};
use crate::server::*;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, reject};

const REFRESH_TOKEN_HEADER: &str = "refresh-token";
const AUTHORIZATION_HEADER: &str = "authorization";
const MAX_BODY_BYTES: u64 = 16 * 1024;

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .and_then(handler::health);

    let register = warp::post()
        .and(warp::path!("auth" / "register"))
        .and(json_body())
        .and(with(server.auth_service.clone()))
        .and_then(handler::register);

    let login = warp::post()
        .and(warp::path!("auth" / "login"))
        .and(json_body())
        .and(with(server.auth_service.clone()))
        .and_then(handler::login);

    let refresh = warp::post()
        .and(warp::path!("auth" / "refresh"))
        .and(warp::header::optional::<String>(REFRESH_TOKEN_HEADER))
        .and(with(server.auth_service.clone()))
        .and_then(handler::refresh);

    let logout = warp::post()
        .and(warp::path!("auth" / "logout"))
        .and(warp::header::optional::<String>(REFRESH_TOKEN_HEADER))
        .and(with(server.auth_service.clone()))
        .and_then(handler::logout);

    let logout_all = warp::post()
        .and(warp::path!("auth" / "logout-all"))
        .and(with_identity(server.auth_service.clone()))
        .and(with(server.auth_service.clone()))
        .and_then(handler::logout_all);

    let me = warp::get()
        .and(warp::path!("accounts" / "me"))
        .and(with_identity(server.auth_service.clone()))
        .and(with(server.auth_service.clone()))
        .and_then(handler::my_profile);

    let account = warp::get()
        .and(warp::path!("accounts" / AccountId))
        .and(with_identity(server.auth_service.clone()))
        .and(with(server.auth_service.clone()))
        .and_then(handler::account_profile);

    health
        .or(register)
        .or(login)
        .or(refresh)
        .or(logout)
        .or(logout_all)
        .or(me)
        .or(account)
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

/// Extracts the caller's [`Identity`] from the `Authorization` header.
fn with_identity(
    auth_service: Arc<dyn AuthService>,
) -> impl Filter<Extract = (Identity,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>(AUTHORIZATION_HEADER).and_then(
        move |header: Option<String>| {
            let auth_service = auth_service.clone();
            async move {
                auth_service
                    .authenticate(header.as_deref())
                    .await
                    .map_err(ApiErrorCode::from)
                    .map_err(reject::custom)
            }
        },
    )
}
