use super::error::*;
use super::handler;
use crate::application_port::*;
use crate::domain_model::*;
use crate::server::*;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, http, reject};

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let signup = warp::path!("auth" / "signup")
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::signup);

    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::login);

    let refresh = warp::path!("auth" / "refresh")
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::refresh);

    let logout = warp::path!("auth" / "logout")
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::logout);

    let logout_all = warp::path!("auth" / "logout_all")
        .and(warp::post())
        .and(with_identity(server.guard.clone()))
        .and(with(server.auth_service.clone()))
        .and_then(handler::logout_all);

    let me = warp::path!("auth" / "me")
        .and(warp::get())
        .and(with_identity(server.guard.clone()))
        .and(with(server.auth_service.clone()))
        .and_then(handler::me);

    let list_sessions = with_owner(server.guard.clone())
        .and(warp::path!("sessions"))
        .and(warp::get())
        .and(with(server.auth_service.clone()))
        .and_then(handler::list_sessions);

    let revoke_session = with_owner(server.guard.clone())
        .and(warp::path!("sessions" / Jti))
        .and(warp::delete())
        .and(with(server.auth_service.clone()))
        .and_then(handler::revoke_session);

    signup
        .or(login)
        .or(refresh)
        .or(logout)
        .or(logout_all)
        .or(me)
        .or(list_sessions)
        .or(revoke_session)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

fn with_bearer() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::header::<String>(http::header::AUTHORIZATION.as_ref()).and_then(
        |header: String| async move {
            match header.strip_prefix("Bearer ") {
                Some(token) => Ok(token.trim().to_string()),
                None => Err(reject::custom(ApiErrorCode::InvalidToken)),
            }
        },
    )
}

/// Caller of a valid access token.
fn with_identity(
    guard: Arc<dyn AuthorizationGuard>,
) -> impl Filter<Extract = (UserId,), Error = warp::Rejection> + Clone {
    with_bearer().and_then(move |token: String| {
        let guard = guard.clone();
        async move {
            guard
                .authenticate(&token)
                .map_err(ApiErrorCode::from)
                .map_err(reject::custom)
        }
    })
}

/// Matches `users/{owner_id}` and lets the request through only when the
/// bearer token belongs to `owner_id`.
fn with_owner(
    guard: Arc<dyn AuthorizationGuard>,
) -> impl Filter<Extract = (UserId,), Error = warp::Rejection> + Clone {
    warp::path("users")
        .and(warp::path::param::<UserId>())
        .and(with_bearer())
        .and_then(move |owner_id: UserId, token: String| {
            let guard = guard.clone();
            async move {
                guard
                    .authorize(&token, owner_id)
                    .map_err(ApiErrorCode::from)
                    .map_err(reject::custom)
            }
        })
}
