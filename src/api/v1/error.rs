use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::{error, warn};
use warp::filters::body::BodyDeserializeError;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if let Some(code) = err.find::<ApiErrorCode>() {
        *code
    } else if err.is_not_found() {
        ApiErrorCode::NotFound
    } else if err.find::<BodyDeserializeError>().is_some() {
        ApiErrorCode::BadRequest
    } else if err.find::<reject::MissingHeader>().is_some() {
        ApiErrorCode::InvalidToken
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        ApiErrorCode::MethodNotAllowed
    } else {
        error!("unhandled rejection: {:?}", err);
        ApiErrorCode::InternalError
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
pub enum ApiErrorCode {
    #[error("Invalid handle or password")]
    InvalidCredentials,
    #[error("Token is not valid")]
    InvalidToken,
    /// A consumed refresh token was replayed; every session of the user is gone.
    #[error("Session has been revoked, please log in again")]
    SessionRevoked,
    #[error("Not allowed to access this resource")]
    Forbidden,
    #[error("Handle already taken")]
    HandleTaken,
    #[error("Handle must be an email address")]
    InvalidHandle,
    #[error(
        "Password must be 8 to 128 characters with an upper-case letter, a lower-case letter and a digit"
    )]
    WeakPassword,
    #[error("Malformed request")]
    BadRequest,
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Service temporarily unavailable")]
    Unavailable,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidCredentials
            | ApiErrorCode::InvalidToken
            | ApiErrorCode::SessionRevoked => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::HandleTaken => StatusCode::CONFLICT,
            ApiErrorCode::InvalidHandle | ApiErrorCode::WeakPassword | ApiErrorCode::BadRequest => {
                StatusCode::BAD_REQUEST
            }
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<AuthError> for ApiErrorCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => ApiErrorCode::InvalidCredentials,
            AuthError::InvalidToken => ApiErrorCode::InvalidToken,
            AuthError::ReuseDetected => ApiErrorCode::SessionRevoked,
            AuthError::HandleTaken => ApiErrorCode::HandleTaken,
            AuthError::InvalidHandle => ApiErrorCode::InvalidHandle,
            AuthError::WeakPassword(_) => ApiErrorCode::WeakPassword,
            AuthError::Unavailable(e) => {
                warn!("store unavailable: {}", e);
                ApiErrorCode::Unavailable
            }
            AuthError::Internal(e) => ApiErrorCode::internal(e),
        }
    }
}

impl From<GuardError> for ApiErrorCode {
    fn from(error: GuardError) -> Self {
        match error {
            GuardError::Unauthenticated => ApiErrorCode::InvalidToken,
            GuardError::Forbidden => ApiErrorCode::Forbidden,
        }
    }
}
