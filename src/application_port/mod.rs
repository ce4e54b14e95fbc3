mod auth_service;
mod authorization_guard;

pub use auth_service::*;
pub use authorization_guard::*;
