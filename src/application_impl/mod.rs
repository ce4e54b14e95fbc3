mod auth_service_impl;
mod authorization_guard_impl;
mod credential_hasher_impl;
mod session_sweeper;
mod token_codec_impl;

pub use auth_service_impl::*;
pub use authorization_guard_impl::*;
pub use credential_hasher_impl::*;
pub use session_sweeper::*;
pub use token_codec_impl::*;
