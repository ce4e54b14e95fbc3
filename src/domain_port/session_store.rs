use crate::application_port::AuthError;
use crate::domain_model::*;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session not found or expired")]
    NotFound,
    #[error("session {jti} was already rotated")]
    ReuseDetected { user_id: UserId, jti: Jti },
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl From<SessionStoreError> for AuthError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound => AuthError::InvalidToken,
            SessionStoreError::ReuseDetected { .. } => AuthError::ReuseDetected,
            SessionStoreError::Unavailable(e) => AuthError::Unavailable(e),
        }
    }
}

/// Source of truth for refresh sessions. Every mutation is a single atomic
/// step, so a dropped future never leaves a half-applied change behind.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Opens a session for `user_id` expiring one refresh TTL from now.
    async fn create(&self, user_id: UserId) -> Result<SessionRecord, SessionStoreError>;

    async fn get(&self, jti: Jti) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// Idempotent. Unknown ids are ignored.
    async fn revoke(&self, jti: Jti) -> Result<(), SessionStoreError>;

    /// Revokes every live session of `user_id`, returning how many flipped.
    async fn revoke_all(&self, user_id: UserId) -> Result<u64, SessionStoreError>;

    /// Compare-and-swap on the `revoked` flag of `old_jti`: exactly one caller
    /// wins, marks the old record `replaced_by` the new one and gets the
    /// replacement. Losers, and anyone presenting an already rotated id, get
    /// `ReuseDetected`. Absent, expired or logged-out ids get `NotFound`.
    async fn rotate(&self, old_jti: Jti) -> Result<SessionRecord, SessionStoreError>;

    /// Unrevoked, unexpired sessions of `user_id`, newest first.
    async fn list_active(&self, user_id: UserId) -> Result<Vec<SessionRecord>, SessionStoreError>;

    /// Physically deletes dead records. Never needed for correctness.
    async fn purge_expired(&self) -> Result<u64, SessionStoreError>;
}
