use crate::domain_model::*;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token invalid")]
    InvalidToken,
    #[error("refresh token reuse detected")]
    ReuseDetected,
    #[error("handle already taken")]
    HandleTaken,
    #[error("handle is not a valid email address")]
    InvalidHandle,
    #[error("weak password: {0}")]
    WeakPassword(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature invalid")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
    #[error("token encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub user_id: UserId,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshToken(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub token_type: &'static str,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// A freshly signed token and the claims it was signed with.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Option<Jti>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub trait TokenCodec: Send + Sync {
    /// Signs a token for `subject`. Refresh tokens get a fresh jti.
    fn issue(
        &self,
        subject: UserId,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError>;

    /// Signs the refresh token backing `session`, reusing its jti and expiry.
    fn issue_refresh(&self, session: &SessionRecord) -> Result<IssuedToken, TokenError>;

    fn parse(&self, token: &str) -> Result<Claims, TokenError>;
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;

    /// Constant-time check. A malformed hash verifies as `false` at full cost.
    async fn verify_password(&self, password: &str, password_hash: &str) -> bool;

    /// Spends one verification without a real hash, so unknown handles cost
    /// the same as wrong passwords.
    async fn verify_dummy(&self, password: &str);
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn signup(&self, request: SignupInput) -> Result<UserId, AuthError>;
    async fn login(&self, request: LoginInput) -> Result<LoginResult, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;
    /// Best effort: an unparseable token is a successful no-op.
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
    async fn logout_all(&self, user_id: UserId) -> Result<u64, AuthError>;
    async fn profile(&self, user_id: UserId) -> Result<UserProfile, AuthError>;
    /// Live sessions of `user_id`, newest first.
    async fn sessions(&self, user_id: UserId) -> Result<Vec<SessionRecord>, AuthError>;
    /// Revokes one of the caller's own sessions. `false` when `jti` is unknown
    /// or belongs to someone else.
    async fn revoke_session(&self, user_id: UserId, jti: Jti) -> Result<bool, AuthError>;
}
