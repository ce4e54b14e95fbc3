use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_HANDLE_LEN: usize = 254;

pub struct RealAuthService {
    user_repo: Arc<dyn UserRepo>,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    session_store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
}

impl RealAuthService {
    pub fn new(
        user_repo: Arc<dyn UserRepo>,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        session_store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        access_ttl: Duration,
    ) -> Self {
        Self {
            user_repo,
            credential_hasher,
            token_codec,
            session_store,
            clock,
            access_ttl,
        }
    }

    fn issue_pair(&self, session: &SessionRecord) -> Result<AuthTokens, AuthError> {
        let access = self
            .token_codec
            .issue(session.user_id, TokenKind::Access, self.access_ttl)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let refresh = self
            .token_codec
            .issue_refresh(session)
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        Ok(AuthTokens {
            token_type: "bearer",
            access_token: AccessToken(access.token),
            refresh_token: RefreshToken(refresh.token),
            access_token_expires_at: access.expires_at,
            refresh_token_expires_at: refresh.expires_at,
        })
    }

    /// Containment after a replayed refresh token: every session of the user
    /// goes, including the one minted by whoever rotated first.
    async fn contain_reuse(&self, user_id: UserId, jti: Jti) -> AuthError {
        warn!(%user_id, %jti, "refresh token reuse detected, revoking all sessions");
        match self.session_store.revoke_all(user_id).await {
            Ok(revoked) => {
                warn!(%user_id, revoked, "sessions revoked after refresh token reuse");
                AuthError::ReuseDetected
            }
            Err(e) => {
                error!(%user_id, "containment after refresh token reuse failed: {e}");
                e.into()
            }
        }
    }
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().to_lowercase()
}

fn validate_handle(handle: &str) -> Result<(), AuthError> {
    if handle.is_empty() || handle.len() > MAX_HANDLE_LEN || handle.contains(char::is_whitespace) {
        return Err(AuthError::InvalidHandle);
    }
    match handle.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.') =>
        {
            Ok(())
        }
        _ => Err(AuthError::InvalidHandle),
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(format!(
            "must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(format!(
            "must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(AuthError::WeakPassword(
            "must contain an upper-case letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(AuthError::WeakPassword(
            "must contain a lower-case letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::WeakPassword("must contain a digit".to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn signup(&self, request: SignupInput) -> Result<UserId, AuthError> {
        let SignupInput { handle, password } = request;
        let handle = normalize_handle(&handle);

        validate_handle(&handle)?;
        validate_password(&password)?;

        let password_hash = self.credential_hasher.hash_password(&password).await?;
        let user = User {
            user_id: UserId::new_random(),
            handle,
            password_hash,
            is_active: true,
            created_at: self.clock.now(),
        };
        self.user_repo.create(&user).await?;

        info!(user_id = %user.user_id, "user signed up");
        Ok(user.user_id)
    }

    async fn login(&self, request: LoginInput) -> Result<LoginResult, AuthError> {
        let LoginInput { handle, password } = request;
        let handle = normalize_handle(&handle);

        let Some(user) = self.user_repo.get_by_handle(&handle).await? else {
            self.credential_hasher.verify_dummy(&password).await;
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .credential_hasher
            .verify_password(&password, &user.password_hash)
            .await;
        if !ok || !user.is_active {
            debug!(user_id = %user.user_id, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.session_store.create(user.user_id).await?;
        let tokens = self.issue_pair(&session)?;

        info!(user_id = %user.user_id, jti = %session.jti, "login");
        Ok(LoginResult {
            user_id: user.user_id,
            tokens,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let claims = self.token_codec.parse(refresh_token).map_err(|e| {
            debug!("refresh with unusable token: {e}");
            AuthError::InvalidToken
        })?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::InvalidToken);
        }
        let jti = claims.jti.ok_or(AuthError::InvalidToken)?;

        match self.user_repo.get_by_id(claims.subject).await? {
            Some(user) if user.is_active => {}
            _ => {
                self.session_store.revoke(jti).await?;
                return Err(AuthError::InvalidToken);
            }
        }

        let session = match self.session_store.rotate(jti).await {
            Ok(session) => session,
            Err(SessionStoreError::ReuseDetected { user_id, jti }) => {
                return Err(self.contain_reuse(user_id, jti).await);
            }
            Err(e) => return Err(e.into()),
        };

        if session.user_id != claims.subject {
            error!(
                jti = %jti,
                subject = %claims.subject,
                owner = %session.user_id,
                "refresh token subject does not match its session"
            );
            self.session_store.revoke(session.jti).await?;
            return Err(AuthError::InvalidToken);
        }

        debug!(user_id = %session.user_id, old = %jti, new = %session.jti, "session rotated");
        self.issue_pair(&session)
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let jti = match self.token_codec.parse(refresh_token) {
            Ok(Claims {
                kind: TokenKind::Refresh,
                jti: Some(jti),
                ..
            }) => jti,
            _ => {
                debug!("logout with unusable token, nothing to revoke");
                return Ok(());
            }
        };
        self.session_store.revoke(jti).await?;
        debug!(%jti, "logout");
        Ok(())
    }

    async fn logout_all(&self, user_id: UserId) -> Result<u64, AuthError> {
        let revoked = self.session_store.revoke_all(user_id).await?;
        info!(%user_id, revoked, "logout everywhere");
        Ok(revoked)
    }

    async fn profile(&self, user_id: UserId) -> Result<UserProfile, AuthError> {
        match self.user_repo.get_by_id(user_id).await? {
            Some(user) if user.is_active => Ok(user.into()),
            _ => Err(AuthError::InvalidToken),
        }
    }

    async fn sessions(&self, user_id: UserId) -> Result<Vec<SessionRecord>, AuthError> {
        Ok(self.session_store.list_active(user_id).await?)
    }

    async fn revoke_session(&self, user_id: UserId, jti: Jti) -> Result<bool, AuthError> {
        let now = self.clock.now();
        match self.session_store.get(jti).await? {
            Some(session) if session.user_id == user_id && session.is_active(now) => {
                self.session_store.revoke(jti).await?;
                debug!(%user_id, %jti, "session revoked by owner");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
