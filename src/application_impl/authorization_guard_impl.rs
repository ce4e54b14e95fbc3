use crate::application_port::*;
use crate::domain_model::*;
use std::sync::Arc;
use tracing::debug;

/// Stateless guard: an access token is trusted iff the codec verifies it.
pub struct TokenAuthorizationGuard {
    token_codec: Arc<dyn TokenCodec>,
}

impl TokenAuthorizationGuard {
    pub fn new(token_codec: Arc<dyn TokenCodec>) -> Self {
        Self { token_codec }
    }
}

impl AuthorizationGuard for TokenAuthorizationGuard {
    fn authenticate(&self, access_token: &str) -> Result<UserId, GuardError> {
        match self.token_codec.parse(access_token) {
            Ok(claims) if claims.kind == TokenKind::Access => Ok(claims.subject),
            Ok(claims) => {
                debug!(kind = %claims.kind, "rejected non-access bearer token");
                Err(GuardError::Unauthenticated)
            }
            Err(e) => {
                debug!("rejected bearer token: {e}");
                Err(GuardError::Unauthenticated)
            }
        }
    }

    fn authorize(
        &self,
        access_token: &str,
        resource_owner_id: UserId,
    ) -> Result<UserId, GuardError> {
        let caller = self.authenticate(access_token)?;
        if caller != resource_owner_id {
            debug!(%caller, owner = %resource_owner_id, "ownership check failed");
            return Err(GuardError::Forbidden);
        }
        Ok(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::JwtHs256Codec;
    use crate::application_impl::test_keys::{test_config, test_keyring};
    use crate::domain_port::ManualClock;
    use chrono::{Duration, Utc};

    fn setup() -> (TokenAuthorizationGuard, Arc<JwtHs256Codec>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = Arc::new(JwtHs256Codec::new(
            test_config(),
            test_keyring(),
            clock.clone(),
        ));
        (TokenAuthorizationGuard::new(codec.clone()), codec, clock)
    }

    #[test]
    fn owner_is_authorized_everyone_else_is_forbidden() {
        let (guard, codec, _clock) = setup();
        let owner = UserId::new_random();
        let token = codec
            .issue(owner, TokenKind::Access, Duration::minutes(15))
            .unwrap()
            .token;

        assert_eq!(guard.authorize(&token, owner), Ok(owner));
        for _ in 0..8 {
            assert_eq!(
                guard.authorize(&token, UserId::new_random()),
                Err(GuardError::Forbidden)
            );
        }
        // pure: repeated calls agree
        assert_eq!(guard.authorize(&token, owner), Ok(owner));
    }

    #[test]
    fn refresh_tokens_are_not_bearer_credentials() {
        let (guard, codec, _clock) = setup();
        let owner = UserId::new_random();
        let refresh = codec
            .issue(owner, TokenKind::Refresh, Duration::days(7))
            .unwrap()
            .token;

        assert_eq!(
            guard.authorize(&refresh, owner),
            Err(GuardError::Unauthenticated)
        );
    }

    #[test]
    fn invalid_tokens_are_unauthenticated_before_ownership() {
        let (guard, codec, clock) = setup();
        let owner = UserId::new_random();
        let token = codec
            .issue(owner, TokenKind::Access, Duration::minutes(15))
            .unwrap()
            .token;

        assert_eq!(
            guard.authorize("garbage", owner),
            Err(GuardError::Unauthenticated)
        );

        clock.advance(Duration::minutes(16));
        assert_eq!(
            guard.authorize(&token, UserId::new_random()),
            Err(GuardError::Unauthenticated)
        );
        assert_eq!(guard.authenticate(&token), Err(GuardError::Unauthenticated));
    }
}
