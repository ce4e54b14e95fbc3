use crate::domain_model::UserId;

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
}

/// Per-request identity and ownership check. Implementations are pure.
pub trait AuthorizationGuard: Send + Sync {
    /// Resolves the caller of a valid access token.
    fn authenticate(&self, access_token: &str) -> Result<UserId, GuardError>;

    /// Resolves the caller and requires them to own the target resource.
    fn authorize(
        &self,
        access_token: &str,
        resource_owner_id: UserId,
    ) -> Result<UserId, GuardError>;
}
