use crate::application_port::*;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `HandleTaken` when the handle is already registered.
    async fn create(&self, user: &User) -> Result<(), AuthError>;

    /// Lookup by normalized handle (for login).
    async fn get_by_handle(&self, handle: &str) -> Result<Option<User>, AuthError>;

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError>;
}
