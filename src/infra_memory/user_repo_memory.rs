use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Default)]
pub struct MemoryUserRepo {
    users: DashMap<UserId, User>,
    handles: DashMap<String, UserId>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the user does not exist.
    pub fn set_active(&self, user_id: UserId, is_active: bool) -> bool {
        match self.users.get_mut(&user_id) {
            Some(mut user) => {
                user.is_active = is_active;
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, user: &User) -> Result<(), AuthError> {
        match self.handles.entry(user.handle.clone()) {
            Entry::Occupied(_) => Err(AuthError::HandleTaken),
            Entry::Vacant(slot) => {
                self.users.insert(user.user_id, user.clone());
                slot.insert(user.user_id);
                Ok(())
            }
        }
    }

    async fn get_by_handle(&self, handle: &str) -> Result<Option<User>, AuthError> {
        let Some(user_id) = self.handles.get(handle).map(|id| *id) else {
            return Ok(None);
        };
        self.get_by_id(user_id).await
    }

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError> {
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }
}
