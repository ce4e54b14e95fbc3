use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-local session store.
///
/// Records are sharded by user, so every mutation of one user's sessions runs
/// under that user's shard lock. `rotate` flips the old record and inserts the
/// new one inside a single lock section, which gives both the single-winner
/// guarantee and the "revoke_all after a lost race also catches the winner's
/// new session" property. Nothing awaits while a lock is held.
pub struct MemorySessionStore {
    sessions: DashMap<UserId, HashMap<Jti, SessionRecord>>,
    owners: DashMap<Jti, UserId>,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(refresh_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        MemorySessionStore {
            sessions: DashMap::new(),
            owners: DashMap::new(),
            refresh_ttl,
            clock,
        }
    }

    fn new_record(&self, user_id: UserId, now: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            jti: Jti::new_random(),
            user_id,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            revoked: false,
            replaced_by: None,
        }
    }

    fn owner_of(&self, jti: &Jti) -> Option<UserId> {
        self.owners.get(jti).map(|owner| *owner)
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: UserId) -> Result<SessionRecord, SessionStoreError> {
        let record = self.new_record(user_id, self.clock.now());
        self.sessions
            .entry(user_id)
            .or_default()
            .insert(record.jti, record.clone());
        self.owners.insert(record.jti, user_id);
        Ok(record)
    }

    async fn get(&self, jti: Jti) -> Result<Option<SessionRecord>, SessionStoreError> {
        let Some(owner) = self.owner_of(&jti) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&owner)
            .and_then(|sessions| sessions.get(&jti).cloned()))
    }

    async fn revoke(&self, jti: Jti) -> Result<(), SessionStoreError> {
        let Some(owner) = self.owner_of(&jti) else {
            return Ok(());
        };
        if let Some(mut sessions) = self.sessions.get_mut(&owner) {
            if let Some(record) = sessions.get_mut(&jti) {
                record.revoked = true;
            }
        }
        Ok(())
    }

    async fn revoke_all(&self, user_id: UserId) -> Result<u64, SessionStoreError> {
        let mut flipped = 0;
        if let Some(mut sessions) = self.sessions.get_mut(&user_id) {
            for record in sessions.values_mut().filter(|r| !r.revoked) {
                record.revoked = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn rotate(&self, old_jti: Jti) -> Result<SessionRecord, SessionStoreError> {
        let now = self.clock.now();
        let owner = self.owner_of(&old_jti).ok_or(SessionStoreError::NotFound)?;

        let mut sessions = self
            .sessions
            .get_mut(&owner)
            .ok_or(SessionStoreError::NotFound)?;
        let old = sessions
            .get_mut(&old_jti)
            .ok_or(SessionStoreError::NotFound)?;
        if old.is_rotated() {
            return Err(SessionStoreError::ReuseDetected {
                user_id: owner,
                jti: old_jti,
            });
        }
        if old.revoked || old.is_expired(now) {
            return Err(SessionStoreError::NotFound);
        }

        let replacement = self.new_record(owner, now);
        old.revoked = true;
        old.replaced_by = Some(replacement.jti);
        sessions.insert(replacement.jti, replacement.clone());
        drop(sessions);

        self.owners.insert(replacement.jti, owner);
        Ok(replacement)
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<SessionRecord>, SessionStoreError> {
        let now = self.clock.now();
        let mut active: Vec<SessionRecord> = self
            .sessions
            .get(&user_id)
            .map(|sessions| {
                sessions
                    .values()
                    .filter(|r| r.is_active(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(active)
    }

    async fn purge_expired(&self) -> Result<u64, SessionStoreError> {
        let now = self.clock.now();
        let mut removed = Vec::new();
        self.sessions.retain(|_, sessions| {
            sessions.retain(|jti, record| {
                let dead = record.is_expired(now);
                if dead {
                    removed.push(*jti);
                }
                !dead
            });
            !sessions.is_empty()
        });
        for jti in &removed {
            self.owners.remove(jti);
        }
        Ok(removed.len() as u64)
    }
}
