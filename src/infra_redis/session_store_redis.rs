use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, RedisWrite, Script, ToRedisArgs};
use std::collections::HashMap;
use std::sync::Arc;

const SESSION_ROTATE: &str = include_str!("session_rotate.lua");
const SESSION_REVOKE: &str = include_str!("session_revoke.lua");
const SESSION_REVOKE_ALL: &str = include_str!("session_revoke_all.lua");

const SCAN_BATCH: usize = 200;

/// Redis-backed session store.
///
/// Layout under `prefix`:
/// - `prefix:session:<jti>` hash with `user_id`, `issued_at`, `expires_at`
///   (unix millis), `revoked` (`0`/`1`) and, once rotated, `replaced_by`,
///   expiring at `expires_at`
/// - `prefix:user:<user_id>` set of the user's jtis
///
/// Revoked records stay until they expire so a replayed rotated token is
/// still recognized as reuse. Mutations that read before they write are Lua
/// scripts, which Redis runs atomically.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisSessionStore {
    pub fn new(
        conn: ConnectionManager,
        prefix: impl Into<String>,
        refresh_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        RedisSessionStore {
            conn,
            prefix: prefix.into(),
            refresh_ttl,
            clock,
        }
    }

    fn session_key(&self, jti: Jti) -> String {
        format!("{}:session:{}", self.prefix, jti)
    }

    fn user_key(&self, user_id: UserId) -> String {
        format!("{}:user:{}", self.prefix, user_id)
    }

    async fn load(
        &self,
        conn: &mut ConnectionManager,
        jti: Jti,
    ) -> Result<Option<SessionRecord>, SessionStoreError> {
        let fields: HashMap<String, String> = conn
            .hgetall(self.session_key(jti))
            .await
            .map_err(unavailable)?;
        parse_record(jti, &fields)
    }
}

impl ToRedisArgs for UserId {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.to_string().as_bytes())
    }
}

impl ToRedisArgs for Jti {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.to_string().as_bytes())
    }
}

fn unavailable(err: RedisError) -> SessionStoreError {
    SessionStoreError::Unavailable(err.to_string())
}

fn corrupt(jti: Jti, what: &str) -> SessionStoreError {
    SessionStoreError::Unavailable(format!("corrupt session record {jti}: {what}"))
}

fn parse_record(
    jti: Jti,
    fields: &HashMap<String, String>,
) -> Result<Option<SessionRecord>, SessionStoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let field = |name: &str| fields.get(name).ok_or_else(|| corrupt(jti, name));
    let millis = |name: &str| -> Result<DateTime<Utc>, SessionStoreError> {
        field(name)?
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| corrupt(jti, name))
    };

    Ok(Some(SessionRecord {
        jti,
        user_id: field("user_id")?
            .parse()
            .map_err(|_| corrupt(jti, "user_id"))?,
        issued_at: millis("issued_at")?,
        expires_at: millis("expires_at")?,
        revoked: field("revoked")? == "1",
        replaced_by: fields
            .get("replaced_by")
            .map(|next| next.parse::<Jti>().map_err(|_| corrupt(jti, "replaced_by")))
            .transpose()?,
    }))
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, user_id: UserId) -> Result<SessionRecord, SessionStoreError> {
        let now = self.clock.now();
        let record = SessionRecord {
            jti: Jti::new_random(),
            user_id,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            revoked: false,
            replaced_by: None,
        };
        let key = self.session_key(record.jti);
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("user_id", user_id.to_string()),
                    ("issued_at", record.issued_at.timestamp_millis().to_string()),
                    ("expires_at", record.expires_at.timestamp_millis().to_string()),
                    ("revoked", "0".to_string()),
                ],
            )
            .ignore()
            .pexpire_at(&key, record.expires_at.timestamp_millis())
            .ignore()
            .sadd(self.user_key(user_id), record.jti)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(record)
    }

    async fn get(&self, jti: Jti) -> Result<Option<SessionRecord>, SessionStoreError> {
        let mut conn = self.conn.clone();
        self.load(&mut conn, jti).await
    }

    async fn revoke(&self, jti: Jti) -> Result<(), SessionStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(SESSION_REVOKE)
            .key(self.session_key(jti))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn revoke_all(&self, user_id: UserId) -> Result<u64, SessionStoreError> {
        let mut conn = self.conn.clone();
        let flipped: u64 = Script::new(SESSION_REVOKE_ALL)
            .key(self.user_key(user_id))
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(flipped)
    }

    async fn rotate(&self, old_jti: Jti) -> Result<SessionRecord, SessionStoreError> {
        let now = self.clock.now();
        let replacement = Jti::new_random();
        let expires_at = now + self.refresh_ttl;
        let mut conn = self.conn.clone();

        let (status, owner): (i64, String) = Script::new(SESSION_ROTATE)
            .key(self.session_key(old_jti))
            .arg(now.timestamp_millis())
            .arg(replacement)
            .arg(expires_at.timestamp_millis())
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match status {
            1 | -2 => {
                let user_id = owner
                    .parse::<UserId>()
                    .map_err(|_| corrupt(old_jti, "user_id"))?;
                if status == -2 {
                    return Err(SessionStoreError::ReuseDetected {
                        user_id,
                        jti: old_jti,
                    });
                }
                Ok(SessionRecord {
                    jti: replacement,
                    user_id,
                    // stored at millisecond precision
                    issued_at: DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis())
                        .unwrap_or(now),
                    expires_at: DateTime::<Utc>::from_timestamp_millis(
                        expires_at.timestamp_millis(),
                    )
                    .unwrap_or(expires_at),
                    revoked: false,
                    replaced_by: None,
                })
            }
            -1 => Err(SessionStoreError::NotFound),
            other => Err(SessionStoreError::Unavailable(format!(
                "unknown rotate script status {other}"
            ))),
        }
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<SessionRecord>, SessionStoreError> {
        let now = self.clock.now();
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(self.user_key(user_id))
            .await
            .map_err(unavailable)?;

        let mut active = Vec::with_capacity(members.len());
        for member in members {
            let Ok(jti) = member.parse::<Jti>() else {
                tracing::warn!(%user_id, member, "skipping malformed session set member");
                continue;
            };
            if let Some(record) = self.load(&mut conn, jti).await? {
                if record.is_active(now) {
                    active.push(record);
                }
            }
        }
        active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(active)
    }

    async fn purge_expired(&self) -> Result<u64, SessionStoreError> {
        // session hashes expire on their own; this drops the set members
        // that still point at them
        let mut conn = self.conn.clone();
        let pattern = format!("{}:user:*", self.prefix);
        let mut cursor: u64 = 0;
        let mut purged = 0u64;

        loop {
            let (next, user_keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            for user_key in user_keys {
                let members: Vec<String> =
                    conn.smembers(&user_key).await.map_err(unavailable)?;
                for member in members {
                    let session_key = format!("{}:session:{}", self.prefix, member);
                    let exists: bool = conn.exists(&session_key).await.map_err(unavailable)?;
                    if !exists {
                        let removed: u64 =
                            conn.srem(&user_key, &member).await.map_err(unavailable)?;
                        purged += removed;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record_reads_millisecond_fields() {
        let jti = Jti::new_random();
        let user_id = UserId::new_random();
        let fields = HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("issued_at".to_string(), "1700000000000".to_string()),
            ("expires_at".to_string(), "1700000900500".to_string()),
            ("revoked".to_string(), "1".to_string()),
        ]);

        let record = parse_record(jti, &fields).unwrap().unwrap();
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.issued_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(record.expires_at.timestamp_millis(), 1_700_000_900_500);
        assert!(record.revoked);
        assert_eq!(record.replaced_by, None);
    }

    #[test]
    fn parse_record_reads_rotation_marker() {
        let next = Jti::new_random();
        let fields = HashMap::from([
            ("user_id".to_string(), UserId::new_random().to_string()),
            ("issued_at".to_string(), "1700000000000".to_string()),
            ("expires_at".to_string(), "1700000900500".to_string()),
            ("revoked".to_string(), "1".to_string()),
            ("replaced_by".to_string(), next.to_string()),
        ]);

        let record = parse_record(Jti::new_random(), &fields).unwrap().unwrap();
        assert_eq!(record.replaced_by, Some(next));
        assert!(record.is_rotated());
    }

    #[test]
    fn parse_record_empty_hash_is_absent() {
        assert_eq!(parse_record(Jti::new_random(), &HashMap::new()).unwrap(), None);
    }

    #[test]
    fn parse_record_rejects_corrupt_fields() {
        let fields = HashMap::from([
            ("user_id".to_string(), "not-a-uuid".to_string()),
            ("issued_at".to_string(), "0".to_string()),
            ("expires_at".to_string(), "0".to_string()),
            ("revoked".to_string(), "0".to_string()),
        ]);
        assert!(matches!(
            parse_record(Jti::new_random(), &fields),
            Err(SessionStoreError::Unavailable(_))
        ));
    }

    async fn live_store() -> Option<RedisSessionStore> {
        let url = std::env::var("GATEKEEPER_TEST_REDIS").ok()?;
        let client = redis::Client::open(url).ok()?;
        let conn = client.get_connection_manager().await.ok()?;
        Some(RedisSessionStore::new(
            conn,
            format!("gatekeeper-test:{}", uuid::Uuid::new_v4()),
            Duration::hours(1),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test]
    #[ignore = "needs GATEKEEPER_TEST_REDIS"]
    async fn rotate_has_one_winner_and_revoke_all_catches_it() {
        let Some(store) = live_store().await else {
            return;
        };
        let store = Arc::new(store);
        let user = UserId::new_random();
        let rec = store.create(user).await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.rotate(rec.jti).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.rotate(rec.jti).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(SessionStoreError::ReuseDetected { user_id, .. }) if *user_id == user
        )));

        assert_eq!(store.list_active(user).await.unwrap().len(), 1);
        assert_eq!(store.revoke_all(user).await.unwrap(), 1);
        assert!(store.list_active(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "needs GATEKEEPER_TEST_REDIS"]
    async fn revoke_is_idempotent_and_logged_out_is_not_found() {
        let Some(store) = live_store().await else {
            return;
        };
        let user = UserId::new_random();
        let rec = store.create(user).await.unwrap();

        store.revoke(rec.jti).await.unwrap();
        store.revoke(rec.jti).await.unwrap();
        store.revoke(Jti::new_random()).await.unwrap();
        assert!(store.get(rec.jti).await.unwrap().unwrap().revoked);
        assert!(matches!(
            store.rotate(rec.jti).await,
            Err(SessionStoreError::NotFound)
        ));
        assert!(matches!(
            store.rotate(Jti::new_random()).await,
            Err(SessionStoreError::NotFound)
        ));
    }
}
