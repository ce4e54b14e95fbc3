use super::util::is_dup_key;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use uuid::Uuid;

/// User directory over the `user` table (see `sql/schema.sql`).
pub struct MySqlUserRepo {
    pool: MySqlPool,
}

impl MySqlUserRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlUserRepo { pool }
    }

    #[inline]
    fn uid_as_bytes(id: &UserId) -> &[u8] {
        id.0.as_bytes()
    }

    #[inline]
    fn uid_from_bytes(id: &[u8]) -> Result<UserId, AuthError> {
        Ok(UserId(
            Uuid::from_slice(id).map_err(|e| AuthError::Internal(e.to_string()))?,
        ))
    }

    fn row_to_user(row: MySqlRow) -> Result<User, AuthError> {
        let user_id_bytes: Vec<u8> = row.try_get("user_id").map_err(store_error)?;
        let user_id = Self::uid_from_bytes(&user_id_bytes)?;

        let handle: String = row.try_get("handle").map_err(store_error)?;
        let password_hash: String = row.try_get("password_hash").map_err(store_error)?;
        let is_active: bool = row.try_get("is_active").map_err(store_error)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_error)?;

        Ok(User {
            user_id,
            handle,
            password_hash,
            is_active,
            created_at,
        })
    }
}

fn store_error(err: sqlx::Error) -> AuthError {
    AuthError::Unavailable(err.to_string())
}

#[async_trait::async_trait]
impl UserRepo for MySqlUserRepo {
    async fn create(&self, user: &User) -> Result<(), AuthError> {
        sqlx::query(
            r#"
INSERT INTO user (user_id, handle, password_hash, is_active, created_at)
VALUES (?, ?, ?, ?, ?)
"#,
        )
        .bind(Self::uid_as_bytes(&user.user_id))
        .bind(&user.handle)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                AuthError::HandleTaken
            } else {
                store_error(e)
            }
        })?;

        Ok(())
    }

    async fn get_by_handle(&self, handle: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(
            r#"
SELECT user_id, handle, password_hash, is_active, created_at
FROM user
WHERE handle = ?
"#,
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(Self::row_to_user).transpose()
    }

    async fn get_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(
            r#"
SELECT user_id, handle, password_hash, is_active, created_at
FROM user
WHERE user_id = ?
"#,
        )
        .bind(Self::uid_as_bytes(&user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(Self::row_to_user).transpose()
    }
}
