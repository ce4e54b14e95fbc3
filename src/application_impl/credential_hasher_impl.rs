use crate::application_port::{AuthError, CredentialHasher};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use tracing::{error, warn};

/// Argon2id cost factors.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MiB
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, AuthError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| AuthError::Internal(format!("argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl Argon2PasswordHasher {
    pub fn new(params: Argon2Params) -> Result<Self, AuthError> {
        let argon2 = params.to_argon2()?;
        let filler = uuid::Uuid::new_v4().to_string();
        let dummy_hash = hash_blocking(&argon2, &filler)?;
        Ok(Self { argon2, dummy_hash })
    }
}

fn hash_blocking(argon2: &Argon2<'static>, password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Internal(format!("hash password: {e}")))?;
    Ok(hash.to_string())
}

fn verify_blocking(argon2: &Argon2<'static>, password: &str, hash: &str, dummy: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            warn!("stored password hash is malformed: {e}");
            // pay the full price anyway
            if let Ok(parsed) = PasswordHash::new(dummy) {
                let _ = argon2.verify_password(password.as_bytes(), &parsed);
            }
            false
        }
    }
}

#[async_trait::async_trait]
impl CredentialHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_blocking(&argon2, &password))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    async fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        let password_hash = password_hash.to_owned();
        let dummy = self.dummy_hash.clone();
        match tokio::task::spawn_blocking(move || {
            verify_blocking(&argon2, &password, &password_hash, &dummy)
        })
        .await
        {
            Ok(ok) => ok,
            Err(e) => {
                error!("verify task: {e}");
                false
            }
        }
    }

    async fn verify_dummy(&self, password: &str) {
        let dummy = self.dummy_hash.clone();
        let _ = self.verify_password(password, &dummy).await;
    }
}

#[cfg(test)]
pub(crate) fn cheap_params() -> Argon2Params {
    Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2PasswordHasher {
        Argon2PasswordHasher::new(cheap_params()).unwrap()
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = hasher();
        let hash = hasher.hash_password("Correct-Horse-9").await.unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify_password("Correct-Horse-9", &hash).await);
        assert!(!hasher.verify_password("wrong", &hash).await);
    }

    #[tokio::test]
    async fn single_character_mutations_are_rejected() {
        let hasher = hasher();
        let password = "Secr3tPass";
        let hash = hasher.hash_password(password).await.unwrap();

        for i in 0..password.len() {
            let mut bytes = password.as_bytes().to_vec();
            bytes[i] = if bytes[i] == b'x' { b'y' } else { b'x' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(
                !hasher.verify_password(&mutated, &hash).await,
                "mutation at {i} verified"
            );
        }
        assert!(!hasher.verify_password("Secr3tPas", &hash).await);
        assert!(!hasher.verify_password("Secr3tPassx", &hash).await);
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() {
        let hasher = hasher();
        let a = hasher.hash_password("same_password").await.unwrap();
        let b = hasher.hash_password("same_password").await.unwrap();

        assert_ne!(a, b);
        assert!(hasher.verify_password("same_password", &a).await);
        assert!(hasher.verify_password("same_password", &b).await);
    }

    #[tokio::test]
    async fn malformed_hash_is_false_not_error() {
        let hasher = hasher();
        assert!(!hasher.verify_password("anything", "not-a-phc-string").await);
        assert!(!hasher.verify_password("anything", "").await);
    }

    #[tokio::test]
    async fn verifies_hashes_made_with_other_costs() {
        let strong = Argon2PasswordHasher::new(Argon2Params {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let hash = strong.hash_password("portable").await.unwrap();

        assert!(hasher().verify_password("portable", &hash).await);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = Argon2Params {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(matches!(
            Argon2PasswordHasher::new(params),
            Err(AuthError::Internal(_))
        ));
    }
}
