use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use anyhow::anyhow;
use sqlx::{MySql, Pool};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub guard: Arc<dyn AuthorizationGuard>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Option<Pool<MySql>>,
}

fn seconds(secs: u64, what: &str) -> anyhow::Result<chrono::Duration> {
    let secs = i64::try_from(secs).map_err(|_| anyhow!("{what} is out of range: {secs}"))?;
    chrono::Duration::try_seconds(secs).ok_or_else(|| anyhow!("{what} is out of range: {secs}"))
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // region token codec
        let keys = settings
            .token
            .keys
            .iter()
            .map(|key| SigningKey {
                id: key.id.clone(),
                secret: key.secret.clone().into_bytes(),
            })
            .collect();
        let keyring = Arc::new(Keyring::new(&settings.token.active_key_id, keys)?);
        for (key_id, fingerprint) in keyring.fingerprints() {
            info!(
                %key_id,
                %fingerprint,
                active = (key_id == keyring.active_id()),
                "signing key loaded"
            );
        }
        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(
            TokenConfig {
                issuer: settings.token.issuer.clone(),
                audience: settings.token.audience.clone(),
                clock_skew: seconds(settings.token.clock_skew_secs, "token.clock_skew_secs")?,
            },
            keyring,
            clock.clone(),
        ));
        let access_ttl = seconds(settings.token.access_ttl_secs, "token.access_ttl_secs")?;
        let refresh_ttl = seconds(settings.token.refresh_ttl_secs, "token.refresh_ttl_secs")?;
        // endregion

        let credential_hasher: Arc<dyn CredentialHasher> =
            Arc::new(Argon2PasswordHasher::new(Argon2Params {
                memory_kib: settings.password.memory_kib,
                iterations: settings.password.iterations,
                parallelism: settings.password.parallelism,
            })?);

        let session_store: Arc<dyn SessionStore> = match settings.session.backend.as_str() {
            "memory" => Arc::new(MemorySessionStore::new(refresh_ttl, clock.clone())),
            "redis" => {
                let url = settings
                    .session
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("session.redis_url is required for the redis backend"))?;
                let redis_client = redis::Client::open(url)?;
                let redis_manager = redis_client.get_connection_manager().await?;
                Arc::new(RedisSessionStore::new(
                    redis_manager,
                    settings.session.key_prefix.clone(),
                    refresh_ttl,
                    clock.clone(),
                ))
            }
            other => return Err(anyhow!("Unknown session backend: {}", other)),
        };

        let pool = match settings.user.backend.as_str() {
            "memory" => None,
            "mysql" => {
                let url = settings
                    .user
                    .mysql_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("user.mysql_url is required for the mysql backend"))?;
                Some(Pool::<MySql>::connect(url).await?)
            }
            other => return Err(anyhow!("Unknown user backend: {}", other)),
        };
        let user_repo: Arc<dyn UserRepo> = match &pool {
            Some(pool) => Arc::new(MySqlUserRepo::new(pool.clone())),
            None => {
                warn!("users are kept in memory and lost on restart");
                Arc::new(MemoryUserRepo::new())
            }
        };

        let auth_service: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            user_repo,
            credential_hasher,
            token_codec.clone(),
            session_store.clone(),
            clock,
            access_ttl,
        ));
        let guard: Arc<dyn AuthorizationGuard> = Arc::new(TokenAuthorizationGuard::new(token_codec));

        // region runtime infra
        let cancel = CancellationToken::new();

        let sweeper_handle = match settings.session.sweep_interval_secs {
            0 => {
                info!("session sweeper disabled");
                None
            }
            secs => {
                let sweeper = SessionSweeper::new(
                    session_store,
                    std::time::Duration::from_secs(secs),
                    cancel.clone(),
                );
                Some(tokio::spawn(async move { sweeper.run().await }))
            }
        };
        // endregion

        info!(
            session_backend = %settings.session.backend,
            user_backend = %settings.user.backend,
            "server started"
        );

        Ok(Self {
            auth_service,
            guard,
            sweeper_handle: Mutex::new(sweeper_handle),
            cancel,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let sweeper_handle = match self.sweeper_handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = sweeper_handle {
            let r = handle.await;
            info!("sweeper handle dropped: {:?}", r);
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::test_settings;

    #[tokio::test]
    async fn memory_backends_wire_up_end_to_end() {
        let server = Server::try_new(&test_settings()).await.unwrap();

        let user_id = server
            .auth_service
            .signup(SignupInput {
                handle: "wire@example.com".into(),
                password: "Password1".into(),
            })
            .await
            .unwrap();
        let login = server
            .auth_service
            .login(LoginInput {
                handle: "wire@example.com".into(),
                password: "Password1".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            server.guard.authorize(&login.tokens.access_token.0, user_id),
            Ok(user_id)
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let mut settings = test_settings();
        settings.session.sweep_interval_secs = 1;
        let server = Server::try_new(&settings).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), server.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_unknown_backends_and_bad_keyrings() {
        let mut settings = test_settings();
        settings.session.backend = "carrier-pigeon".into();
        assert!(Server::try_new(&settings).await.is_err());

        let mut settings = test_settings();
        settings.user.backend = "mysql".into();
        assert!(Server::try_new(&settings).await.is_err());

        let mut settings = test_settings();
        settings.token.active_key_id = "missing".into();
        assert!(Server::try_new(&settings).await.is_err());

        let mut settings = test_settings();
        settings.token.keys[0].secret = "short".into();
        assert!(Server::try_new(&settings).await.is_err());
    }
}
