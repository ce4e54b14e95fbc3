use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub http: Http,
    pub log: Log,
    pub token: Token,
    #[serde(default)]
    pub password: Password,
    pub session: Session,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    /// TLS is enabled when both paths are set.
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct Token {
    pub issuer: String,
    pub audience: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    pub active_key_id: String,
    pub keys: Vec<Key>,
}

#[derive(Deserialize)]
pub struct Key {
    pub id: String,
    pub secret: String,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Argon2id cost.
#[derive(Debug, Deserialize)]
pub struct Password {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Password {
    fn default() -> Self {
        Password {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub backend: String, // "memory" or "redis"
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// 0 disables the sweeper.
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub backend: String, // "memory" or "mysql"
    pub mysql_url: Option<String>,
}

fn default_access_ttl_secs() -> u64 {
    15 * 60
}

fn default_refresh_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_clock_skew_secs() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "gatekeeper".to_string()
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

const ENV_PREFIX: &str = "GATEKEEPER";

/// Loads the TOML file at `path` (or the build's default), then applies
/// `GATEKEEPER__SECTION__KEY` environment overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    use config::FileFormat;

    const TEST_SETTINGS: &str = r#"
[http]
address = "127.0.0.1:0"

[log]
filter = "debug"

[token]
issuer = "gatekeeper.test"
audience = "tasks.test"
active_key_id = "k1"
keys = [{ id = "k1", secret = "0123456789abcdef0123456789abcdef" }]

[password]
memory_kib = 1024
iterations = 1
parallelism = 1

[session]
backend = "memory"

[user]
backend = "memory"
"#;

    Config::builder()
        .add_source(File::from_str(TEST_SETTINGS, FileFormat::Toml))
        .build()
        .and_then(|config| config.try_deserialize())
        .unwrap()
}
