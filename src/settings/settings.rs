use anyhow::{Result, anyhow, bail};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const MIN_SIGNING_SECRET_LEN: usize = 32;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub http: Http,
    pub log: Log,
    pub store: Store,
}

/// A configured credential. `Debug` never shows the value.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    pub signing_secret: Secret,
    pub session_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub rotation_timeout_ms: u64,
    pub argon2: Argon2Cost,
}

impl Auth {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }

    pub fn rotation_timeout(&self) -> Duration {
        Duration::from_millis(self.rotation_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Argon2Cost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl Http {
    /// Cert and key paths when TLS is configured.
    pub fn tls(&self) -> Option<(&str, &str)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountBackend {
    Memory,
    Mysql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshBackend {
    Memory,
    Mysql,
    Redis,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub accounts: AccountBackend,
    pub refresh_tokens: RefreshBackend,
    pub mysql_dsn: Option<Secret>,
    pub redis_dsn: Option<Secret>,
    pub redis_prefix: String,
    pub purge_interval_secs: u64,
}

impl Store {
    pub fn needs_mysql(&self) -> bool {
        self.accounts == AccountBackend::Mysql || self.refresh_tokens == RefreshBackend::Mysql
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.auth.signing_secret.expose().len() < MIN_SIGNING_SECRET_LEN {
            bail!("auth.signing_secret must be at least {MIN_SIGNING_SECRET_LEN} bytes");
        }
        if self.auth.session_ttl_secs == 0 || self.auth.refresh_ttl_secs == 0 {
            bail!("auth.session_ttl_secs and auth.refresh_ttl_secs must be at least 1");
        }
        if self.auth.rotation_timeout_ms == 0 {
            bail!("auth.rotation_timeout_ms must be positive");
        }
        if self.store.needs_mysql() && self.store.mysql_dsn.is_none() {
            bail!("store.mysql_dsn is required by the mysql backend");
        }
        if self.store.refresh_tokens == RefreshBackend::Redis && self.store.redis_dsn.is_none() {
            bail!("store.redis_dsn is required by the redis backend");
        }
        if self.store.purge_interval_secs == 0 {
            bail!("store.purge_interval_secs must be at least 1");
        }
        if self.http.cert_path.is_some() != self.http.key_path.is_some() {
            bail!("http.cert_path and http.key_path must be set together");
        }
        Ok(())
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

fn environment() -> Environment {
    Environment::with_prefix("BOXED")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Settings> {
    let settings: Settings = builder
        .add_source(environment())
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

/// Loads `path` (or the build-profile default), applies `BOXED_*`
/// environment overrides and validates the result.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);
    finish(Config::builder().add_source(File::with_name(path)))
}

pub fn parse_settings_str(toml: &str) -> Result<Settings> {
    finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
}
