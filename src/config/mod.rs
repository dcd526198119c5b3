//! Configuration Module
//!
//! Handles configuration loading, validation, and management for the
//! authentication-state store.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AuthStateError;
use crate::utils::RetryConfig;

/// Column width of `session` in the schema.
pub const MAX_SESSION_LEN: usize = 50;

/// MySQL identifier length limit.
const MAX_TABLE_NAME_LEN: usize = 64;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database driver behind the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    /// MySQL / MariaDB / TiDB server
    #[default]
    Mysql,
    /// Embedded SQLite file (local development, tests)
    Sqlite,
}

/// Connection, table and retry settings for one credential session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database driver (default: mysql)
    #[serde(default)]
    pub driver: Driver,

    /// Database host (default: "localhost")
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: 3306)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database user (default: "root")
    #[serde(default = "default_user")]
    pub user: String,

    /// Password of the database user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Alias for `password`, used in multi-factor setups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password1: Option<String>,

    /// Second-factor password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password2: Option<String>,

    /// Third-factor password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password3: Option<String>,

    /// Database (schema) name (default: "base")
    #[serde(default = "default_database")]
    pub database: String,

    /// Table holding the auth rows (default: "auth")
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Delay between retry attempts in milliseconds (default: 200)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_request_delay_ms: u64,

    /// Maximum pooled connections (default: 10)
    #[serde(default = "default_connection_limit")]
    pub connection_limit: u32,

    /// Attempts per statement before giving up (default: 10)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Statements allowed to wait for a connection; 0 means unbounded (default: 0)
    #[serde(default)]
    pub queue_limit: u32,

    /// TCP keep-alive on connections (default: true)
    #[serde(default = "default_true")]
    pub enable_keep_alive: bool,

    /// Delay before the first keep-alive probe in milliseconds (default: 5000)
    #[serde(default = "default_keep_alive_delay_ms")]
    pub keep_alive_initial_delay_ms: u64,

    /// TLS settings; plaintext when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Source address for outgoing connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,

    /// Unix socket path; host and port are ignored when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Allow the legacy (insecure) authentication method
    #[serde(default)]
    pub insecure_auth: bool,

    /// Connection acts as a server (default: false)
    #[serde(default)]
    pub is_server: bool,

    /// SQLite database file, or ":memory:" (sqlite driver only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,

    /// Session identifier partitioning every row in the table
    #[serde(default)]
    pub session: String,

    /// Return an error instead of an empty result when all attempts fail
    #[serde(default)]
    pub fail_on_exhausted_retries: bool,
}

/// TLS options for the MySQL driver.
///
/// `ca`, `cert` and `key` take a file path or inline PEM text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Passphrase for the private key or PFX bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// PFX bundle (not supported by the driver, kept for reference)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfx: Option<String>,

    /// Reject servers whose certificate does not chain to `ca` (default: true)
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,

    /// Also check the certificate host name (default: false)
    #[serde(default)]
    pub verify_identity: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphers: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca: None,
            cert: None,
            key: None,
            passphrase: None,
            pfx: None,
            reject_unauthorized: true,
            verify_identity: false,
            min_version: None,
            max_version: None,
            ciphers: None,
            crl: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_database() -> String {
    "base".to_string()
}

fn default_table_name() -> String {
    "auth".to_string()
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_connection_limit() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    10
}

fn default_keep_alive_delay_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: Driver::default(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            password1: None,
            password2: None,
            password3: None,
            database: default_database(),
            table_name: default_table_name(),
            retry_request_delay_ms: default_retry_delay_ms(),
            connection_limit: default_connection_limit(),
            max_retries: default_max_retries(),
            queue_limit: 0,
            enable_keep_alive: true,
            keep_alive_initial_delay_ms: default_keep_alive_delay_ms(),
            tls: None,
            local_address: None,
            socket_path: None,
            insecure_auth: false,
            is_server: false,
            sqlite_path: None,
            session: String::new(),
            fail_on_exhausted_retries: false,
        }
    }
}

impl StoreConfig {
    /// MySQL defaults for the given session.
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            ..Self::default()
        }
    }

    /// SQLite store at `path` (use ":memory:" for a throwaway database).
    pub fn sqlite(path: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            driver: Driver::Sqlite,
            sqlite_path: Some(path.into()),
            session: session.into(),
            ..Self::default()
        }
    }

    /// Password sent to the server: `password`, falling back to `password1`.
    pub fn effective_password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .or(self.password1.as_deref())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.retry_request_delay_ms),
        )
    }

    /// Options that were set but have no equivalent in the MySQL driver.
    pub fn unsupported_options(&self) -> Vec<&'static str> {
        let mut unsupported = Vec::new();
        if self.password2.is_some() {
            unsupported.push("password2");
        }
        if self.password3.is_some() {
            unsupported.push("password3");
        }
        if self.local_address.is_some() {
            unsupported.push("local_address");
        }
        if self.insecure_auth {
            unsupported.push("insecure_auth");
        }
        if self.is_server {
            unsupported.push("is_server");
        }
        if !self.enable_keep_alive || self.keep_alive_initial_delay_ms != default_keep_alive_delay_ms() {
            unsupported.push("keep_alive");
        }
        if let Some(tls) = &self.tls {
            if tls.passphrase.is_some() {
                unsupported.push("tls.passphrase");
            }
            if tls.pfx.is_some() {
                unsupported.push("tls.pfx");
            }
            if tls.min_version.is_some() || tls.max_version.is_some() {
                unsupported.push("tls.min_version/max_version");
            }
            if tls.ciphers.is_some() {
                unsupported.push("tls.ciphers");
            }
            if tls.crl.is_some() {
                unsupported.push("tls.crl");
            }
        }
        unsupported
    }

    /// Check the settings the store depends on.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.session.is_empty() {
            return Err(AuthStateError::InvalidConfig(
                "session identifier is required".to_string(),
            ));
        }
        if self.session.chars().count() > MAX_SESSION_LEN {
            return Err(AuthStateError::InvalidConfig(format!(
                "session identifier exceeds {} characters",
                MAX_SESSION_LEN
            )));
        }
        validate_table_name(&self.table_name)?;
        if self.connection_limit == 0 {
            return Err(AuthStateError::InvalidConfig(
                "connection_limit must be greater than zero".to_string(),
            ));
        }
        if self.driver == Driver::Sqlite && self.sqlite_path.is_none() {
            return Err(AuthStateError::InvalidConfig(
                "sqlite driver requires sqlite_path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> crate::error::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AuthStateError::InvalidConfig(format!(
            "invalid table name: {:?}",
            name
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files. Setting it enables file output.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.config/mysql-auth-state/config.toml
    /// 3. Local config: ./auth-state.toml
    /// 4. Environment variables
    pub fn load() -> Result<Self> {
        tracing::debug!("Loading configuration...");

        let mut config = Self::default();

        if let Some(system_config_path) = Self::system_config_path()
            && system_config_path.exists() {
                tracing::debug!("Loading system config from: {:?}", system_config_path);
                config = Self::merge_from_file(&system_config_path)?;
            }

        let local_config_path = Self::local_config_path();
        if local_config_path.exists() {
            tracing::debug!("Loading local config from: {:?}", local_config_path);
            config = Self::merge_from_file(&local_config_path)?;
        }

        config = Self::apply_env_overrides(config)?;

        tracing::debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load configuration from a specific file path
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. Custom config file (specified path)
    /// 3. Environment variables
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading configuration from custom path: {:?}", path);

        if !path.exists() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        let config = Self::merge_from_file(path)?;
        let config = Self::apply_env_overrides(config)?;

        tracing::debug!("Configuration loaded successfully from custom path");
        Ok(config)
    }

    /// Get the system config path: ~/.config/mysql-auth-state/config.toml
    fn system_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mysql-auth-state").join("config.toml"))
    }

    /// Get the local config path: ./auth-state.toml
    fn local_config_path() -> PathBuf {
        PathBuf::from("./auth-state.toml")
    }

    /// Parse a TOML file. Fields missing from the file take their defaults;
    /// a later file replaces an earlier one entirely.
    fn merge_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut config: Self) -> Result<Self> {
        let store = &mut config.store;

        if let Ok(driver) = std::env::var("AUTH_STATE_DRIVER") {
            store.driver = match driver.to_ascii_lowercase().as_str() {
                "mysql" => Driver::Mysql,
                "sqlite" => Driver::Sqlite,
                other => anyhow::bail!("Unknown AUTH_STATE_DRIVER: {}", other),
            };
        }

        if let Ok(host) = std::env::var("AUTH_STATE_DB_HOST") {
            store.host = host;
        }

        if let Ok(port) = std::env::var("AUTH_STATE_DB_PORT") {
            store.port = port
                .parse()
                .with_context(|| format!("Invalid AUTH_STATE_DB_PORT: {}", port))?;
        }

        if let Ok(user) = std::env::var("AUTH_STATE_DB_USER") {
            store.user = user;
        }

        if let Ok(password) = std::env::var("AUTH_STATE_DB_PASSWORD") {
            store.password = Some(password);
        }

        if let Ok(database) = std::env::var("AUTH_STATE_DB_NAME") {
            store.database = database;
        }

        if let Ok(table) = std::env::var("AUTH_STATE_TABLE") {
            store.table_name = table;
        }

        if let Ok(path) = std::env::var("AUTH_STATE_SQLITE_PATH") {
            store.sqlite_path = Some(path);
        }

        if let Ok(session) = std::env::var("AUTH_STATE_SESSION") {
            store.session = session;
        }

        if let Ok(retries) = std::env::var("AUTH_STATE_MAX_RETRIES") {
            store.max_retries = retries.parse().unwrap_or(default_max_retries());
        }

        if let Ok(delay) = std::env::var("AUTH_STATE_RETRY_DELAY_MS") {
            store.retry_request_delay_ms = delay.parse().unwrap_or(default_retry_delay_ms());
        }

        if let Ok(log_level) = std::env::var("AUTH_STATE_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        if let Ok(log_dir) = std::env::var("AUTH_STATE_LOG_DIR") {
            config.logging.dir = Some(PathBuf::from(log_dir));
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        tracing::debug!("Validating configuration...");

        self.store.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Copy with every password and key replaced by a marker, for display.
    pub fn redacted(&self) -> Self {
        fn mask(value: &mut Option<String>) {
            if value.is_some() {
                *value = Some("[SET]".to_string());
            }
        }

        let mut copy = self.clone();
        mask(&mut copy.store.password);
        mask(&mut copy.store.password1);
        mask(&mut copy.store.password2);
        mask(&mut copy.store.password3);
        if let Some(tls) = copy.store.tls.as_mut() {
            mask(&mut tls.key);
            mask(&mut tls.passphrase);
            mask(&mut tls.pfx);
        }
        copy
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Configuration saved to: {:?}", path);
        Ok(())
    }
}
