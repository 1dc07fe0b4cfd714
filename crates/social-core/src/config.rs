use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "ServerConfig::default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_cors_origins() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn default_max_body_bytes() -> usize {
        2 * 1024 * 1024
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            cors_origins: Self::default_cors_origins(),
            max_body_bytes: Self::default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// JSON snapshot file. Without one the store lives only in memory.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default = "DatabaseConfig::default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl DatabaseConfig {
    fn default_flush_interval() -> u64 {
        5
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            flush_interval_secs: Self::default_flush_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    // Never serialized; comes from config files or SOCIAL__SECURITY__JWT_SECRET.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<SecretString>,
    #[serde(default = "SecurityConfig::default_token_ttl")]
    pub token_ttl_hours: u64,
}

impl SecurityConfig {
    pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;

    fn default_token_ttl() -> u64 {
        24 * 7
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_ref().map(|s| s.expose_secret())
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: Self::default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "MediaConfig::default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Prefix for returned media URLs, e.g. `https://cdn.example.com`.
    #[serde(default)]
    pub public_base_url: String,
    #[serde(default = "MediaConfig::default_max_upload")]
    pub max_upload_bytes: usize,
}

impl MediaConfig {
    fn default_upload_dir() -> PathBuf {
        PathBuf::from("uploads/images")
    }

    fn default_max_upload() -> usize {
        500_000
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_dir: Self::default_upload_dir(),
            public_base_url: String::new(),
            max_upload_bytes: Self::default_max_upload(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_auth_per_minute")]
    pub auth_per_minute: u32,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer
    /// address. Only enable behind a proxy that sets the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    fn default_auth_per_minute() -> u32 {
        30
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_per_minute: Self::default_auth_per_minute(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            media: MediaConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    pub fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    /// Layers `default.toml`, `<env>.toml`, `local.toml` and `SOCIAL__*`
    /// environment variables, in that order.
    pub fn load(config_dir: &Path, env_name: &str) -> Result<Self> {
        let mut settings: Settings = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix("SOCIAL")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        settings.env = env_name.to_string();
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            !self.server.cors_origins.is_empty(),
            "server.cors_origins must list at least one origin"
        );
        let secret = self
            .security
            .jwt_secret()
            .context("security.jwt_secret must be set")?;
        anyhow::ensure!(
            secret.len() >= 32,
            "security.jwt_secret must be at least 32 characters"
        );
        anyhow::ensure!(
            self.security.token_ttl_hours > 0,
            "security.token_ttl_hours must be > 0"
        );
        anyhow::ensure!(
            self.security.token_ttl_hours <= SecurityConfig::MAX_TOKEN_TTL_HOURS,
            "security.token_ttl_hours cannot exceed {}",
            SecurityConfig::MAX_TOKEN_TTL_HOURS
        );
        anyhow::ensure!(
            self.media.max_upload_bytes > 0,
            "media.max_upload_bytes must be > 0"
        );
        anyhow::ensure!(
            self.media.max_upload_bytes <= self.server.max_body_bytes,
            "media.max_upload_bytes cannot exceed server.max_body_bytes"
        );
        anyhow::ensure!(
            self.rate_limit.auth_per_minute > 0,
            "rate_limit.auth_per_minute must be > 0"
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret(mut s: Settings) -> Settings {
        s.security.jwt_secret = Some(SecretString::from("0123456789abcdef0123456789abcdef".to_string()));
        s
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.media.max_upload_bytes, 500_000);
        assert_eq!(s.security.token_ttl_hours, 168);
        assert!(s.database.snapshot_path.is_none());
    }

    #[test]
    fn test_validate_requires_secret() {
        assert!(Settings::default().validate().is_err());
        assert!(with_secret(Settings::default()).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut s = Settings::default();
        s.security.jwt_secret = Some(SecretString::from("short".to_string()));
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_upload_fits_body_limit() {
        let mut s = with_secret(Settings::default());
        s.media.max_upload_bytes = s.server.max_body_bytes + 1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_caps_token_ttl() {
        let mut s = with_secret(Settings::default());
        s.security.token_ttl_hours = SecurityConfig::MAX_TOKEN_TTL_HOURS;
        assert!(s.validate().is_ok());
        s.security.token_ttl_hours = u64::MAX;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[server]\nport = 9000\n\n[security]\njwt_secret = \"0123456789abcdef0123456789abcdef\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.toml"),
            "[media]\nmax_upload_bytes = 1000\n",
        )
        .unwrap();

        let s = Settings::load(dir.path(), "staging").unwrap();
        assert_eq!(s.env, "staging");
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.media.max_upload_bytes, 1000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_secret_not_serialized() {
        let s = with_secret(Settings::default());
        let out = toml::to_string(&s).unwrap();
        assert!(!out.contains("0123456789abcdef"));
    }
}
