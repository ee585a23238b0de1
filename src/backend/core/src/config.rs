//! Configuration management.
//!
//! Values come from an optional file and from `WARDEN__`-prefixed
//! environment variables (`WARDEN__AUTH__JWT_SECRET`,
//! `WARDEN__SERVER__PORT`, ...). A plain `JWT_SECRET` is accepted when no
//! secret is configured otherwise.

use serde::Deserialize;
use std::fmt;

use crate::error::{Result, WardenError};
use crate::middleware::auth::{ttl_from_hours, MAX_TOKEN_TTL_HOURS};
use crate::middleware::guard::DEFAULT_ADMIN_ROLE;
use crate::telemetry::TelemetryConfig;

const ENV_PREFIX: &str = "WARDEN";
const FALLBACK_SECRET_VAR: &str = "JWT_SECRET";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub observability: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Requests are abandoned after this many seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Apply pending migrations at startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            run_migrations: default_run_migrations(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared with token issuers
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// Role exempt from ownership checks
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
            admin_role: default_admin_role(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("admin_role", &self.admin_role)
            .finish()
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_run_migrations() -> bool { true }
fn default_token_ttl_hours() -> i64 { crate::middleware::auth::DEFAULT_TOKEN_TTL_HOURS }
fn default_admin_role() -> String { DEFAULT_ADMIN_ROLE.to_string() }

/// The configured secret, or `fallback` when none is configured.
fn resolve_secret(configured: String, fallback: Option<String>) -> String {
    if configured.trim().is_empty() {
        fallback.unwrap_or_default()
    } else {
        configured
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        Self::build(config::Config::builder())
    }

    /// Load from a file, with environment variables taking precedence.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::build(config::Config::builder().add_source(config::File::with_name(path)))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let mut cfg: Config = config.try_deserialize()?;
        cfg.auth.jwt_secret = resolve_secret(
            std::mem::take(&mut cfg.auth.jwt_secret),
            std::env::var(FALLBACK_SECRET_VAR).ok(),
        );
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(WardenError::configuration(
                "auth.jwt_secret is required (WARDEN__AUTH__JWT_SECRET or JWT_SECRET)",
            ));
        }
        if ttl_from_hours(self.auth.token_ttl_hours).is_none() {
            return Err(WardenError::configuration(format!(
                "auth.token_ttl_hours must be between 1 and {}",
                MAX_TOKEN_TTL_HOURS
            )));
        }
        if self.auth.admin_role.trim().is_empty() {
            return Err(WardenError::configuration("auth.admin_role must not be empty"));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(WardenError::configuration("server.request_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
