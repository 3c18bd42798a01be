//! Configuration module for idp-service.

use std::env;

use secrecy::{ExposeSecret, Secret};
use service_core::config::{self as core_config, Environment, config_error, get_env, get_env_parsed};
use service_core::error::AppError;

use crate::services::password::HashScheme;
use crate::services::session_authority::DEFAULT_SESSION_TTL_MINUTES;

pub const DEFAULT_PURGE_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    pub purge_interval_minutes: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub secret_salt: Secret<String>,
    pub password_hasher: HashScheme,
    pub admin_role: String,
    /// Only enable behind a proxy that overwrites the forwarding headers.
    pub trust_proxy_headers: bool,
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ttl_minutes)
    }

    pub fn purge_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.purge_interval_minutes * 60)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            purge_interval_minutes: DEFAULT_PURGE_INTERVAL_MINUTES,
        }
    }
}

impl IdpConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let environment = Environment::from_env()?;
        let is_prod = environment.is_prod();

        let ttl_minutes: i64 = get_env_parsed("IDP_SESSION_TTL", Some("30"), is_prod)?;

        let config = IdpConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("idp-service"), is_prod)?,
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: get_env_parsed("DATABASE_MIN_CONNECTIONS", Some("2"), is_prod)?,
            },
            session: SessionConfig {
                // Zero selects the default lifetime.
                ttl_minutes: if ttl_minutes == 0 {
                    DEFAULT_SESSION_TTL_MINUTES
                } else {
                    ttl_minutes
                },
                purge_interval_minutes: get_env_parsed("IDP_PURGE_INTERVAL", Some("30"), is_prod)?,
            },
            security: SecurityConfig {
                secret_salt: Secret::new(get_env("IDP_SECRET_SALT", Some(""), is_prod)?),
                password_hasher: get_env_parsed("IDP_PASSWORD_HASHER", Some("argon2"), is_prod)?,
                admin_role: get_env("IDP_ADMIN_ROLE", Some(DEFAULT_ADMIN_ROLE), is_prod)?,
                trust_proxy_headers: get_env_parsed("IDP_TRUST_PROXY_HEADERS", Some("true"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.session.ttl_minutes <= 0 {
            return Err(config_error("IDP_SESSION_TTL must be a positive number of minutes"));
        }
        if self.session.purge_interval_minutes == 0 {
            return Err(config_error("IDP_PURGE_INTERVAL must be at least one minute"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(config_error(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS",
            ));
        }
        if self.security.admin_role.trim().is_empty() {
            return Err(config_error("IDP_ADMIN_ROLE cannot be empty"));
        }
        if self.environment.is_prod() && self.security.secret_salt.expose_secret().is_empty() {
            return Err(config_error("IDP_SECRET_SALT cannot be empty in production"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "ENVIRONMENT",
        "DATABASE_URL",
        "IDP_SESSION_TTL",
        "IDP_PURGE_INTERVAL",
        "IDP_SECRET_SALT",
        "IDP_PASSWORD_HASHER",
        "IDP_ADMIN_ROLE",
        "IDP_TRUST_PROXY_HEADERS",
    ];

    fn clear() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_dev_defaults() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/idp");

        let config = IdpConfig::from_env().unwrap();
        assert_eq!(config.session.ttl_minutes, 30);
        assert_eq!(config.session.purge_interval_minutes, 30);
        assert_eq!(config.security.password_hasher, HashScheme::Argon2);
        assert_eq!(config.security.admin_role, "admin");
        assert!(config.security.trust_proxy_headers);
        assert_eq!(config.session.ttl(), chrono::Duration::minutes(30));

        clear();
    }

    #[test]
    #[serial]
    fn test_zero_ttl_selects_default() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/idp");
        env::set_var("IDP_SESSION_TTL", "0");
        env::set_var("IDP_PASSWORD_HASHER", "sha256");

        let config = IdpConfig::from_env().unwrap();
        assert_eq!(config.session.ttl_minutes, DEFAULT_SESSION_TTL_MINUTES);
        assert_eq!(config.security.password_hasher, HashScheme::Sha256);

        clear();
    }

    #[test]
    #[serial]
    fn test_zero_purge_interval_is_rejected() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/idp");
        env::set_var("IDP_PURGE_INTERVAL", "0");

        let err = IdpConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("IDP_PURGE_INTERVAL"));

        clear();
    }

    #[test]
    #[serial]
    fn test_proxy_headers_can_be_distrusted() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/idp");
        env::set_var("IDP_TRUST_PROXY_HEADERS", "false");

        let config = IdpConfig::from_env().unwrap();
        assert!(!config.security.trust_proxy_headers);

        env::set_var("IDP_TRUST_PROXY_HEADERS", "sometimes");
        let err = IdpConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("IDP_TRUST_PROXY_HEADERS"));

        clear();
    }

    #[test]
    #[serial]
    fn test_database_url_is_required() {
        clear();
        assert!(IdpConfig::from_env().is_err());
    }
}
