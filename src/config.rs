//! Configuration management
//!
//! All configuration comes from environment variables, validated at boot.
//! `DATABASE_URL` and (in production) `JWT_SECRET` are hard requirements;
//! development runs fall back to the in-memory repository with a warning.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
    pub resolvers: ResolverConfig,
    pub logging: LoggingConfig,
    /// Deployment environment; `"production"` tightens validation.
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string; absent in development means in-memory.
    pub url: Option<String>,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Required in production; consumed by the external auth layer.
    pub jwt_secret: Option<String>,
    /// Allowed CORS origins, or `None` for any origin.
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Disabling persistence yields sentinel events and no chain.
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Token for the GitHub-backed resolver, if configured.
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_queries: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8420,
            },
            database: DatabaseConfig {
                url: None,
                pool_size: 10,
            },
            security: SecurityConfig {
                jwt_secret: None,
                cors_origins: None,
            },
            audit: AuditConfig { enabled: true },
            resolvers: ResolverConfig { github_token: None },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_queries: false,
            },
            environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and validate it.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            config.server.port = port.parse().context("Invalid PORT value")?;
        }

        config.environment =
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        config.database.url = env::var("DATABASE_URL").ok();
        if let Ok(pool_size) = env::var("DB_POOL_SIZE") {
            config.database.pool_size =
                pool_size.parse().context("Invalid DB_POOL_SIZE value")?;
        }

        config.security.jwt_secret = env::var("JWT_SECRET").ok();
        if let Ok(origins) = env::var("CORS_ORIGINS") {
            config.security.cors_origins = parse_cors_origins(&origins);
        }

        if let Ok(enabled) = env::var("ENABLE_AUDIT_LOG") {
            config.audit.enabled = enabled.parse().context("Invalid ENABLE_AUDIT_LOG value")?;
        }
        if let Ok(log_queries) = env::var("LOG_QUERIES") {
            config.logging.log_queries =
                log_queries.parse().context("Invalid LOG_QUERIES value")?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        config.resolvers.github_token = env::var("GITHUB_TOKEN").ok();

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validate the configuration for consistency and hard requirements.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Server port must be non-zero");
        }
        if self.database.pool_size == 0 {
            anyhow::bail!("DB_POOL_SIZE must be non-zero");
        }

        if self.is_production() {
            if self.database.url.is_none() {
                anyhow::bail!("DATABASE_URL is required in production");
            }
            match &self.security.jwt_secret {
                None => anyhow::bail!("JWT_SECRET is required in production"),
                Some(secret) if secret.len() < 32 => {
                    anyhow::bail!("JWT_SECRET is too short (minimum 32 characters)")
                }
                Some(_) => {}
            }
        } else if self.database.url.is_none() {
            warn!("DATABASE_URL not set; using in-memory storage (development only)");
        }

        Ok(())
    }
}

/// Parse a CORS origin list; `"*"` means any origin.
fn parse_cors_origins(raw: &str) -> Option<Vec<String>> {
    if raw.trim() == "*" {
        return None;
    }
    Some(
        raw.split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_in_development() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_production());
    }

    #[test]
    fn test_production_requires_database_and_secret() {
        let mut config = AppConfig::default();
        config.environment = "production".to_string();
        assert!(config.validate().is_err());

        config.database.url = Some("postgresql://localhost/irrl".to_string());
        assert!(config.validate().is_err());

        config.security.jwt_secret = Some("short".to_string());
        assert!(config.validate().is_err());

        config.security.jwt_secret =
            Some("0123456789abcdef0123456789abcdef".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cors_origin_parsing() {
        assert_eq!(parse_cors_origins("*"), None);
        assert_eq!(
            parse_cors_origins("https://a.example, https://b.example"),
            Some(vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ])
        );
    }
}
