//! Runtime configuration, read from environment variables with development
//! defaults.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Secret used when `JWT_SECRET` is not set. Refused in production.
pub const DEFAULT_JWT_SECRET: &str = "default-jwt-secret-change-in-production";

/// URL prefix under which uploaded component media is served.
pub const MEDIA_URL_PREFIX: &str = "/media";

/// Read `key` from the environment and parse it, falling back to `default`
/// when unset or unparsable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub bcrypt_cost: u32,
    /// Root directory for uploaded component media.
    pub media_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 8000),
            jwt_secret: std::env::var("JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string()),
            access_token_minutes: env_or("ACCESS_TOKEN_MINUTES", 15),
            refresh_token_days: env_or("REFRESH_TOKEN_DAYS", 7),
            bcrypt_cost: env_or("BCRYPT_COST", bcrypt::DEFAULT_COST),
            media_dir: std::env::var("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("media")),
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_missing_key() {
        let value: u32 = env_or("PFD_TEST_SURELY_UNSET_KEY", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_bind_addr_combines_host_and_port() {
        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 9000,
            ..AppConfig::default()
        };
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn test_default_secret_is_detected() {
        let config = AppConfig {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            ..AppConfig::default()
        };
        assert!(config.uses_default_secret());
    }
}
