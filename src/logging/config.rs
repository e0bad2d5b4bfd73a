use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::env_or;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Logging settings, read from ENVIRONMENT, LOG_LEVEL and LOG_DIR
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub environment: String,
    pub level: LogLevel,
    pub dir: PathBuf,
}

impl LogConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Directive used when RUST_LOG is not set
    pub fn default_directive(&self) -> String {
        format!(
            "pfd_backend={},tower_http=debug,axum=debug",
            self.level
        )
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        let environment: String = env_or("ENVIRONMENT", "development".to_string());
        let fallback = if environment == "production" {
            LogLevel::Info
        } else {
            LogLevel::Debug
        };
        Self {
            level: env_or("LOG_LEVEL", fallback),
            dir: env_or("LOG_DIR", PathBuf::from("logs")),
            environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parses_case_insensitively() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_default_directive_uses_level() {
        let config = LogConfig {
            environment: "production".to_string(),
            level: LogLevel::Info,
            dir: PathBuf::from("logs"),
        };
        assert!(config.is_production());
        assert_eq!(
            config.default_directive(),
            "pfd_backend=info,tower_http=debug,axum=debug"
        );
    }
}
