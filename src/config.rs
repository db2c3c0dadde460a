use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::compose::ComposerKind;

/// Runtime settings, read from `.env` and the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub log_level: String,
    pub composer: ComposerKind,
    pub llm: LlmConfig,
    pub scan_concurrency: usize,
    /// Extra attempts per pair after a transient generation failure.
    pub scan_retries: usize,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: Option<String>,
    pub timeout: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let composer = lookup("HABIT_COMPOSER")
            .unwrap_or_else(|| "template".to_string())
            .parse()
            .map_err(ConfigError::InvalidComposer)?;

        let scan_concurrency = parse_or(&lookup, "HABIT_SCAN_CONCURRENCY", 4usize)?;
        if scan_concurrency == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "HABIT_SCAN_CONCURRENCY",
            });
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_or(&lookup, "HABIT_DB_MAX_CONNECTIONS", 5u32)?,
            log_level: lookup("HABIT_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            composer,
            llm: LlmConfig {
                model: lookup("HABIT_LLM_MODEL").filter(|m| !m.trim().is_empty()),
                timeout: Duration::from_secs(parse_or(&lookup, "HABIT_LLM_TIMEOUT_SECS", 60u64)?),
            },
            scan_concurrency,
            scan_retries: parse_or(&lookup, "HABIT_SCAN_RETRIES", 3usize)?,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        None => Ok(default),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set to a production Postgres instance")]
    MissingDatabaseUrl,
    #[error("HABIT_COMPOSER: {0}")]
    InvalidComposer(String),
    #[error("invalid value for {key}")]
    InvalidNumber { key: &'static str },
}
