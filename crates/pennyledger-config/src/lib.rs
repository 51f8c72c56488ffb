//! Configuration management for pennyledger
//!
//! This module handles loading, validation, and management of
//! pennyledger configuration from YAML files.

pub mod error;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use error::{ConfigError, ConfigErrorCode, ConfigErrorDetails, ConfigResult};

/// Smallest page size the ledger view accepts
pub const MIN_RECORDS_PER_PAGE: usize = 15;
/// Largest page size the ledger view accepts
pub const MAX_RECORDS_PER_PAGE: usize = 20;

// ==================== Configuration Types ====================

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// User the ledger is scoped to
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

/// Data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// JSON file used to seed the in-memory transaction store
    #[serde(default = "default_seed_file")]
    pub seed_file: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            seed_file: default_seed_file(),
        }
    }
}

fn default_seed_file() -> PathBuf {
    PathBuf::from("./data/transactions.json")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Pagination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Records per ledger page
    #[serde(default = "default_records_per_page")]
    pub records_per_page: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            records_per_page: default_records_per_page(),
        }
    }
}

fn default_records_per_page() -> usize {
    MIN_RECORDS_PER_PAGE
}

/// Currency display settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// Currency symbol printed before the amount
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Thousands separator
    #[serde(default = "default_thousands_sep")]
    pub thousands_separator: String,
    /// Decimal separator
    #[serde(default = "default_decimal_sep")]
    pub decimal_separator: String,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            thousands_separator: default_thousands_sep(),
            decimal_separator: default_decimal_sep(),
        }
    }
}

fn default_symbol() -> String {
    "£".to_string()
}

fn default_thousands_sep() -> String {
    ",".to_string()
}

fn default_decimal_sep() -> String {
    ".".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Data source settings
    #[serde(default)]
    pub data: DataConfig,
    /// Pagination settings
    #[serde(default)]
    pub pagination: PaginationConfig,
    /// Currency settings
    #[serde(default)]
    pub currency: CurrencyConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: PathBuf) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Unreadable {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.session.user_id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "session.user_id".to_string(),
            });
        }

        let per_page = self.pagination.records_per_page;
        if !(MIN_RECORDS_PER_PAGE..=MAX_RECORDS_PER_PAGE).contains(&per_page) {
            return Err(ConfigError::PageSizeOutOfRange { value: per_page });
        }

        if self.currency.decimal_separator.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "currency.decimal_separator".to_string(),
                reason: "Decimal separator cannot be empty".to_string(),
            });
        }

        if self.currency.decimal_separator == self.currency.thousands_separator {
            return Err(ConfigError::SeparatorClash {
                separator: self.currency.decimal_separator.clone(),
            });
        }

        Ok(())
    }

    /// Generate a default configuration file
    pub fn generate_default() -> &'static str {
        include_str!("../templates/default_config.yaml")
    }
}
