//! Error types for pennyledger-config

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MAX_RECORDS_PER_PAGE, MIN_RECORDS_PER_PAGE};

/// Error codes for configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigErrorCode {
    FileNotFound,
    Unreadable,
    InvalidYaml,
    MissingField,
    InvalidValue,
    PageSizeOutOfRange,
    SeparatorClash,
}

impl std::fmt::Display for ConfigErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ConfigErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ConfigErrorCode::Unreadable => "UNREADABLE",
            ConfigErrorCode::InvalidYaml => "INVALID_YAML",
            ConfigErrorCode::MissingField => "MISSING_FIELD",
            ConfigErrorCode::InvalidValue => "INVALID_VALUE",
            ConfigErrorCode::PageSizeOutOfRange => "PAGE_SIZE_OUT_OF_RANGE",
            ConfigErrorCode::SeparatorClash => "SEPARATOR_CLASH",
        };
        f.write_str(code)
    }
}

/// What gets printed when startup fails on configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigErrorDetails {
    pub code: ConfigErrorCode,
    pub message: String,
    /// Dotted path of the offending key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ConfigErrorDetails {
    pub fn new(code: ConfigErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            field: None,
            suggestions: vec![],
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }
}

impl std::fmt::Display for ConfigErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref field) = self.field {
            write!(f, " ({})", field)?;
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  hint: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Cannot read {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("Invalid YAML: {message}")]
    InvalidYaml { message: String },

    #[error("Missing required value: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error(
        "pagination.records_per_page is {value}, expected {}..={}",
        MIN_RECORDS_PER_PAGE,
        MAX_RECORDS_PER_PAGE
    )]
    PageSizeOutOfRange { value: usize },

    #[error("Thousands and decimal separators are both '{separator}'")]
    SeparatorClash { separator: String },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        ConfigError::InvalidYaml {
            message: error.to_string(),
        }
    }
}

impl ConfigError {
    pub fn code(&self) -> ConfigErrorCode {
        match self {
            ConfigError::FileNotFound { .. } => ConfigErrorCode::FileNotFound,
            ConfigError::Unreadable { .. } => ConfigErrorCode::Unreadable,
            ConfigError::InvalidYaml { .. } => ConfigErrorCode::InvalidYaml,
            ConfigError::MissingField { .. } => ConfigErrorCode::MissingField,
            ConfigError::InvalidValue { .. } => ConfigErrorCode::InvalidValue,
            ConfigError::PageSizeOutOfRange { .. } => ConfigErrorCode::PageSizeOutOfRange,
            ConfigError::SeparatorClash { .. } => ConfigErrorCode::SeparatorClash,
        }
    }

    /// Convert to detailed error info
    pub fn to_details(&self) -> ConfigErrorDetails {
        let details = ConfigErrorDetails::new(self.code(), self.to_string());

        match self {
            ConfigError::FileNotFound { .. } => details.with_suggestion(
                "Pass --config with a pennyledger YAML file, or --print-default-config to start one."
                    .to_string(),
            ),
            ConfigError::MissingField { field } | ConfigError::InvalidValue { field, .. } => {
                details.with_field(field)
            }
            ConfigError::PageSizeOutOfRange { .. } => details
                .with_field("pagination.records_per_page")
                .with_suggestion(format!("Use a value from {} to {}.", MIN_RECORDS_PER_PAGE, MAX_RECORDS_PER_PAGE)),
            ConfigError::SeparatorClash { .. } => details
                .with_field("currency")
                .with_suggestion("en-GB uses ',' for thousands and '.' for decimals.".to_string()),
            _ => details,
        }
    }
}

/// Result type with ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;
