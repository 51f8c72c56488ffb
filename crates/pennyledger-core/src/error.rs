//! Error types for pennyledger-core
//!
//! Every failure in the ledger degrades to stale or unconfirmed state plus a
//! user-visible notification. This module provides the error taxonomy, the
//! notification record kept by the ledger, and the logging hook used when a
//! remote call fails.

use pennyledger_utils::FormatError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Reading transactions or categories failed
    LoadFailed,
    /// Update, delete, create or add-category failed remotely
    MutationFailed,
    /// Bulk import failed remotely
    ImportFailed,
    /// A timestamp could not be parsed
    InvalidDate,
    /// Local validation rejected the request
    InvalidInput,
    /// No row matches the given key
    TransactionNotFound,
    /// A result arrived for a ledger that moved on
    Discarded,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::LoadFailed => write!(f, "LOAD_FAILED"),
            ErrorCode::MutationFailed => write!(f, "MUTATION_FAILED"),
            ErrorCode::ImportFailed => write!(f, "IMPORT_FAILED"),
            ErrorCode::InvalidDate => write!(f, "INVALID_DATE"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::TransactionNotFound => write!(f, "TRANSACTION_NOT_FOUND"),
            ErrorCode::Discarded => write!(f, "DISCARDED"),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Debug => write!(f, "debug"),
            ErrorSeverity::Info => write!(f, "info"),
            ErrorSeverity::Warning => write!(f, "warning"),
            ErrorSeverity::Error => write!(f, "error"),
        }
    }
}

/// Error expanded for display in a notification panel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    /// Resource or operation the failure concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Whether local state may differ from the store until a reload
    pub stale: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            subject: None,
            stale: false,
            suggestions: vec![],
        }
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn stale(mut self) -> Self {
        self.stale = true;
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if self.stale {
            write!(f, " (showing unconfirmed data)")?;
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  {}", suggestion)?;
        }
        Ok(())
    }
}

/// Main error type for pennyledger-core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Failed to load {resource}: {message}")]
    LoadFailed { resource: String, message: String },

    #[error("Failed to {operation}: {message}")]
    MutationFailed { operation: String, message: String },

    #[error("Import failed: {message}")]
    ImportFailed { message: String },

    #[error("Invalid date: {input}")]
    InvalidDate { input: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Transaction not found: {key}")]
    TransactionNotFound { key: String },

    #[error("Result discarded: {reason}")]
    Discarded { reason: String },
}

impl CoreError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::LoadFailed { .. } => ErrorCode::LoadFailed,
            CoreError::MutationFailed { .. } => ErrorCode::MutationFailed,
            CoreError::ImportFailed { .. } => ErrorCode::ImportFailed,
            CoreError::InvalidDate { .. } => ErrorCode::InvalidDate,
            CoreError::InvalidInput { .. } => ErrorCode::InvalidInput,
            CoreError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
            CoreError::Discarded { .. } => ErrorCode::Discarded,
        }
    }

    /// Get the severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoreError::LoadFailed { .. } => ErrorSeverity::Error,
            CoreError::MutationFailed { .. } => ErrorSeverity::Error,
            CoreError::ImportFailed { .. } => ErrorSeverity::Error,
            CoreError::InvalidDate { .. } => ErrorSeverity::Warning,
            CoreError::InvalidInput { .. } => ErrorSeverity::Warning,
            CoreError::TransactionNotFound { .. } => ErrorSeverity::Info,
            CoreError::Discarded { .. } => ErrorSeverity::Debug,
        }
    }

    /// Whether the error came back from the remote store
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            CoreError::LoadFailed { .. } | CoreError::MutationFailed { .. } | CoreError::ImportFailed { .. }
        )
    }

    /// Expand for display
    pub fn to_details(&self) -> ErrorDetails {
        let details = ErrorDetails::new(self.code(), self.to_string());
        match self {
            CoreError::LoadFailed { resource, .. } => details
                .with_subject(resource)
                .stale()
                .with_suggestion("The ledger still shows the last successfully loaded data.")
                .with_suggestion("Reload once the connection is back."),
            CoreError::MutationFailed { operation, .. } => details
                .with_subject(operation)
                .stale()
                .with_suggestion("Reload the ledger to see what the server currently holds."),
            CoreError::ImportFailed { .. } => details
                .with_subject("import")
                .with_suggestion("No imported rows were added; the file can be imported again."),
            CoreError::InvalidDate { .. } => {
                details.with_suggestion("Use an ISO-8601 timestamp such as 2024-06-02T10:15:00Z.")
            }
            _ => details,
        }
    }
}

impl From<FormatError> for CoreError {
    fn from(error: FormatError) -> Self {
        match error {
            FormatError::InvalidDate { input } => CoreError::InvalidDate { input },
        }
    }
}

/// Result type with CoreError
pub type CoreResult<T> = Result<T, CoreError>;

/// User-visible record of a failure, kept by the ledger until drained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub code: ErrorCode,
    pub severity: ErrorSeverity,
    pub message: String,
}

impl From<&CoreError> for Notification {
    fn from(error: &CoreError) -> Self {
        Self {
            code: error.code(),
            severity: error.severity(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.code, self.message)
    }
}

/// Where a reported failure happened
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: String,
    /// User the ledger is scoped to
    pub user_id: Option<String>,
    /// Row the operation targeted, if any
    pub row: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Self::default()
        }
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_row(mut self, row: &str) -> Self {
        self.row = Some(row.to_string());
        self
    }
}

/// Sink for remote failures caught by the ledger
pub trait ErrorLogger: Send + Sync {
    fn log_error(&self, error: &CoreError, context: &ErrorContext);
}

/// Default error logger using log crate
#[derive(Debug, Default)]
pub struct DefaultErrorLogger;

impl ErrorLogger for DefaultErrorLogger {
    fn log_error(&self, error: &CoreError, context: &ErrorContext) {
        let user = context.user_id.as_deref().unwrap_or("-");
        let row = context.row.as_deref().unwrap_or("-");
        if error.is_remote() {
            log::error!(
                target: "pennyledger::error",
                "[{}] {} (operation={}, user={}, row={})",
                error.code(),
                error,
                context.operation,
                user,
                row
            );
        } else {
            log::warn!(
                target: "pennyledger::error",
                "[{}] {} (operation={}, user={})",
                error.code(),
                error,
                context.operation,
                user
            );
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::LoadFailed.to_string(), "LOAD_FAILED");
        assert_eq!(ErrorCode::MutationFailed.to_string(), "MUTATION_FAILED");
        assert_eq!(ErrorCode::InvalidInput.to_string(), "INVALID_INPUT");
    }

    #[test]
    fn test_remote_errors_are_errors() {
        let error = CoreError::MutationFailed {
            operation: "delete transaction".to_string(),
            message: "timeout".to_string(),
        };
        assert_eq!(error.code(), ErrorCode::MutationFailed);
        assert_eq!(error.severity(), ErrorSeverity::Error);
        assert!(error.is_remote());
        assert!(!CoreError::invalid_input("empty").is_remote());
    }

    #[test]
    fn test_format_error_conversion() {
        let error: CoreError = FormatError::InvalidDate { input: "nope".to_string() }.into();
        assert_eq!(error, CoreError::InvalidDate { input: "nope".to_string() });
    }

    #[test]
    fn test_load_failed_details() {
        let error = CoreError::LoadFailed {
            resource: "transactions".to_string(),
            message: "offline".to_string(),
        };
        let details = error.to_details();
        assert_eq!(details.code, ErrorCode::LoadFailed);
        assert_eq!(details.subject.as_deref(), Some("transactions"));
        assert!(details.stale);
        assert_eq!(details.suggestions.len(), 2);
        assert!(details.to_string().contains("offline"));

        let details = CoreError::invalid_input("empty name").to_details();
        assert!(!details.stale);
        assert!(details.suggestions.is_empty());
    }

    #[test]
    fn test_notification_from_error() {
        let error = CoreError::ImportFailed { message: "bad csv".to_string() };
        let notification = Notification::from(&error);
        assert_eq!(notification.code, ErrorCode::ImportFailed);
        assert_eq!(notification.message, "Import failed: bad csv");
        assert!(notification.to_string().starts_with("error [IMPORT_FAILED]"));
    }

    #[test]
    fn test_error_context() {
        let context = ErrorContext::new("update_transaction")
            .with_user_id("user-1")
            .with_row("txn-1");
        assert_eq!(context.operation, "update_transaction");
        assert_eq!(context.user_id.as_deref(), Some("user-1"));
        assert_eq!(context.row.as_deref(), Some("txn-1"));
    }
}
