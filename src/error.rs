// src/error.rs

//! Unified error handling for the notifier.

use std::fmt;

use thiserror::Error;

/// Result type alias for notifier operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regex compilation failed
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A content source failed in a way worth retrying
    #[error("Fetch error from {source_tag}: {message}")]
    Fetch {
        source_tag: String,
        message: String,
        retryable: bool,
    },

    /// A content source answered with something we cannot read
    #[error("Malformed response from {source_tag}: {message}")]
    Malformed { source_tag: String, message: String },

    /// A single message could not be delivered
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// The chat endpoint rejected our credentials or target
    #[error("Chat endpoint rejected configuration: {0}")]
    Auth(String),

    /// The start-of-run probe message failed
    #[error("Self-check failed: {0}")]
    SelfCheck(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a retryable fetch error.
    pub fn fetch(source_tag: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            source_tag: source_tag.into(),
            message: message.to_string(),
            retryable: true,
        }
    }

    /// Create a fetch error that retrying will not fix (e.g. 4xx).
    pub fn fetch_permanent(source_tag: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            source_tag: source_tag.into(),
            message: message.to_string(),
            retryable: false,
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(source_tag: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Malformed {
            source_tag: source_tag.into(),
            message: message.to_string(),
        }
    }

    /// Create a delivery error.
    pub fn delivery(message: impl fmt::Display) -> Self {
        Self::Delivery(message.to_string())
    }

    /// Create a chat-endpoint auth/config error.
    pub fn auth(message: impl fmt::Display) -> Self {
        Self::Auth(message.to_string())
    }

    /// Whether the retry layer should try the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) => true,
            Self::Fetch { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::fetch("dynamic", "503").is_retryable());
        assert!(!AppError::fetch_permanent("dynamic", "404").is_retryable());
        assert!(!AppError::malformed("rsshub", "bad xml").is_retryable());
        assert!(!AppError::auth("401").is_retryable());
    }

    #[test]
    fn test_toml_error_converts() {
        let err: AppError = toml::from_str::<toml::Value>("a = ").unwrap_err().into();
        assert!(matches!(err, AppError::Toml(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_includes_source() {
        let err = AppError::malformed("dynamic", "missing data");
        assert_eq!(
            err.to_string(),
            "Malformed response from dynamic: missing data"
        );
    }
}
