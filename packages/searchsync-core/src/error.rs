//! Error types for searchsync-core

use std::fmt;
use thiserror::Error;

/// Sync error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network errors talking to the index cluster
    Transport,
    /// A store call exceeded its per-call deadline
    Timeout,
    /// The index store rejected a request
    Store,
    /// Serialization/deserialization errors
    Serialization,
    /// A fan-out search matched more documents than allowed
    FanoutLimit,
    /// Invalid relationship catalog
    Catalog,
    /// Configuration errors
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Store => "store",
            ErrorKind::Serialization => "serialization",
            ErrorKind::FanoutLimit => "fanout_limit",
            ErrorKind::Catalog => "catalog",
            ErrorKind::Config => "config",
        }
    }

    /// Retry category for a failure of this kind.
    ///
    /// Only transient failures make the originating record eligible for
    /// redelivery; the whole record is replayed, never a partial cascade.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Store => ErrorCategory::Transient,
            ErrorKind::Serialization
            | ErrorKind::FanoutLimit
            | ErrorKind::Catalog
            | ErrorKind::Config => ErrorCategory::Permanent,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error category for redelivery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient error - redeliver the record (e.g., timeout, connection)
    Transient,
    /// Permanent error - redelivery cannot help (e.g., invalid catalog)
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sync error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct SyncError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    // Convenience constructors
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn fanout_limit(index: &str, field: &str, limit: usize) -> Self {
        Self::new(
            ErrorKind::FanoutLimit,
            format!(
                "More than {} documents in '{}' match {}; refusing to truncate the cascade",
                limit, index, field
            ),
        )
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Catalog, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

// JSON error conversions
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<crate::config::ConfigError> for SyncError {
    fn from(err: crate::config::ConfigError) -> Self {
        SyncError::config(err.to_string()).with_source(err)
    }
}

#[cfg(feature = "opensearch")]
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::timeout(format!("Index request timeout: {}", err)).with_source(err)
        } else if err.is_decode() {
            SyncError::serialization(format!("Failed to decode index response: {}", err))
                .with_source(err)
        } else {
            SyncError::transport(format!("Index request failed: {}", err)).with_source(err)
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SyncError>;
