//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// These are setup-time failures. Per-request conditions are reported
/// through [`AdmissionError`] and never surface here.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered settings could not be loaded or deserialized
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Invalid listen address
    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Failure reported by a [`RateLimiterStore`](crate::ratelimit::RateLimiterStore).
///
/// A store error is never a denial: the middleware handles it separately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The registry is full and cannot track another identifier.
    #[error("visitor registry is at capacity ({limit} identifiers)")]
    CapacityExceeded { limit: usize },

    /// The backing store could not be reached.
    #[error("rate limiter backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure to derive an identifier from a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// No usable source for the identifier was present.
    #[error("no client address available")]
    Missing,

    /// A required header was absent.
    #[error("missing header {0}")]
    MissingHeader(String),

    /// A header was present but unusable.
    #[error("invalid header {0}")]
    InvalidHeader(String),

    /// Custom extractors report their own reason.
    #[error("{0}")]
    Other(String),
}

/// Reasons a request was rejected before the store could admit it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{0}")]
    Identifier(#[from] IdentifierError),

    #[error("{0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_error_keeps_source_message() {
        let err = AdmissionError::from(IdentifierError::MissingHeader("x-api-key".into()));
        assert_eq!(err.to_string(), "missing header x-api-key");

        let err = AdmissionError::from(StoreError::CapacityExceeded { limit: 2 });
        assert_eq!(
            err.to_string(),
            "visitor registry is at capacity (2 identifiers)"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = TollgateError::Config("burst must be at least 1".into());
        assert_eq!(err.to_string(), "Configuration error: burst must be at least 1");
    }
}
