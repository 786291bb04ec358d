//! Error types for feedpulse.

use thiserror::Error;

/// Common error type for feedpulse.
#[derive(Error, Debug)]
pub enum FeedPulseError {
    /// Database error.
    ///
    /// This is a generic database error that wraps errors from any database backend.
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    ///
    /// Finishing a job id that no longer exists lands here; that indicates a
    /// caller bug rather than an environmental condition.
    #[error("{0} not found")]
    NotFound(String),

    /// Feed fetch error.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// WebSub protocol error.
    #[error("websub error: {0}")]
    WebSub(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

// Conversion from sqlx errors
impl From<sqlx::Error> for FeedPulseError {
    fn from(e: sqlx::Error) -> Self {
        FeedPulseError::Database(e.to_string())
    }
}

/// Result type alias for feedpulse operations.
pub type Result<T> = std::result::Result<T, FeedPulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = FeedPulseError::Validation("hub URL missing".to_string());
        assert_eq!(err.to_string(), "validation error: hub URL missing");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = FeedPulseError::NotFound("job".to_string());
        assert_eq!(err.to_string(), "job not found");
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FeedPulseError::Fetch("HTTP error: 503".to_string());
        assert_eq!(err.to_string(), "fetch error: HTTP error: 503");
    }

    #[test]
    fn test_websub_error_display() {
        let err = FeedPulseError::WebSub("topic mismatch".to_string());
        assert_eq!(err.to_string(), "websub error: topic mismatch");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FeedPulseError = io_err.into();
        assert!(matches!(err, FeedPulseError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(FeedPulseError::Config("missing base URL".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
