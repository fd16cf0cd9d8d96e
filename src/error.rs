//! Error types for the scraping library.

use thiserror::Error;

/// Result type alias for scraping operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Errors that can occur during browser operations and searches.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The session pool could not yield a healthy session after bounded retries.
    #[error("failed to acquire a healthy browser session after {attempts} attempts: {last_error}")]
    SessionExhausted {
        /// Number of acquisition attempts made.
        attempts: u32,
        /// Message of the last failure seen.
        last_error: String,
    },

    /// Page navigation failed. Retryability is decided by message matching
    /// against a transient-network allow-list, not by a dedicated variant.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The operation exceeded its wall-clock budget.
    #[error("operation timed out after {ms}ms")]
    OperationTimeout {
        /// Timeout budget in milliseconds.
        ms: u64,
    },

    /// A search engine served a CAPTCHA or verification page.
    #[error("engine '{engine}' blocked the request (CAPTCHA or verification page)")]
    Blocked {
        /// Engine that refused the request.
        engine: String,
    },

    /// Browser-level failure (launch, connect, page, CDP command).
    #[error("browser error: {0}")]
    Browser(String),

    /// Downstream storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Failed to parse page content or a selector.
    #[error("failed to parse content: {0}")]
    Parse(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Caller supplied invalid operation parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl ScrapeError {
    /// Returns true for timeout-class failures, which the operation runner
    /// reports the same way as any other execution failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScrapeError::OperationTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_session_exhausted() {
        let err = ScrapeError::SessionExhausted {
            attempts: 5,
            last_error: "probe refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to acquire a healthy browser session after 5 attempts: probe refused"
        );
    }

    #[test]
    fn test_error_display_navigation() {
        let err = ScrapeError::Navigation("net::ERR_CONNECTION_RESET".to_string());
        assert_eq!(
            err.to_string(),
            "navigation failed: net::ERR_CONNECTION_RESET"
        );
    }

    #[test]
    fn test_error_display_timeout() {
        let err = ScrapeError::OperationTimeout { ms: 30000 };
        assert_eq!(err.to_string(), "operation timed out after 30000ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_display_blocked() {
        let err = ScrapeError::Blocked {
            engine: "bing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "engine 'bing' blocked the request (CAPTCHA or verification page)"
        );
    }

    #[test]
    fn test_error_display_storage() {
        let err = ScrapeError::Storage("bucket unavailable".to_string());
        assert_eq!(err.to_string(), "storage error: bucket unavailable");
    }

    #[test]
    fn test_error_display_other() {
        let err = ScrapeError::Other("something went wrong".to_string());
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_non_timeout_errors() {
        assert!(!ScrapeError::Navigation("x".into()).is_timeout());
        assert!(!ScrapeError::Other("x".into()).is_timeout());
    }

    #[test]
    fn test_error_debug() {
        let err = ScrapeError::OperationTimeout { ms: 100 };
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("OperationTimeout"));
    }
}
