use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents every error the sync pipeline can produce. It uses
/// `thiserror` for ergonomic error handling and automatic conversion from the
/// underlying library errors.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Retry Classification
///
/// The upstream API failures fall into two classes. Rate limits, transient
/// server errors (500/502/503) and transport failures are retryable and are
/// absorbed by the fetch client's backoff loop. Everything else fails the
/// chunk that issued the request.
///
/// # Examples
///
/// ```
/// use siphon_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps every error from SQLx: connection failures, query errors and
    /// constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The upstream API rejected the request with HTTP 429.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// The upstream API returned a transient server-side status.
    #[error("Upstream server error: HTTP {0}")]
    ServerError(u16),

    /// The upstream API returned a non-retryable status.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// HTTP client request failed for a reason other than status or transport.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing or construction failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A requested date range is empty or inverted.
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// Property discovery returned nothing to sync.
    #[error("No accessible properties found")]
    NoProperties,

    /// No job with this id is tracked.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The operation observed the job's cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Maps an upstream HTTP status to the matching error variant.
    ///
    /// 429 becomes [`AppError::RateLimitExceeded`], 500/502/503 become
    /// [`AppError::ServerError`], anything else is a fatal [`AppError::ApiError`].
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => AppError::RateLimitExceeded,
            500 | 502 | 503 => AppError::ServerError(status),
            _ => AppError::ApiError {
                status,
                message: message.into(),
            },
        }
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("unable to open") {
                    "Cannot open the local database.\n   Check DATABASE_URL and file permissions."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::RateLimitExceeded => {
                "The reporting API is rate limiting requests.\n   Wait a moment or lower the concurrency limits."
                    .to_string()
            }
            AppError::ServerError(status) => {
                format!(
                    "The reporting API is having trouble (HTTP {}).\n   Please try again later.",
                    status
                )
            }
            AppError::ApiError { status: 401, .. } | AppError::ApiError { status: 403, .. } => {
                "The reporting API refused the credentials.\n   Check SIPHON_ACCESS_TOKEN and the property permissions."
                    .to_string()
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The API may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::NoProperties => {
                "No properties are accessible with these credentials.".to_string()
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is transient and the request may be retried.
    ///
    /// # Examples
    ///
    /// ```
    /// use siphon_core::error::AppError;
    ///
    /// assert!(AppError::RateLimitExceeded.is_retryable());
    /// assert!(AppError::ServerError(503).is_retryable());
    ///
    /// let err = AppError::ApiError { status: 400, message: "bad dimension".to_string() };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimitExceeded
                | AppError::ServerError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
        )
    }

    /// Returns true if this error is the result of cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
