//! # Error Handling
//!
//! Domain error taxonomy for the ingest pipeline and its HTTP surface.
//! Every variant carries a stable short code that appears both in job error
//! payloads (discovered by polling) and in synchronous error responses.
//!
//! ## Propagation policy:
//! - Subprocess and cache failures are recovered locally where possible
//! - Remote-API failures are retried only when classified retryable
//! - Everything else lands in the owning job's terminal `failed` state

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error variants, one per failure class in the pipeline.
///
/// ## HTTP mapping:
/// Validation failures are 400, unknown resources 404, budget rejections 429,
/// everything else 500. Most variants never reach a synchronous response at
/// all: they are recorded on the job and observed by pollers.
#[derive(Debug, Clone)]
pub enum AppError {
    /// URL failed the supported-platform whitelist before any resource use
    InvalidUrl(String),

    /// Remote video duration exceeds the configured maximum
    VideoTooLong(String),

    /// Downloader subprocess failed (classified from its output)
    DownloadFailed(String),

    /// Downloader did not finish within the configured wall clock
    DownloadTimeout(String),

    /// Audio encoder subprocess failed
    ExtractionFailed(String),

    /// Audio encoder did not finish within its timeout
    ExtractionTimeout(String),

    /// No credential configured for the remote inference API (terminal, no retry)
    InvalidApiKey(String),

    /// Remote API returned 429
    ApiRateLimit(String),

    /// Network or request timeout against the remote API
    Timeout(String),

    /// Remote API rejected the audio payload
    InvalidAudioFormat(String),

    /// Remote transcription failed for a reason with no narrower class
    TranscriptionFailed(String),

    /// A referenced local file does not exist
    FileNotFound(String),

    /// Cache layer failure (non-fatal, logged by callers)
    CacheError(String),

    /// Pre-flight budget check rejected the operation
    CostLimitExceeded(String),

    /// The owning job was cancelled while work was in flight
    Cancelled,

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration loading or validation problem
    ConfigError(String),

    /// Anything else server-side
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for this error, used in job payloads
    /// and error responses.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidUrl(_) => "INVALID_URL",
            AppError::VideoTooLong(_) => "VIDEO_TOO_LONG",
            AppError::DownloadFailed(_) => "DOWNLOAD_FAILED",
            AppError::DownloadTimeout(_) => "DOWNLOAD_TIMEOUT",
            AppError::ExtractionFailed(_) => "EXTRACTION_FAILED",
            AppError::ExtractionTimeout(_) => "EXTRACTION_TIMEOUT",
            AppError::InvalidApiKey(_) => "INVALID_API_KEY",
            AppError::ApiRateLimit(_) => "API_RATE_LIMIT",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::InvalidAudioFormat(_) => "INVALID_AUDIO_FORMAT",
            AppError::TranscriptionFailed(_) => "TRANSCRIPTION_FAILED",
            AppError::FileNotFound(_) => "FILE_NOT_FOUND",
            AppError::CacheError(_) => "CACHE_ERROR",
            AppError::CostLimitExceeded(_) => "COST_LIMIT_EXCEEDED",
            AppError::Cancelled => "CANCELLED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConfigError(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::InvalidUrl(m)
            | AppError::VideoTooLong(m)
            | AppError::DownloadFailed(m)
            | AppError::DownloadTimeout(m)
            | AppError::ExtractionFailed(m)
            | AppError::ExtractionTimeout(m)
            | AppError::InvalidApiKey(m)
            | AppError::ApiRateLimit(m)
            | AppError::Timeout(m)
            | AppError::InvalidAudioFormat(m)
            | AppError::TranscriptionFailed(m)
            | AppError::FileNotFound(m)
            | AppError::CacheError(m)
            | AppError::CostLimitExceeded(m)
            | AppError::BadRequest(m)
            | AppError::NotFound(m)
            | AppError::ConfigError(m)
            | AppError::Internal(m) => m.clone(),
            AppError::Cancelled => "Job was cancelled".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidUrl(_)
            | AppError::VideoTooLong(_)
            | AppError::InvalidAudioFormat(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::FileNotFound(_) => StatusCode::NOT_FOUND,
            AppError::CostLimitExceeded(_) | AppError::ApiRateLimit(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::DownloadTimeout(_)
            | AppError::ExtractionTimeout(_)
            | AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::FileNotFound(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for results carrying an [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AppError::InvalidUrl("x".into()).code(), "INVALID_URL");
        assert_eq!(
            AppError::DownloadTimeout("x".into()).code(),
            "DOWNLOAD_TIMEOUT"
        );
        assert_eq!(AppError::InvalidApiKey("x".into()).code(), "INVALID_API_KEY");
        assert_eq!(
            AppError::CostLimitExceeded("x".into()).code(),
            "COST_LIMIT_EXCEEDED"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            AppError::InvalidUrl("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::CostLimitExceeded("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
