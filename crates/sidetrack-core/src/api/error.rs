use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Machine-readable error code, as sent by the backend in `{message, code}`.
///
/// Codes the backend invents for a specific provider (GitHub token problems,
/// rate limiting) are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    ValidationError,
    NotFound,
    ServerError,
    NetworkError,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Other(code) => code,
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "UNAUTHORIZED" => ErrorCode::Unauthorized,
            "FORBIDDEN" => ErrorCode::Forbidden,
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "NOT_FOUND" => ErrorCode::NotFound,
            "SERVER_ERROR" => ErrorCode::ServerError,
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(ErrorCode::parse(&code))
    }
}

/// Structured failure body returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: ErrorCode,
}

/// Errors surfaced to callers of the gateway.
///
/// `Clone` because one failed refresh is delivered to every request that was
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("{message} ({code})")]
    Provider { code: String, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an error from a code/message pair sent by the backend.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::Unauthorized => ApiError::Unauthorized(message),
            ErrorCode::Forbidden => ApiError::Forbidden(message),
            ErrorCode::ValidationError => ApiError::Validation(message),
            ErrorCode::NotFound => ApiError::NotFound(message),
            ErrorCode::ServerError => ApiError::Server(message),
            ErrorCode::NetworkError => ApiError::Network(message),
            ErrorCode::Other(code) => ApiError::Provider { code, message },
        }
    }

    /// Map a non-success response to an error. A structured `{message, code}`
    /// body wins; otherwise the status decides and the raw body becomes the
    /// message.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        if let Ok(structured) = serde_json::from_str::<ErrorBody>(body) {
            return Self::from_code(structured.code, structured.message);
        }

        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::Forbidden(truncated),
            404 => ApiError::NotFound(truncated),
            400 | 422 => ApiError::Validation(truncated),
            429 => ApiError::Provider {
                code: "RATE_LIMITED".to_string(),
                message: truncated,
            },
            _ => ApiError::Server(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Unauthorized(_) => ErrorCode::Unauthorized,
            ApiError::Forbidden(_) => ErrorCode::Forbidden,
            ApiError::Validation(_) => ErrorCode::ValidationError,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Server(_) | ApiError::InvalidResponse(_) => ErrorCode::ServerError,
            ApiError::Network(_) | ApiError::Timeout(_) => ErrorCode::NetworkError,
            ApiError::Provider { code, .. } => ErrorCode::Other(code.clone()),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::Forbidden(m)
            | ApiError::Validation(m)
            | ApiError::NotFound(m)
            | ApiError::Server(m)
            | ApiError::Network(m)
            | ApiError::InvalidResponse(m) => m.clone(),
            ApiError::Timeout(_) => self.to_string(),
            ApiError::Provider { message, .. } => message.clone(),
        }
    }

    /// The tagged `{message, code}` form handed to the view layer.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            message: self.message(),
            code: self.code(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
