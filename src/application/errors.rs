use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::domain::RepositoryError;

// Machine codes carried in error envelopes.
pub const MISSING_PARAM: &str = "MISSING_PARAM";
pub const INVALID_TYPE: &str = "INVALID_TYPE";
pub const INVALID_QUERY: &str = "INVALID_QUERY";
pub const CITY_NOT_FOUND: &str = "CITY_NOT_FOUND";
pub const PLACE_NOT_FOUND: &str = "PLACE_NOT_FOUND";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {message}")]
    Validation { message: String, code: &'static str },
    #[error("{message}")]
    NotFound { message: String, code: &'static str },
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    pub fn missing_param(name: &str) -> Self {
        Self::Validation {
            message: format!("missing required parameter: {name}"),
            code: MISSING_PARAM,
        }
    }

    pub fn invalid_type<T: ToString>(message: T) -> Self {
        Self::Validation {
            message: message.to_string(),
            code: INVALID_TYPE,
        }
    }

    pub fn invalid_query<T: ToString>(message: T) -> Self {
        Self::Validation {
            message: message.to_string(),
            code: INVALID_QUERY,
        }
    }

    pub fn city_not_found(query: &str) -> Self {
        Self::NotFound {
            message: format!("unknown city: {query}"),
            code: CITY_NOT_FOUND,
        }
    }

    pub fn place_not_found() -> Self {
        Self::NotFound {
            message: "place not found".to_string(),
            code: PLACE_NOT_FOUND,
        }
    }

    pub fn upstream<T: ToString>(message: T) -> Self {
        Self::Upstream(message.to_string())
    }

    pub fn storage<T: ToString>(message: T) -> Self {
        Self::Storage(message.to_string())
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::NotFound {
                message: "entity not found".to_string(),
                code: NOT_FOUND,
            },
            RepositoryError::Conflict(msg) | RepositoryError::Unexpected(msg) => Self::Storage(msg),
        }
    }
}

// --- Canonical error envelope ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub meta: ErrorMeta,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMeta {
    pub timestamp: chrono::DateTime<Utc>,
}

/// Route-level error wrapper mapping the taxonomy onto statuses and the
/// canonical envelope.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        Self(AppError::from(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code, retry_after) = match self.0 {
            AppError::Validation { message, code } => {
                (StatusCode::BAD_REQUEST, message, code, None)
            }
            AppError::NotFound { message, code } => (StatusCode::NOT_FOUND, message, code, None),
            AppError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded, slow down".to_string(),
                RATE_LIMITED,
                Some(retry_after_secs),
            ),
            AppError::Upstream(message) => {
                error!(error = %message, "upstream failure surfaced to client");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream service unavailable".to_string(),
                    INTERNAL_ERROR,
                    None,
                )
            }
            AppError::Storage(message) => {
                error!(error = %message, "storage failure surfaced to client");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                    INTERNAL_ERROR,
                    None,
                )
            }
        };

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                message,
                code: Some(code.to_string()),
            },
            meta: ErrorMeta {
                timestamp: Utc::now(),
            },
        };

        let mut response = (status, Json(envelope)).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
