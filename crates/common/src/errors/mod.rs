//! Error types for Relaygate services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for credential, crypto, rate and domain failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,
    NoCredentials,
    InvalidCredentials,
    TokenInvalid,

    // Authorization errors (3xxx)
    Forbidden,
    TenantInactive,
    PlanLimitExceeded,

    // Resource errors (4xxx)
    NotFound,
    DomainNotFound,
    ConnectionNotFound,
    ApiKeyNotFound,

    // Conflict errors (5xxx)
    Conflict,
    DomainAlreadyRegistered,
    DomainNotVerifiable,

    // Rate limiting (6xxx)
    RateLimited,

    // Domain validation (65xx)
    DomainValidationFailed,
    DnsVerificationFailed,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    DecryptionFailed,
    CryptoError,
    AuditWriteFailed,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,
            ErrorCode::NoCredentials => 2002,
            ErrorCode::InvalidCredentials => 2003,
            ErrorCode::TokenInvalid => 2004,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::TenantInactive => 3002,
            ErrorCode::PlanLimitExceeded => 3003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::DomainNotFound => 4002,
            ErrorCode::ConnectionNotFound => 4003,
            ErrorCode::ApiKeyNotFound => 4004,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::DomainAlreadyRegistered => 5002,
            ErrorCode::DomainNotVerifiable => 5003,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Domains (65xx)
            ErrorCode::DomainValidationFailed => 6501,
            ErrorCode::DnsVerificationFailed => 6502,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::CacheError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::DecryptionFailed => 9004,
            ErrorCode::CryptoError => 9005,
            ErrorCode::AuditWriteFailed => 9006,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("No credentials supplied")]
    NoCredentials,

    /// Deliberately carries no detail: the failing stage must not leak.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token verification failed")]
    TokenInvalid,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Tenant is not active")]
    TenantInactive,

    #[error("Plan limit exceeded: {message}")]
    PlanLimitExceeded { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Domain not found: {id}")]
    DomainNotFound { id: String },

    #[error("Upstream connection not found: {id}")]
    ConnectionNotFound { id: String },

    #[error("API key not found: {id}")]
    ApiKeyNotFound { id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    #[error("Domain already registered: {hostname}")]
    DomainAlreadyRegistered { hostname: String },

    #[error("Domain cannot be verified in status '{status}'")]
    DomainNotVerifiable { status: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimited { limit: u64, window_secs: u64 },

    // Domain errors
    #[error("Domain validation failed: {message}")]
    DomainValidationFailed { message: String },

    #[error("DNS verification failed: {remediation}")]
    DnsVerificationFailed { remediation: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    // Crypto errors
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Cryptography error: {message}")]
    Crypto { message: String },

    /// Only ever constructed by audit sinks; the recorder swallows it.
    #[error("Audit write failed: {message}")]
    AuditWriteFailed { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::NoCredentials => ErrorCode::NoCredentials,
            AppError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AppError::TokenInvalid => ErrorCode::TokenInvalid,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::TenantInactive => ErrorCode::TenantInactive,
            AppError::PlanLimitExceeded { .. } => ErrorCode::PlanLimitExceeded,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::DomainNotFound { .. } => ErrorCode::DomainNotFound,
            AppError::ConnectionNotFound { .. } => ErrorCode::ConnectionNotFound,
            AppError::ApiKeyNotFound { .. } => ErrorCode::ApiKeyNotFound,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::DomainAlreadyRegistered { .. } => ErrorCode::DomainAlreadyRegistered,
            AppError::DomainNotVerifiable { .. } => ErrorCode::DomainNotVerifiable,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::DomainValidationFailed { .. } => ErrorCode::DomainValidationFailed,
            AppError::DnsVerificationFailed { .. } => ErrorCode::DnsVerificationFailed,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::DecryptionFailed => ErrorCode::DecryptionFailed,
            AppError::Crypto { .. } => ErrorCode::CryptoError,
            AppError::AuditWriteFailed { .. } => ErrorCode::AuditWriteFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::InvalidFormat { .. }
            | AppError::DomainValidationFailed { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. }
            | AppError::NoCredentials
            | AppError::InvalidCredentials
            | AppError::TokenInvalid => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. }
            | AppError::TenantInactive
            | AppError::PlanLimitExceeded { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::DomainNotFound { .. }
            | AppError::ConnectionNotFound { .. }
            | AppError::ApiKeyNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Duplicate { .. }
            | AppError::DomainAlreadyRegistered { .. }
            | AppError::DomainNotVerifiable { .. } => StatusCode::CONFLICT,

            // 422 Unprocessable
            AppError::DnsVerificationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::DecryptionFailed
            | AppError::Crypto { .. }
            | AppError::AuditWriteFailed { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::CacheError { .. } | AppError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Human guidance attached to credential failures
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            AppError::NoCredentials => Some(
                "Supply X-Upstream-User and X-Upstream-Secret headers, an API key, or a bearer token",
            ),
            AppError::InvalidCredentials => {
                Some("The supplied credential was rejected; issue a new API key or token")
            }
            AppError::RateLimited { .. } => Some("Retry after the current window resets"),
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        // Server-side detail never reaches the client for crypto failures
        let message = match self {
            AppError::Database(_)
            | AppError::DecryptionFailed
            | AppError::Crypto { .. }
            | AppError::Other(_) => "Internal server error".to_string(),
            _ => message,
        };

        let details = self
            .remediation()
            .map(|hint| serde_json::json!({ "remediation": hint }));

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
