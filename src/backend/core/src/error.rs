//! Error handling for Warden.
//!
//! This module provides:
//! - Stable error codes with HTTP status mapping
//! - User-facing messages kept apart from internal detail
//! - Severity-based logging with tracing
//! - An error counter exported through `metrics`
//!
//! Component errors (`TokenError`, `ResolveError`, `CatalogError`,
//! `RoleGrantError`, `StoreError`, `GuardError`) stay local to their modules and convert
//! into [`WardenError`] at the HTTP boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::db::StoreError;
use crate::middleware::auth::TokenError;
use crate::middleware::guard::GuardError;
use crate::rbac::catalog::CatalogError;
use crate::rbac::models::InvalidObjectId;
use crate::rbac::policy::{ResolveError, RoleGrantError};
use crate::telemetry::logging::TokenRedactor;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    DataIntegrityError,
    RecordNotFound,
    DuplicateRecord,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Authentication (4000-4049)
    MissingToken,
    InvalidToken,
    TokenExpired,
    InvalidSubject,

    // Authorization (4050-4099)
    InsufficientPermissions,
    AccessDenied,
    PrivilegeEscalation,
    SystemRoleImmutable,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidIdentifier,
    InvalidPermissionFormat,
    InvalidAction,
    InvalidScope,
    UnknownPermission,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    PermissionResolutionFailed,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::DataIntegrityError => 2003,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,

            Self::SerializationError => 2200,

            Self::MissingToken => 4000,
            Self::InvalidToken => 4001,
            Self::TokenExpired => 4002,
            Self::InvalidSubject => 4003,

            Self::InsufficientPermissions => 4050,
            Self::AccessDenied => 4051,
            Self::PrivilegeEscalation => 4052,
            Self::SystemRoleImmutable => 4053,

            Self::ValidationError => 4100,
            Self::InvalidIdentifier => 4101,
            Self::InvalidPermissionFormat => 4102,
            Self::InvalidAction => 4103,
            Self::InvalidScope => 4104,
            Self::UnknownPermission => 4105,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::PermissionResolutionFailed => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Bad Request (400)
            Self::ValidationError
            | Self::InvalidIdentifier
            | Self::InvalidPermissionFormat
            | Self::InvalidAction
            | Self::InvalidScope
            | Self::UnknownPermission => StatusCode::BAD_REQUEST,

            // Unauthorized (401)
            Self::MissingToken | Self::InvalidToken | Self::TokenExpired | Self::InvalidSubject => {
                StatusCode::UNAUTHORIZED
            }

            // Forbidden (403)
            Self::InsufficientPermissions
            | Self::AccessDenied
            | Self::PrivilegeEscalation
            | Self::SystemRoleImmutable => StatusCode::FORBIDDEN,

            // Not Found (404)
            Self::RecordNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::DuplicateRecord => StatusCode::CONFLICT,

            // Service Unavailable (503)
            Self::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            // Internal Server Error (500)
            Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::DataIntegrityError
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::PermissionResolutionFailed
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2000..=2099 => "database",
            2200..=2299 => "serialization",
            4000..=4049 => "authentication",
            4050..=4099 => "authorization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors: bad input, missing credentials, plain denials
    Low,
    /// Security-relevant caller behaviour worth a warning
    Medium,
    /// Service health problems
    High,
    /// The service cannot operate
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::MissingToken
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::InvalidSubject
            | ErrorCode::InsufficientPermissions
            | ErrorCode::AccessDenied
            | ErrorCode::ValidationError
            | ErrorCode::InvalidIdentifier
            | ErrorCode::InvalidPermissionFormat
            | ErrorCode::InvalidAction
            | ErrorCode::InvalidScope
            | ErrorCode::UnknownPermission
            | ErrorCode::RecordNotFound
            | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::PrivilegeEscalation | ErrorCode::SystemRoleImmutable => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::DataIntegrityError
            | ErrorCode::SerializationError
            | ErrorCode::PermissionResolutionFailed => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warden.
#[derive(Error, Debug)]
pub struct WardenError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    details: ErrorDetails,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for WardenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl WardenError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn forbidden(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, message)
    }

    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::DuplicateRecord, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();
        let internal = self
            .internal_message
            .as_deref()
            .map(|m| TokenRedactor::global().redact(m));

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?internal,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?internal,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    details = ?self.details,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?internal,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "warden_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Rejection body: `{"error": <message>, "code": <CODE>, ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// User-friendly error message
    pub error: String,

    /// Machine-readable error code
    pub code: ErrorCode,

    pub numeric_code: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl From<&WardenError> for ErrorResponse {
    fn from(error: &WardenError) -> Self {
        Self {
            error: error.user_message.to_string(),
            code: error.code,
            numeric_code: error.code.numeric_code(),
            details: if error.details.is_empty() {
                None
            } else {
                Some(error.details.clone())
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for WardenError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(_) => (ErrorCode::DatabaseQueryFailed, "A database error occurred"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<StoreError> for WardenError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database(e) => e.into(),
            StoreError::Duplicate(what) => Self::conflict(format!("{} already exists", what)),
            StoreError::Missing(what) => Self::new(ErrorCode::RecordNotFound, format!("{} not found", what)),
            e @ StoreError::Corrupt { .. } => Self::with_internal(
                ErrorCode::DataIntegrityError,
                "Stored data is inconsistent",
                e.to_string(),
            ),
            e @ StoreError::Migration(_) => Self::with_internal(
                ErrorCode::DatabaseError,
                "A database error occurred",
                e.to_string(),
            ),
        }
    }
}

impl From<TokenError> for WardenError {
    fn from(error: TokenError) -> Self {
        match &error {
            TokenError::Signing(_) => Self::internal(error.to_string()),
            TokenError::Expired => Self::with_internal(
                ErrorCode::TokenExpired,
                "Invalid or expired token",
                error.to_string(),
            ),
            _ => Self::with_internal(
                ErrorCode::InvalidToken,
                "Invalid or expired token",
                error.to_string(),
            ),
        }
    }
}

impl From<ResolveError> for WardenError {
    fn from(error: ResolveError) -> Self {
        Self::with_internal(
            ErrorCode::PermissionResolutionFailed,
            "Failed to get user permissions",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<GuardError> for WardenError {
    fn from(error: GuardError) -> Self {
        match error {
            GuardError::InvalidToken(e) => e.into(),
            GuardError::Resolution(e) => e.into(),
            GuardError::MissingToken => Self::new(ErrorCode::MissingToken, "Missing authentication token"),
            GuardError::Unauthenticated => Self::new(ErrorCode::MissingToken, "Authentication required"),
            GuardError::InvalidSubject(subject) => Self::with_internal(
                ErrorCode::InvalidSubject,
                "Invalid user ID in token",
                format!("subject {:?} is not an object id", subject),
            ),
            GuardError::InsufficientPermissions(required) => Self::with_internal(
                ErrorCode::InsufficientPermissions,
                "Insufficient permissions",
                format!("missing {}", required),
            ),
            GuardError::AccessDenied => Self::new(ErrorCode::AccessDenied, "Access denied"),
        }
    }
}

impl From<CatalogError> for WardenError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Store(e) => e.into(),
            other => {
                let code = match &other {
                    CatalogError::InvalidFormat(_) => ErrorCode::InvalidPermissionFormat,
                    CatalogError::InvalidAction(_) => ErrorCode::InvalidAction,
                    CatalogError::InvalidScope(_) => ErrorCode::InvalidScope,
                    _ => ErrorCode::UnknownPermission,
                };
                Self::new(code, other.to_string())
            }
        }
    }
}

impl From<RoleGrantError> for WardenError {
    fn from(error: RoleGrantError) -> Self {
        match error {
            RoleGrantError::Store(e) => e.into(),
            e @ RoleGrantError::InvalidId(_) => Self::new(ErrorCode::InvalidIdentifier, e.to_string()),
            e @ RoleGrantError::NotFound(_) => Self::new(ErrorCode::UnknownPermission, e.to_string()),
            e @ RoleGrantError::NotPossessed { .. } => {
                Self::new(ErrorCode::PrivilegeEscalation, e.to_string())
            }
        }
    }
}

impl From<InvalidObjectId> for WardenError {
    fn from(error: InvalidObjectId) -> Self {
        Self::new(ErrorCode::InvalidIdentifier, error.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
