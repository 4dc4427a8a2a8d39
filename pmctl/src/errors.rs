use crate::{
    auth::tokens::TokenError,
    credentials::CredentialError,
    db::errors::DbError,
    rbac::RbacError,
    store::StoreError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided, or the credential was rejected
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is authenticated but lacks the privilege the operation requires
    #[error("Insufficient permissions: {required} required for {resource}")]
    InsufficientPermissions { required: String, resource: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found (or not visible to the caller)
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Not found, where the message names the relationship rather than an ID
    #[error("{message}")]
    NotFoundMessage { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g. a duplicate role name within an environment
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// An external identity provider failed; the reason is logged, not returned
    #[error("Identity provider error: {reason}")]
    BadGateway { reason: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } | Error::NotFoundMessage { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::ProtectedEntity { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Not authenticated".to_string()),
            Error::InsufficientPermissions { required, .. } => format!("Permission denied: {required} required"),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::NotFoundMessage { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, conflicting_value, .. } => match (table.as_deref(), conflicting_value) {
                    (Some("roles"), Some(name)) => format!("Role with name '{name}' already exists"),
                    (Some("environments"), Some(name)) => format!("Environment '{name}' already exists"),
                    (Some("users"), _) => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::ProtectedEntity {
                    operation,
                    entity_type,
                    reason,
                    ..
                } => format!("Cannot {operation} {entity_type}: {reason}"),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            Error::Conflict { message } => message.clone(),
            Error::BadGateway { .. } => "Identity provider unavailable".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) | Error::BadGateway { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Constraint error: {}", self);
            }
            Error::InsufficientPermissions { .. } => {
                tracing::warn!("Authorization error: {}", self);
            }
            Error::Unauthenticated { .. } => {
                tracing::info!("Authentication error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::NotFoundMessage { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        (status, Json(json!({ "detail": self.user_message() }))).into_response()
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Error::NotFound {
                resource: entity.to_string(),
                id,
            },
            StoreError::Conflict(message) => Error::Conflict { message },
            StoreError::Protected(message) => Error::BadRequest { message },
            StoreError::Unexpected(e) => Error::Other(e),
        }
    }
}

impl From<RbacError> for Error {
    fn from(err: RbacError) -> Self {
        match err {
            RbacError::Validation(message) => Error::BadRequest { message },
            RbacError::NotFound { entity, id } => Error::NotFound {
                resource: entity.to_string(),
                id,
            },
            RbacError::Store(e) => e.into(),
        }
    }
}

impl From<CredentialError> for Error {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Validation(message) => Error::BadRequest { message },
            CredentialError::InvalidCredential => Error::Unauthenticated {
                message: Some("Invalid or expired credentials".to_string()),
            },
            CredentialError::NotFound { entity, id } => Error::NotFound {
                resource: entity.to_string(),
                id,
            },
            // A stored secret that no longer decrypts is a server-side fault, never the caller's
            CredentialError::Crypto(e) => Error::Internal {
                operation: format!("process stored secret: {e}"),
            },
            CredentialError::Upstream(reason) => Error::BadGateway { reason },
            CredentialError::Token(e) => e.into(),
            CredentialError::Store(e) => e.into(),
        }
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(reason) => Error::Internal {
                operation: format!("sign token: {reason}"),
            },
            TokenError::Expired | TokenError::Invalid | TokenError::WrongType { .. } => Error::Unauthenticated {
                message: Some("Invalid or expired credentials".to_string()),
            },
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
