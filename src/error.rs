//! Error taxonomy shared by every service operation.
//!
//! Validation, auth, not-found and conflict outcomes are recovered at the HTTP
//! boundary and turned into structured responses. Backend failures pass their
//! message through; anything unexpected becomes a generic internal error.

use crate::spatial::BboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Input rejected before any backend call
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    /// Caller is not authenticated
    #[error("authentication required")]
    Unauthorized,

    /// Caller is authenticated but may not act on the resource
    #[error("{0}")]
    Forbidden(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request collides with existing state (e.g. claimed by someone else)
    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    /// The storage backend failed
    #[error("{0}")]
    Backend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Wrap a backend failure, keeping its full context chain.
    pub fn backend(err: anyhow::Error) -> Self {
        AppError::Backend(format!("{err:#}"))
    }

    /// Machine-readable code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { code, .. } => *code,
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Conflict { code, .. } => *code,
            AppError::Backend(_) => "BACKEND_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<BboxError> for AppError {
    fn from(err: BboxError) -> Self {
        AppError::validation(err.code(), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
