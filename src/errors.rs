//! Typed error hierarchy for EgenSkriven's control plane.
//!
//! Three top-level enums cover the three layers of failure:
//! - `StoreError` — persistence-layer failures
//! - `WorkflowError` — workflow-verb failures, from the engine itself or
//!   anything it composes (resolver, session binder, context builder,
//!   resume dispatcher)
//! - `CliError` — thin wrapper translating `WorkflowError` into process exit codes

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("database busy, retry")]
    Transient,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation {
            message: message.into(),
        }
    }
}

/// Errors from the workflow engine and everything it composes (resolver,
/// session binder, context builder, resume dispatcher).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("not found")]
    NotFound,

    #[error("ambiguous reference, candidates: {candidates:?}")]
    Ambiguous { candidates: Vec<String> },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("unsupported: {reason}")]
    Unsupported { reason: String },

    #[error("failed to spawn resume process: {reason}")]
    SpawnFailed { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        WorkflowError::Unsupported {
            reason: reason.into(),
        }
    }

    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkflowError::NotFound | WorkflowError::Ambiguous { .. } => 1,
            WorkflowError::Validation { .. } | WorkflowError::Unsupported { .. } => 3,
            WorkflowError::SpawnFailed { .. } => 2,
            WorkflowError::Store(StoreError::Transient) => 2,
            WorkflowError::Store(_) => 3,
        }
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(e: rusqlite::Error) -> Self {
        WorkflowError::Store(StoreError::from(e))
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkflowError::NotFound => StatusCode::NOT_FOUND,
            WorkflowError::Ambiguous { .. } => StatusCode::BAD_REQUEST,
            WorkflowError::Validation { .. } => StatusCode::BAD_REQUEST,
            WorkflowError::Unsupported { .. } => StatusCode::BAD_REQUEST,
            WorkflowError::SpawnFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            WorkflowError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            WorkflowError::Store(StoreError::Transient) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::Store(StoreError::Validation { .. }) => StatusCode::BAD_REQUEST,
            WorkflowError::Store(StoreError::Sqlite(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match &self {
            WorkflowError::Ambiguous { candidates } => {
                json!({ "error": self.to_string(), "candidates": candidates })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// CLI-facing error: translates a `WorkflowError` (or a bare user-facing
/// message) into a process exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    User(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::User(_) => 1,
            CliError::Workflow(e) => e.exit_code(),
            CliError::Other(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_exit_codes_cover_each_variant() {
        assert_eq!(WorkflowError::NotFound.exit_code(), 1);
        assert_eq!(
            WorkflowError::Ambiguous {
                candidates: vec!["a".into(), "b".into()]
            }
            .exit_code(),
            1
        );
        assert_eq!(WorkflowError::validation("bad").exit_code(), 3);
        assert_eq!(WorkflowError::unsupported("no need_input").exit_code(), 3);
        assert_eq!(
            WorkflowError::SpawnFailed {
                reason: "ENOENT".into()
            }
            .exit_code(),
            2
        );
    }

    #[test]
    fn store_error_converts_into_workflow_error() {
        let store_err = StoreError::NotFound;
        let wf: WorkflowError = store_err.into();
        assert!(matches!(wf, WorkflowError::Store(StoreError::NotFound)));
    }

    #[test]
    fn cli_error_carries_workflow_exit_code() {
        let wf = WorkflowError::unsupported("board lacks need_input");
        let cli: CliError = wf.into();
        assert_eq!(cli.exit_code(), 3);
    }

    #[test]
    fn cli_error_user_is_exit_code_one() {
        let err = CliError::User("unknown ref".into());
        assert_eq!(err.exit_code(), 1);
    }
}
