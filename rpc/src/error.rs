//! RPC error types and their wire form.

use accord_rights::{AuthorityError, RightsError};
use accord_types::{IdentityError, TypeError};
use accord_workflow::WorkflowError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} expects {expected} arguments, got {got}")]
    Arity {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] TypeError),

    #[error("caller identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Rights(#[from] RightsError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("server error: {0}")]
    Server(String),
}

/// Error classes a client can act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Unauthorized,
    IllegalState,
    InvalidRequest,
    /// Retryable: a dependency timed out or could not be reached.
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::IllegalState => "illegal_state",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::IllegalState => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::InvalidRequest(_)
            | RpcError::UnknownCommand(_)
            | RpcError::Arity { .. }
            | RpcError::InvalidArgument(_)
            | RpcError::Identity(_) => ErrorKind::InvalidRequest,
            RpcError::Forbidden(_) => ErrorKind::Unauthorized,
            RpcError::Workflow(e) => match e {
                WorkflowError::NotFound(_) => ErrorKind::NotFound,
                WorkflowError::AlreadyExists(_) | WorkflowError::Conflict(_) => {
                    ErrorKind::AlreadyExists
                }
                WorkflowError::ReservedId(_) | WorkflowError::InvalidInput(_) => {
                    ErrorKind::InvalidRequest
                }
                WorkflowError::Authorization { .. } | WorkflowError::Denied(_) => {
                    ErrorKind::Unauthorized
                }
                WorkflowError::IllegalState(_) => ErrorKind::IllegalState,
                WorkflowError::Timeout(_) | WorkflowError::Unavailable(_) => ErrorKind::Unavailable,
                WorkflowError::Store(_) | WorkflowError::Remote(_) => ErrorKind::Internal,
            },
            RpcError::Rights(e) => match e {
                RightsError::ServiceNotFound(_) => ErrorKind::NotFound,
                RightsError::InvalidAddress { .. } | RightsError::EmptyClaim(_) => {
                    ErrorKind::InvalidRequest
                }
                RightsError::Store(_) => ErrorKind::Internal,
            },
            RpcError::Authority(e) => match e {
                AuthorityError::Timeout(_) | AuthorityError::Unavailable(_) => {
                    ErrorKind::Unavailable
                }
                AuthorityError::NotFound(_) => ErrorKind::NotFound,
                AuthorityError::Denied(_) => ErrorKind::Unauthorized,
                AuthorityError::Conflict(_) => ErrorKind::AlreadyExists,
                AuthorityError::Store(_)
                | AuthorityError::Rejected(_)
                | AuthorityError::InvalidResponse(_) => ErrorKind::Internal,
            },
            RpcError::Server(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = ErrorResponse {
            error: ErrorBody {
                kind,
                message: self.to_string(),
            },
        };
        (kind.status(), Json(body)).into_response()
    }
}
