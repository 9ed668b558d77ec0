use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::infra::error::InfraError;

use super::{exchange::CacheResponse, store::StoreError};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Request-level failures of the cache protocol.
///
/// Conditional-request verdicts (304, 409, 412) are not errors and never pass
/// through this type.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no key specified")]
    NoKey,
    #[error("no data sent")]
    NoBody,
    #[error("invalid `{header}` header: {reason}")]
    InvalidHeader { header: &'static str, reason: String },
    #[error("unacceptable data format `{0}`")]
    UnacceptableFormat(String),
    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
    #[error("unsupported charset `{0}`")]
    UnsupportedCharset(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl AccessError {
    pub fn invalid_header(header: &'static str, reason: impl ToString) -> Self {
        Self::InvalidHeader {
            header,
            reason: reason.to_string(),
        }
    }

    pub fn unacceptable(requested: Option<&str>) -> Self {
        Self::UnacceptableFormat(requested.unwrap_or("*/*").to_string())
    }

    pub fn worker_pool(message: impl Into<String>) -> Self {
        Self::WorkerPool(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AccessError::NoKey
            | AccessError::NoBody
            | AccessError::InvalidHeader { .. }
            | AccessError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            AccessError::UnacceptableFormat(_)
            | AccessError::UnsupportedCharset(_)
            | AccessError::Store(StoreError::Encoding { .. }) => StatusCode::NOT_ACCEPTABLE,
            AccessError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AccessError::Store(StoreError::UnknownCache(_)) => StatusCode::NOT_FOUND,
            AccessError::Store(StoreError::Backend(_)) | AccessError::WorkerPool(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Outcome label used in request metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            AccessError::NoKey => "no_key",
            AccessError::NoBody => "no_body",
            AccessError::InvalidHeader { .. } => "invalid_header",
            AccessError::UnacceptableFormat(_) => "unacceptable",
            AccessError::UnsupportedContentType(_) => "unsupported_content_type",
            AccessError::UnsupportedCharset(_) => "unsupported_charset",
            AccessError::UnknownAction(_) => "unknown_action",
            AccessError::Store(StoreError::UnknownCache(_)) => "unknown_cache",
            AccessError::Store(StoreError::Encoding { .. }) => "encoding",
            AccessError::Store(StoreError::Backend(_)) => "store_failure",
            AccessError::WorkerPool(_) => "worker_pool",
        }
    }

    fn presentation_message(&self) -> String {
        match self {
            AccessError::Store(StoreError::Backend(_)) | AccessError::WorkerPool(_) => {
                "Unexpected error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<AccessError> for CacheResponse {
    fn from(error: AccessError) -> Self {
        let status = error.status_code();
        let mut response = CacheResponse::new(status).diagnostic(error.presentation_message());
        response.report = Some(ErrorReport::from_error(
            "application::error::AccessError",
            status,
            &error,
        ));
        response
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
}
