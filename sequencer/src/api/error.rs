// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::mempool::RejectionReason;
use crate::production::SequencerError;
use crate::query::QueryError;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidSignature(String),
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InternalError(String),
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::Rejected(_) => "REJECTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

impl From<SequencerError> for ApiError {
    fn from(value: SequencerError) -> Self {
        match value {
            SequencerError::Invalid(message) => Self::Rejected(message),
            SequencerError::Internal(message) => Self::InternalError(message),
            SequencerError::External(message) => Self::Unavailable(message),
        }
    }
}

impl From<RejectionReason> for ApiError {
    fn from(value: RejectionReason) -> Self {
        SequencerError::from(value).into()
    }
}

impl From<QueryError> for ApiError {
    fn from(value: QueryError) -> Self {
        match value {
            QueryError::UnknownField { .. } => Self::NotFound(value.to_string()),
            QueryError::Path(_) => Self::BadRequest(value.to_string()),
            QueryError::State(_) => Self::InternalError(value.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            ok: false,
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
