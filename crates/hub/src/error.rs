// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the hub API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubError {
    InvalidArgument,
    Unauthorized,
    NotApproved,
    NotFound,
    Conflict,
    PoolExhausted,
    Transient,
    Internal,
    InvariantViolated,
}

impl HubError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::Unauthorized => 401,
            Self::NotApproved => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::PoolExhausted => 503,
            Self::Transient => 503,
            Self::Internal => 500,
            Self::InvariantViolated => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotApproved => "NOT_APPROVED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::Transient => "TRANSIENT",
            Self::Internal => "INTERNAL",
            Self::InvariantViolated => "INVARIANT_VIOLATED",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for HubError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// A domain operation result carrying a code and message.
pub type HubResult<T> = Result<T, (HubError, String)>;

/// Shorthand for building the `(code, message)` error pair.
pub fn err<T>(code: HubError, message: impl Into<String>) -> HubResult<T> {
    Err((code, message.into()))
}
