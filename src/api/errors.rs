// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! API error taxonomy and its mapping onto HTTP status codes.
//!
//! Every typed adapter/store error is caught at the handler boundary and
//! folded into one of these variants; the response body is always
//! `{"error": <string>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::escrow::EscrowError;
use crate::identity::IdentityError;
use crate::models::InvalidWallet;
use crate::settlement::SettlementError;
use crate::state_machine::TransitionError;
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub enum ApiError {
    Validation(String),
    Authorization(String),
    NotFound(String),
    InvalidTransition(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Validation(msg)
            | ApiError::Authorization(msg)
            | ApiError::NotFound(msg)
            | ApiError::InvalidTransition(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!("internal error surfaced to client: {}", self.message());
        }
        (self.status_code(), Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::InvalidTransition(e) => ApiError::InvalidTransition(e.to_string()),
            StoreError::AlreadyAccepted(job) => {
                ApiError::Conflict(format!("a bid on job {job} has already been accepted"))
            }
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Io(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotCreator => ApiError::Authorization(err.to_string()),
            TransitionError::InvalidTransition { .. } => {
                ApiError::InvalidTransition(err.to_string())
            }
        }
    }
}

impl From<EscrowError> for ApiError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::AlreadyDeposited(_) | EscrowError::AlreadySettled(_) => {
                ApiError::Conflict(err.to_string())
            }
            EscrowError::NotFound(_) => ApiError::NotFound(err.to_string()),
            EscrowError::InsufficientFunds
            | EscrowError::AmountMismatch { .. }
            | EscrowError::DepositorMismatch { .. }
            | EscrowError::NotHeld(_)
            | EscrowError::Unsupported(_) => ApiError::Validation(err.to_string()),
            EscrowError::Unavailable(_) => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound(_) | IdentityError::NotRegistered(_) => {
                ApiError::NotFound(err.to_string())
            }
            IdentityError::Unavailable(_) => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Escrow(e) => e.into(),
            SettlementError::Store(e) => e.into(),
            SettlementError::NoAssignedWorker(_) | SettlementError::UnknownWorker(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<InvalidWallet> for ApiError {
    fn from(err: InvalidWallet) -> Self {
        ApiError::Validation(err.to_string())
    }
}
