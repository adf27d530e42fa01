//! Error types for the faucet service

use crate::dispatcher::{DispatchFailure, FailureKind};
use crate::gate::CooldownScope;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("{} in cooldown", .scope.label())]
    CooldownActive {
        scope: CooldownScope,
        retry_after: Option<Duration>,
        cooldown_hours: u64,
    },

    #[error("Rate limit exceeded: try again in {0} seconds")]
    RateLimitExceeded(u64),

    #[error("Dispatch failed: {0}")]
    Dispatch(DispatchFailure),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FaucetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            FaucetError::CooldownActive { .. } | FaucetError::RateLimitExceeded(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            FaucetError::Dispatch(failure) if failure.kind == FailureKind::NetworkError => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FaucetError::Dispatch(_)
            | FaucetError::DatabaseError(_)
            | FaucetError::Config(_)
            | FaucetError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller. Never contains node or store internals.
    pub fn public_message(&self) -> String {
        match self {
            FaucetError::InvalidAddress(_) => "Invalid Ethereum address".to_string(),
            FaucetError::CooldownActive {
                scope,
                cooldown_hours,
                ..
            } => format!(
                "{} in cooldown. Please wait {} hours between requests.",
                scope.label(),
                cooldown_hours
            ),
            FaucetError::RateLimitExceeded(_) => {
                "Too many requests, please try again later.".to_string()
            }
            FaucetError::Dispatch(failure) => match failure.kind {
                FailureKind::InsufficientFunds => {
                    "Faucet is out of funds. Please try again later.".to_string()
                }
                FailureKind::NetworkError => {
                    "Blockchain node unavailable. Please try again later.".to_string()
                }
                FailureKind::RejectedByChain => "Transaction rejected by the network".to_string(),
            },
            FaucetError::DatabaseError(_)
            | FaucetError::Config(_)
            | FaucetError::InternalError(_) => "Internal error".to_string(),
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            FaucetError::CooldownActive { retry_after, .. } => {
                retry_after.map(|d| d.as_secs().max(1))
            }
            FaucetError::RateLimitExceeded(secs) => Some((*secs).max(1)),
            _ => None,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.public_message() }));
        let mut response = (status, body).into_response();

        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<DispatchFailure> for FaucetError {
    fn from(failure: DispatchFailure) -> Self {
        FaucetError::Dispatch(failure)
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
