use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::blob::BlobError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Too many requests, try again later")]
    RateLimited { retry_after_secs: u64 },

    #[error("Too many failed authentication attempts, try again later")]
    Banned { retry_after_secs: u64 },

    // Operator problem, not the client's
    #[error("Service not configured: {0}")]
    Misconfigured(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Banned { .. } => StatusCode::FORBIDDEN,
            GatewayError::Misconfigured(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    // Metric label
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Banned { .. } => "banned",
            GatewayError::Misconfigured(_) => "misconfigured",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::NotFound => "not_found",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_secs }
            | GatewayError::Banned { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<BlobError> for GatewayError {
    fn from(err: BlobError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();
        let mut response = (status, self.to_string()).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
