// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Admin HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::models::ErrorResponse;
use crate::error::OrchestratorError;

/// Admin API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Thin wrapper mapping `OrchestratorError` onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl ApiError {
    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            OrchestratorError::InvalidRepository(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::InsufficientWorkers { .. } => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::WorkerUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::StateStoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::WorkerTaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::ProtocolError(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::DeploymentNotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(self.0.to_string());
        (status, Json(body)).into_response()
    }
}
