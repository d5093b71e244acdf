// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Admin HTTP surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::api::error::ApiResult;
use crate::api::models::{
    DeployRequest, DeploymentResponse, ErrorResponse, HealthResponse, ReplicaResponse, WorkerResponse,
};
use crate::deployments::CreateDeploymentRequest;
use crate::orchestrator::Orchestrator;
use crate::types::DeploymentId;

/// Admin HTTP routes.
pub struct RestApi;

impl RestApi {
    /// Build the admin router over a shared orchestrator handle.
    pub fn router() -> Router<Arc<Orchestrator>> {
        Router::new()
            .route("/health", get(health_check))
            .route("/deploy", post(deploy))
            .route("/deployments", get(list_deployments))
            .route("/deployment/:id", get(get_deployment))
            .route("/workers", get(list_workers))
            .route("/replicas/:deployment_id", get(list_replicas))
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
        timestamp: Utc::now(),
    })
}

async fn deploy(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let deployment = orchestrator
        .create_deployment(CreateDeploymentRequest {
            repo_ref: request.github_repo,
            owner: request.user_name,
            min_replicas: request.min_replicas,
            max_replicas: request.max_replicas,
        })
        .await?;

    Ok(Json(DeploymentResponse::from(deployment)))
}

async fn list_deployments(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<DeploymentResponse>> {
    let deployments = orchestrator
        .recent_deployments()
        .into_iter()
        .map(DeploymentResponse::from)
        .collect();
    Json(deployments)
}

async fn get_deployment(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<u64>,
) -> Result<Json<DeploymentResponse>, (axum::http::StatusCode, Json<ErrorResponse>)> {
    match orchestrator.get_deployment(DeploymentId(id)) {
        Some(deployment) => Ok(Json(DeploymentResponse::from(deployment))),
        None => Err((
            axum::http::StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("deployment not found: {id}"))),
        )),
    }
}

async fn list_workers(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<WorkerResponse>> {
    let workers = orchestrator
        .workers_by_freshness()
        .into_iter()
        .map(WorkerResponse::from)
        .collect();
    Json(workers)
}

async fn list_replicas(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(deployment_id): Path<u64>,
) -> Json<Vec<ReplicaResponse>> {
    let replicas = orchestrator
        .replicas_for(DeploymentId(deployment_id))
        .into_iter()
        .map(ReplicaResponse::from)
        .collect();
    Json(replicas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        let orchestrator = Orchestrator::new(Config::default());
        RestApi::router().with_state(orchestrator)
    }

    #[tokio::test]
    async fn test_health_check_returns_200() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_unknown_deployment_returns_404() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/deployment/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_deployments_empty_initially() {
        let response = app()
            .oneshot(Request::builder().uri("/deployments").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
