//! Verification API endpoints
//!
//! Endpoints:
//!   POST /verify/{attestationId}          -> Run verification ({force?})
//!   GET  /verify/{attestationId}/history  -> All runs in order

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{success, ApiFailure};
use crate::attestation::AttestationManager;
use crate::error::ServiceError;
use crate::storage::Repository;

/// State for verification endpoints.
#[derive(Clone)]
pub struct VerificationApiState {
    pub manager: Arc<AttestationManager>,
    pub repository: Arc<dyn Repository>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    #[serde(default)]
    force: bool,
    triggered_by: Option<String>,
}

async fn verify_attestation(
    State(state): State<VerificationApiState>,
    Path(attestation_id): Path<String>,
    request: Option<Json<VerifyRequest>>,
) -> Result<Response, ApiFailure> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let triggered_by = request.triggered_by.unwrap_or_else(|| "api".to_string());
    let run = state
        .manager
        .verify(&attestation_id, request.force, &triggered_by)
        .await?;
    Ok(success(StatusCode::OK, run))
}

async fn verification_history(
    State(state): State<VerificationApiState>,
    Path(attestation_id): Path<String>,
) -> Result<Response, ApiFailure> {
    if state
        .repository
        .get_attestation(&attestation_id)
        .await?
        .is_none()
    {
        return Err(ServiceError::NotFound {
            kind: "attestation",
            id: attestation_id,
        }
        .into());
    }
    let runs = state.repository.list_runs(&attestation_id).await?;
    Ok(success(StatusCode::OK, runs))
}

/// Create the verification API router.
pub fn create_router(state: VerificationApiState) -> Router {
    Router::new()
        .route("/{attestation_id}", post(verify_attestation))
        .route("/{attestation_id}/history", get(verification_history))
        .with_state(state)
}
