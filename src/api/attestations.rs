//! Attestation API endpoints
//!
//! Endpoints:
//!   POST /attestations              -> Create an attestation (pending)
//!   GET  /attestations              -> List, filtered by realm/subject/status
//!   GET  /attestations/{id}         -> Fetch one
//!   POST /attestations/{id}/revoke  -> Revoke

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{success, ApiFailure};
use crate::attestation::{AttestationManager, AttestationStatus, NewAttestation};
use crate::error::ServiceError;
use crate::storage::{AttestationFilter, Repository};

/// State for attestation endpoints.
#[derive(Clone)]
pub struct AttestationApiState {
    pub manager: Arc<AttestationManager>,
    pub repository: Arc<dyn Repository>,
}

#[derive(Debug, Deserialize)]
struct ListAttestationsParams {
    realm: Option<String>,
    subject: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    actor: Option<String>,
}

async fn create_attestation(
    State(state): State<AttestationApiState>,
    Json(request): Json<NewAttestation>,
) -> Result<Response, ApiFailure> {
    let attestation = state.manager.create(request).await?;
    Ok(success(StatusCode::CREATED, attestation))
}

async fn list_attestations(
    State(state): State<AttestationApiState>,
    Query(params): Query<ListAttestationsParams>,
) -> Result<Response, ApiFailure> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(AttestationStatus::parse(raw).ok_or_else(|| {
            ServiceError::Validation(format!("unknown attestation status: {}", raw))
        })?),
        None => None,
    };
    let attestations = state
        .repository
        .list_attestations(&AttestationFilter {
            realm_id: params.realm,
            subject: params.subject,
            status,
            limit: params.limit,
            offset: params.offset,
        })
        .await?;
    Ok(success(StatusCode::OK, attestations))
}

async fn get_attestation(
    State(state): State<AttestationApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiFailure> {
    let attestation = state
        .repository
        .get_attestation(&id)
        .await?
        .ok_or(ServiceError::NotFound {
            kind: "attestation",
            id,
        })?;
    Ok(success(StatusCode::OK, attestation))
}

async fn revoke_attestation(
    State(state): State<AttestationApiState>,
    Path(id): Path<String>,
    request: Option<Json<RevokeRequest>>,
) -> Result<Response, ApiFailure> {
    let actor = request
        .and_then(|Json(r)| r.actor)
        .unwrap_or_else(|| "api".to_string());
    let attestation = state.manager.revoke(&id, &actor).await?;
    Ok(success(StatusCode::OK, attestation))
}

/// Create the attestation API router.
pub fn create_router(state: AttestationApiState) -> Router {
    Router::new()
        .route("/", post(create_attestation).get(list_attestations))
        .route("/{id}", get(get_attestation))
        .route("/{id}/revoke", post(revoke_attestation))
        .with_state(state)
}
