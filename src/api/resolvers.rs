//! Resolver API endpoints
//!
//! Endpoints:
//!   GET  /resolvers                 -> Catalog of registered resolvers
//!   GET  /resolvers/{id}?version=   -> One descriptor
//!   POST /resolvers                 -> Register a metadata-only descriptor
//!   POST /resolvers/{id}/deprecate  -> Deprecate every version of an id
//!   POST /resolvers/{id}/test       -> Validate + dry-run evidence

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::timeout;

use crate::api::{success, ApiFailure};
use crate::error::ServiceError;
use crate::resolver::{Resolver, ResolverMetadata, ResolverRegistry};

/// State for resolver endpoints.
#[derive(Clone)]
pub struct ResolverApiState {
    pub registry: Arc<ResolverRegistry>,
}

#[derive(Debug, Deserialize)]
struct DescribeParams {
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TestRequest {
    evidence: Value,
}

async fn list_resolvers(State(state): State<ResolverApiState>) -> Result<Response, ApiFailure> {
    Ok(success(StatusCode::OK, state.registry.list().await))
}

async fn get_resolver(
    State(state): State<ResolverApiState>,
    Path(id): Path<String>,
    Query(params): Query<DescribeParams>,
) -> Result<Response, ApiFailure> {
    let descriptor = state
        .registry
        .describe(&id, params.version.as_deref())
        .await
        .ok_or(ServiceError::ResolverNotFound(id))?;
    Ok(success(StatusCode::OK, descriptor))
}

async fn register_resolver(
    State(state): State<ResolverApiState>,
    Json(metadata): Json<ResolverMetadata>,
) -> Result<Response, ApiFailure> {
    if metadata.id.is_empty() || metadata.version.is_empty() {
        return Err(
            ServiceError::Validation("resolver id and version are required".into()).into(),
        );
    }
    let descriptor = state.registry.register_descriptor(metadata).await?;
    Ok(success(StatusCode::CREATED, descriptor))
}

async fn deprecate_resolver(
    State(state): State<ResolverApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiFailure> {
    let updated = state.registry.deprecate(&id).await?;
    Ok(success(StatusCode::OK, updated))
}

/// Dry-run a resolver against caller-supplied evidence. Schema validation
/// always runs; the verification itself only for invocable resolvers.
async fn test_resolver(
    State(state): State<ResolverApiState>,
    Path(id): Path<String>,
    Json(request): Json<TestRequest>,
) -> Result<Response, ApiFailure> {
    let resolver = state
        .registry
        .get(&id, None)
        .await
        .ok_or(ServiceError::ResolverNotFound(id.clone()))?;

    let validation = resolver.validate_evidence(&request.evidence);
    if !validation.valid {
        return Ok(success(
            StatusCode::OK,
            json!({ "validation": validation, "outcome": null }),
        ));
    }

    let bound = resolver.metadata().verification_timeout();
    let outcome = match timeout(bound, resolver.verify(&request.evidence)).await {
        Ok(Ok(outcome)) => json!({
            "verified": outcome.verified,
            "output": outcome.output,
        }),
        Ok(Err(e)) => json!({ "verified": false, "error": e.to_string() }),
        Err(_) => {
            return Err(ServiceError::ResolverTimeout {
                resolver: id,
                timeout_ms: bound.as_millis() as u64,
            }
            .into())
        }
    };
    Ok(success(
        StatusCode::OK,
        json!({ "validation": validation, "outcome": outcome }),
    ))
}

/// Create the resolver API router.
pub fn create_router(state: ResolverApiState) -> Router {
    Router::new()
        .route("/", get(list_resolvers).post(register_resolver))
        .route("/{id}", get(get_resolver))
        .route("/{id}/deprecate", post(deprecate_resolver))
        .route("/{id}/test", post(test_resolver))
        .with_state(state)
}
