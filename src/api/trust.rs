//! Trust API endpoints
//!
//! Endpoints:
//!   POST /trust/evaluations          -> Submit (upsert) an evaluation
//!   GET  /trust/evaluations          -> List evaluations, filtered
//!   POST /trust/transitive           -> Transitive trust query
//!   GET  /trust/reputation/{subject} -> Reputation (?realm&domain&refresh)
//!   GET  /trust/sybil/{subject}      -> Sybil-resistance report (?realm)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{success, ApiFailure};
use crate::error::ServiceError;
use crate::storage::{EvaluationFilter, Repository};
use crate::trust::evaluation::{EvaluationStore, NewEvaluation};
use crate::trust::graph::{
    TransitiveTrustQuery, TrustGraph, DEFAULT_DECAY_FACTOR, DEFAULT_MAX_DEPTH,
    DEFAULT_MIN_CONFIDENCE,
};
use crate::trust::reputation::ReputationService;

/// State for trust endpoints.
#[derive(Clone)]
pub struct TrustApiState {
    pub evaluations: Arc<EvaluationStore>,
    pub reputation: Arc<ReputationService>,
    pub repository: Arc<dyn Repository>,
}

#[derive(Debug, Deserialize)]
struct ListEvaluationsParams {
    from: Option<String>,
    to: Option<String>,
    realm: Option<String>,
    domain: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitiveRequest {
    from: String,
    to: String,
    domain: String,
    realm_id: Option<String>,
    max_depth: Option<u32>,
    decay_factor: Option<f64>,
    min_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ReputationParams {
    realm: String,
    domain: String,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize)]
struct SybilParams {
    realm: String,
}

async fn submit_evaluation(
    State(state): State<TrustApiState>,
    Json(request): Json<NewEvaluation>,
) -> Result<Response, ApiFailure> {
    let evaluation = state.evaluations.submit(request).await?;
    Ok(success(StatusCode::CREATED, evaluation))
}

async fn list_evaluations(
    State(state): State<TrustApiState>,
    Query(params): Query<ListEvaluationsParams>,
) -> Result<Response, ApiFailure> {
    let evaluations = state
        .evaluations
        .list(EvaluationFilter {
            from_entity: params.from,
            to_entity: params.to,
            realm_id: params.realm,
            domain: params.domain,
            limit: params.limit,
            offset: params.offset,
        })
        .await?;
    Ok(success(StatusCode::OK, evaluations))
}

async fn transitive_trust(
    State(state): State<TrustApiState>,
    Json(request): Json<TransitiveRequest>,
) -> Result<Response, ApiFailure> {
    if request.from.is_empty() || request.to.is_empty() || request.domain.is_empty() {
        return Err(
            ServiceError::Validation("from, to, and domain are required".into()).into(),
        );
    }

    // Realm-scoped queries inherit the realm's transitive-trust rules where
    // the caller did not override them.
    let (realm_depth, realm_decay) = match &request.realm_id {
        Some(realm_id) => {
            let realm = state
                .repository
                .get_realm(realm_id)
                .await?
                .ok_or_else(|| ServiceError::InvalidRealm(realm_id.clone()))?;
            (
                Some(realm.rules.max_transitive_depth),
                Some(realm.rules.transitive_decay_factor),
            )
        }
        None => (None, None),
    };

    // The graph is loaded once per query from the bounded edge set for the
    // requested domain and released when the query returns.
    let evaluations = state
        .repository
        .list_evaluations(&EvaluationFilter {
            domain: Some(request.domain.clone()),
            realm_id: request.realm_id.clone(),
            ..Default::default()
        })
        .await?;
    let graph = TrustGraph::from_evaluations(&evaluations);

    let query = TransitiveTrustQuery {
        from: request.from,
        to: request.to,
        domain: request.domain,
        realm_id: request.realm_id,
        max_depth: request
            .max_depth
            .or(realm_depth)
            .unwrap_or(DEFAULT_MAX_DEPTH),
        decay_factor: request
            .decay_factor
            .or(realm_decay)
            .unwrap_or(DEFAULT_DECAY_FACTOR),
        min_confidence: request.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
    };
    Ok(success(StatusCode::OK, graph.transitive_trust(&query)))
}

async fn get_reputation(
    State(state): State<TrustApiState>,
    Path(subject): Path<String>,
    Query(params): Query<ReputationParams>,
) -> Result<Response, ApiFailure> {
    let snapshot = state
        .reputation
        .get_reputation(&subject, &params.realm, &params.domain, params.refresh)
        .await?;
    Ok(success(StatusCode::OK, snapshot))
}

async fn get_sybil_resistance(
    State(state): State<TrustApiState>,
    Path(subject): Path<String>,
    Query(params): Query<SybilParams>,
) -> Result<Response, ApiFailure> {
    let report = state
        .reputation
        .sybil_resistance(&subject, &params.realm)
        .await?;
    Ok(success(StatusCode::OK, report))
}

/// Create the trust API router.
pub fn create_router(state: TrustApiState) -> Router {
    Router::new()
        .route("/evaluations", post(submit_evaluation).get(list_evaluations))
        .route("/transitive", post(transitive_trust))
        .route("/reputation/{subject}", get(get_reputation))
        .route("/sybil/{subject}", get(get_sybil_resistance))
        .with_state(state)
}
