//! Realm API endpoints
//!
//! Endpoints:
//!   POST /realms                    -> Create a realm
//!   GET  /realms                    -> List realms (domain, parent, paging)
//!   GET  /realms/{id}/children      -> Children, optionally recursive
//!   GET  /realms/{id-or-path}       -> Fetch by id or materialized path

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{success, ApiFailure};
use crate::realm::{NewRealm, RealmStore};
use crate::storage::RealmFilter;

/// State for realm endpoints.
#[derive(Clone)]
pub struct RealmApiState {
    pub realms: Arc<RealmStore>,
}

#[derive(Debug, Deserialize)]
struct ListRealmsParams {
    domain: Option<String>,
    parent: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ChildrenParams {
    #[serde(default)]
    recursive: bool,
}

async fn create_realm(
    State(state): State<RealmApiState>,
    Json(request): Json<NewRealm>,
) -> Result<Response, ApiFailure> {
    let realm = state.realms.create(request).await?;
    Ok(success(StatusCode::CREATED, realm))
}

async fn list_realms(
    State(state): State<RealmApiState>,
    Query(params): Query<ListRealmsParams>,
) -> Result<Response, ApiFailure> {
    let realms = state
        .realms
        .list(RealmFilter {
            domain: params.domain,
            parent: params.parent,
            limit: params.limit,
            offset: params.offset,
            ..Default::default()
        })
        .await?;
    Ok(success(StatusCode::OK, realms))
}

async fn get_children(
    State(state): State<RealmApiState>,
    Path(id): Path<String>,
    Query(params): Query<ChildrenParams>,
) -> Result<Response, ApiFailure> {
    let children = state.realms.children(&id, params.recursive).await?;
    Ok(success(StatusCode::OK, children))
}

async fn get_realm(
    State(state): State<RealmApiState>,
    Path(id_or_path): Path<String>,
) -> Result<Response, ApiFailure> {
    let realm = state.realms.get(&id_or_path).await?;
    Ok(success(StatusCode::OK, realm))
}

/// Create the realm API router.
pub fn create_router(state: RealmApiState) -> Router {
    Router::new()
        .route("/", post(create_realm).get(list_realms))
        .route("/{id}/children", get(get_children))
        // Realm paths contain '/', so the lookup route is a wildcard.
        .route("/{*id_or_path}", get(get_realm))
        .with_state(state)
}
