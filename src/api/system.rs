//! System endpoints
//!
//! Endpoints:
//!   GET /health -> Liveness with audit-chain status
//!   GET /info   -> Service identity and version

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::sync::Arc;

use crate::api::{success, ApiFailure};
use crate::audit::AuditLog;
use crate::crypto::signing::InstanceIdentity;

/// State for system endpoints.
#[derive(Clone)]
pub struct SystemApiState {
    pub identity: Arc<InstanceIdentity>,
    pub audit: Arc<AuditLog>,
}

async fn health(State(state): State<SystemApiState>) -> Result<Response, ApiFailure> {
    let chain = state.audit.verify_chain().await?;
    Ok(success(
        StatusCode::OK,
        json!({
            "status": if chain.valid { "ok" } else { "degraded" },
            "auditChain": chain,
        }),
    ))
}

async fn info(State(state): State<SystemApiState>) -> Result<Response, ApiFailure> {
    Ok(success(
        StatusCode::OK,
        json!({
            "service": "irrl",
            "version": env!("CARGO_PKG_VERSION"),
            "issuer": state.identity.issuer(),
            "publicKey": state.identity.public_key_pem(),
            "proofVersion": crate::proof::PROOF_VERSION,
        }),
    ))
}

/// Create the system router (mounted at the root).
pub fn create_router(state: SystemApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .with_state(state)
}
