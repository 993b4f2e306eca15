//! Proof API endpoints
//!
//! Endpoints:
//!   POST /proofs/generate        -> Issue a signed reputation proof
//!   POST /proofs/verify          -> Verify an envelope (3 independent checks)
//!   GET  /proofs                 -> List proofs, filtered
//!   GET  /proofs/{id}            -> Fetch a stored proof
//!   POST /proofs/evidence-proof  -> Merkle inclusion proof for one evidence id
//!   POST /proofs/verify-evidence -> Check an inclusion proof against a root

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::api::{success, ApiFailure};
use crate::crypto::merkle::MerkleProof;
use crate::proof::{ProofEnvelope, ProofService};
use crate::storage::ProofFilter;

/// State for proof endpoints.
#[derive(Clone)]
pub struct ProofApiState {
    pub proofs: Arc<ProofService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateProofRequest {
    subject: String,
    realm_id: String,
    domain: String,
    valid_for_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct VerifyProofRequest {
    proof: ProofEnvelope,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvidenceProofRequest {
    proof_id: String,
    evidence_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyEvidenceRequest {
    merkle_proof: MerkleProof,
    expected_root: String,
}

#[derive(Debug, Deserialize)]
struct ListProofsParams {
    subject: Option<String>,
    realm: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn generate_proof(
    State(state): State<ProofApiState>,
    Json(request): Json<GenerateProofRequest>,
) -> Result<Response, ApiFailure> {
    let stored = state
        .proofs
        .generate(
            &request.subject,
            &request.realm_id,
            &request.domain,
            request.valid_for_days,
        )
        .await?;
    Ok(success(
        StatusCode::CREATED,
        json!({
            "proofId": stored.id,
            "proof": stored.envelope,
            "evidenceCount": stored.evidence_count,
        }),
    ))
}

async fn verify_proof(
    State(state): State<ProofApiState>,
    Json(request): Json<VerifyProofRequest>,
) -> Result<Response, ApiFailure> {
    Ok(success(StatusCode::OK, state.proofs.verify(&request.proof)))
}

async fn list_proofs(
    State(state): State<ProofApiState>,
    Query(params): Query<ListProofsParams>,
) -> Result<Response, ApiFailure> {
    let proofs = state
        .proofs
        .list(ProofFilter {
            subject: params.subject,
            realm_id: params.realm,
            limit: params.limit,
            offset: params.offset,
        })
        .await?;
    Ok(success(StatusCode::OK, proofs))
}

async fn get_proof(
    State(state): State<ProofApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiFailure> {
    Ok(success(StatusCode::OK, state.proofs.get(&id).await?))
}

async fn evidence_proof(
    State(state): State<ProofApiState>,
    Json(request): Json<EvidenceProofRequest>,
) -> Result<Response, ApiFailure> {
    let proof = state
        .proofs
        .evidence_proof(&request.proof_id, &request.evidence_id)
        .await?;
    Ok(success(StatusCode::OK, proof))
}

async fn verify_evidence(
    State(state): State<ProofApiState>,
    Json(request): Json<VerifyEvidenceRequest>,
) -> Result<Response, ApiFailure> {
    let valid = state
        .proofs
        .verify_evidence(&request.merkle_proof, &request.expected_root);
    Ok(success(StatusCode::OK, json!({ "valid": valid })))
}

/// Create the proof API router.
pub fn create_router(state: ProofApiState) -> Router {
    Router::new()
        .route("/generate", post(generate_proof))
        .route("/verify", post(verify_proof))
        .route("/evidence-proof", post(evidence_proof))
        .route("/verify-evidence", post(verify_evidence))
        .route("/", get(list_proofs))
        .route("/{id}", get(get_proof))
        .with_state(state)
}
