//! HTTP API for the reputation service
//!
//! One router factory per area, composed in `main.rs`:
//! - `/realms`        - trust-context hierarchy
//! - `/attestations`  - attestation lifecycle
//! - `/verify`        - verification runs and history
//! - `/trust`         - evaluations, transitive trust, reputation
//! - `/proofs`        - portable proof issuance and verification
//! - `/resolvers`     - resolver catalog
//! - `/health`, `/info`
//!
//! Every response uses the envelope
//! `{ success, data?, error?: { code, message, details? } }`.

pub mod attestations;
pub mod proofs;
pub mod realms;
pub mod resolvers;
pub mod system;
pub mod trust;
pub mod verification;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::error::ServiceError;

pub use attestations::{create_router as create_attestation_router, AttestationApiState};
pub use proofs::{create_router as create_proof_router, ProofApiState};
pub use realms::{create_router as create_realm_router, RealmApiState};
pub use resolvers::{create_router as create_resolver_router, ResolverApiState};
pub use system::{create_router as create_system_router, SystemApiState};
pub use trust::{create_router as create_trust_router, TrustApiState};
pub use verification::{create_router as create_verification_router, VerificationApiState};

/// Build a success envelope response.
pub(crate) fn success(status: StatusCode, data: impl Serialize) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => (
            status,
            Json(json!({ "success": true, "data": value })),
        )
            .into_response(),
        Err(e) => ApiFailure(ServiceError::Internal(e.to_string())).into_response(),
    }
}

/// Service-error wrapper carrying the envelope and status mapping.
pub(crate) struct ApiFailure(pub ServiceError);

impl From<ServiceError> for ApiFailure {
    fn from(err: ServiceError) -> Self {
        ApiFailure(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            ServiceError::Validation(_)
            | ServiceError::InvalidRealm(_)
            | ServiceError::InvalidResolver(_)
            | ServiceError::InvalidEvidence { .. }
            | ServiceError::InvalidParent(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound { .. } | ServiceError::ResolverNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::AlreadyExists(_) | ServiceError::AlreadyRevoked(_) => {
                StatusCode::CONFLICT
            }
            ServiceError::ResolverTimeout { .. }
            | ServiceError::ChainIntegrity(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal failures are logged with detail and reported generically.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "Internal error");
            "internal error".to_string()
        } else {
            err.to_string()
        };

        let mut body = json!({
            "success": false,
            "error": { "code": err.code(), "message": message },
        });
        if let Some(details) = err.details() {
            body["error"]["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

