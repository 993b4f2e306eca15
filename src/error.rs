//! Service error taxonomy.
//!
//! Every failure surfaced to a caller maps to a stable `{code, message,
//! details?}` triple. Validation and not-found conditions are recovered at
//! the API boundary; resolver failures become verification-run outcomes and
//! never abort the request that triggered them.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during reputation-service operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A request field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The referenced realm does not exist.
    #[error("unknown realm: {0}")]
    InvalidRealm(String),

    /// The referenced resolver is not registered or not usable.
    #[error("invalid resolver: {0}")]
    InvalidResolver(String),

    /// Evidence failed the resolver's schema validation.
    #[error("evidence rejected by resolver {resolver}")]
    InvalidEvidence {
        resolver: String,
        errors: Vec<String>,
    },

    /// The referenced parent realm is missing or would create a cycle.
    #[error("invalid parent realm: {0}")]
    InvalidParent(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An entity with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The attestation was already revoked.
    #[error("attestation already revoked: {0}")]
    AlreadyRevoked(String),

    /// No resolver is registered under the requested id/version.
    #[error("resolver not found: {0}")]
    ResolverNotFound(String),

    /// A resolver exceeded its verification time bound.
    #[error("resolver {resolver} timed out after {timeout_ms}ms")]
    ResolverTimeout { resolver: String, timeout_ms: u64 },

    /// The audit chain failed integrity verification.
    #[error("audit chain integrity violation at event {0}")]
    ChainIntegrity(usize),

    /// Signing, storage, or another internal collaborator failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable error code for the wire envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::InvalidRealm(_) => "INVALID_REALM",
            ServiceError::InvalidResolver(_) => "INVALID_RESOLVER",
            ServiceError::InvalidEvidence { .. } => "INVALID_EVIDENCE",
            ServiceError::InvalidParent(_) => "INVALID_PARENT",
            ServiceError::NotFound { .. } => "NOT_FOUND",
            ServiceError::AlreadyExists(_) => "ALREADY_EXISTS",
            ServiceError::AlreadyRevoked(_) => "ALREADY_REVOKED",
            ServiceError::ResolverNotFound(_) => "RESOLVER_NOT_FOUND",
            ServiceError::ResolverTimeout { .. } => "RESOLVER_TIMEOUT",
            ServiceError::ChainIntegrity(_) => "CHAIN_INTEGRITY",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured detail payload, where a variant carries one.
    pub fn details(&self) -> Option<Value> {
        match self {
            ServiceError::InvalidEvidence { errors, .. } => {
                Some(serde_json::json!({ "fieldErrors": errors }))
            }
            ServiceError::ResolverTimeout { timeout_ms, .. } => {
                Some(serde_json::json!({ "timeoutMs": timeout_ms }))
            }
            _ => None,
        }
    }

    /// Shortcut for storage-layer failures.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        ServiceError::Internal(format!("storage failure: {}", err))
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            ServiceError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            ServiceError::NotFound {
                kind: "realm",
                id: "r1".into()
            }
            .code(),
            "NOT_FOUND"
        );
        assert_eq!(ServiceError::Internal("x".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_evidence_errors_become_details() {
        let err = ServiceError::InvalidEvidence {
            resolver: "content-hash".into(),
            errors: vec!["missing required field: content".into()],
        };
        let details = err.details().unwrap();
        assert!(details["fieldErrors"][0]
            .as_str()
            .unwrap()
            .contains("content"));
    }
}
