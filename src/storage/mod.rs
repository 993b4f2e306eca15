//! Persistent storage abstraction
//!
//! Every component talks to storage through the [`Repository`] trait; each
//! operation is atomic. Two operations bundle multiple writes on purpose:
//! `upsert_evaluation` also clears the subject's reputation cache so a
//! reputation reader can never observe a cache entry a fresh evaluation
//! should have invalidated, and `record_verification` commits a run together
//! with its attestation's status change.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::attestation::{Attestation, AttestationStatus, VerificationRun};
use crate::audit::AuditEvent;
use crate::error::ServiceResult;
use crate::proof::StoredProof;
use crate::realm::Realm;
use crate::trust::evaluation::Evaluation;
use crate::trust::reputation::ReputationSnapshot;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// Realm listing filter.
#[derive(Debug, Clone, Default)]
pub struct RealmFilter {
    pub domain: Option<String>,
    pub parent: Option<String>,
    pub path_prefix: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Attestation listing filter.
#[derive(Debug, Clone, Default)]
pub struct AttestationFilter {
    pub realm_id: Option<String>,
    pub subject: Option<String>,
    pub status: Option<AttestationStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Evaluation listing filter.
#[derive(Debug, Clone, Default)]
pub struct EvaluationFilter {
    pub from_entity: Option<String>,
    pub to_entity: Option<String>,
    pub realm_id: Option<String>,
    pub domain: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Proof listing filter.
#[derive(Debug, Clone, Default)]
pub struct ProofFilter {
    pub subject: Option<String>,
    pub realm_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// The persistent collaborator behind every component.
#[async_trait]
pub trait Repository: Send + Sync {
    // Realms
    async fn insert_realm(&self, realm: &Realm) -> ServiceResult<()>;
    async fn get_realm(&self, id: &str) -> ServiceResult<Option<Realm>>;
    async fn get_realm_by_path(&self, path: &str) -> ServiceResult<Option<Realm>>;
    async fn list_realms(&self, filter: &RealmFilter) -> ServiceResult<Vec<Realm>>;
    /// Delete a realm, cascading to its reputation-cache and proof rows.
    async fn delete_realm(&self, id: &str) -> ServiceResult<()>;
    async fn realm_has_attestations(&self, realm_id: &str) -> ServiceResult<bool>;

    // Attestations
    async fn insert_attestation(&self, attestation: &Attestation) -> ServiceResult<()>;
    async fn get_attestation(&self, id: &str) -> ServiceResult<Option<Attestation>>;
    async fn update_attestation(&self, attestation: &Attestation) -> ServiceResult<()>;
    async fn list_attestations(&self, filter: &AttestationFilter)
        -> ServiceResult<Vec<Attestation>>;
    /// Delete an attestation and, transitively, its verification runs.
    async fn delete_attestation(&self, id: &str) -> ServiceResult<()>;
    /// Attestations past `expiresAt` that are not yet in a terminal state.
    async fn list_expirable_attestations(
        &self,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Attestation>>;

    // Verification runs
    /// Insert a run and persist its attestation's updated status atomically.
    async fn record_verification(
        &self,
        run: &VerificationRun,
        attestation: &Attestation,
    ) -> ServiceResult<()>;
    /// Runs for an attestation in insertion order.
    async fn list_runs(&self, attestation_id: &str) -> ServiceResult<Vec<VerificationRun>>;

    // Evaluations
    /// Upsert by `(from, to, realm, domain)`. An existing row keeps its id
    /// and `createdAt`; only score, weight, rationale, supporting
    /// attestations, and signature change. The subject's reputation cache
    /// for the realm is cleared in the same operation.
    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> ServiceResult<Evaluation>;
    async fn list_evaluations(&self, filter: &EvaluationFilter) -> ServiceResult<Vec<Evaluation>>;

    // Reputation cache
    async fn get_reputation_cache(
        &self,
        subject: &str,
        realm_id: &str,
        domain: &str,
    ) -> ServiceResult<Option<ReputationSnapshot>>;
    async fn upsert_reputation_cache(&self, snapshot: &ReputationSnapshot) -> ServiceResult<()>;

    // Proofs
    async fn insert_proof(&self, proof: &StoredProof) -> ServiceResult<()>;
    async fn get_proof(&self, id: &str) -> ServiceResult<Option<StoredProof>>;
    async fn list_proofs(&self, filter: &ProofFilter) -> ServiceResult<Vec<StoredProof>>;

    // Audit chain
    /// Append an event; callers guarantee serial ordering.
    async fn append_audit_event(&self, event: &AuditEvent) -> ServiceResult<()>;
    /// Hash of the latest appended event, if any.
    async fn latest_audit_hash(&self) -> ServiceResult<Option<String>>;
    /// All events in insertion order.
    async fn list_audit_events(&self) -> ServiceResult<Vec<AuditEvent>>;
}

pub(crate) fn apply_window<T>(items: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
