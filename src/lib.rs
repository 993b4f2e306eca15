//! IRRL: contextual reputation and trust service
//!
//! Answers, for a subject and a domain of competence, "how trustworthy is
//! this entity, and on what verifiable evidence does that assessment rest?"
//! Clients submit signed attestations (claims + evidence) and signed
//! evaluations (direct trust edges), then query computed reputation,
//! transitive trust across the evaluation graph, and portable signed proofs
//! backed by Merkle commitments.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Environment configuration
//! ├── error.rs       - Service error taxonomy
//! ├── crypto/        - Deterministic foundations
//! │   ├── canonical.rs - Canonical JSON, SHA-256, content ids
//! │   ├── signing.rs   - Ed25519 over canonical bytes (PEM / base64)
//! │   └── merkle.rs    - Merkle roots and inclusion proofs
//! ├── audit/         - Append-only hash-chained audit log
//! ├── resolver/      - Verification plugins and the registry
//! ├── realm/         - Hierarchical trust contexts with rules
//! ├── attestation/   - Attestation lifecycle and verification runs
//! ├── trust/         - Evaluations, trust graph, reputation aggregation
//! ├── proof/         - Portable signed reputation proofs
//! ├── storage/       - Repository trait, in-memory and PostgreSQL backends
//! └── api/           - HTTP adapter (axum routers per area)
//! ```

pub mod api;
pub mod attestation;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod proof;
pub mod realm;
pub mod resolver;
pub mod storage;
pub mod trust;

// Re-export main types for convenience
pub use attestation::{
    Attestation, AttestationManager, AttestationStatus, NewAttestation, RunStatus, VerificationRun,
};
pub use audit::{AuditEvent, AuditLog, ChainVerification};
pub use config::AppConfig;
pub use crypto::{
    canonical_bytes, content_id, generate_key_pair, merkle_root, sha256_hex, InstanceIdentity,
    KeyPair, MerkleProof,
};
pub use error::{ServiceError, ServiceResult};
pub use proof::{ProofEnvelope, ProofService, ProofVerification, ReputationProof, StoredProof};
pub use realm::{NewRealm, Realm, RealmRules, RealmStore};
pub use resolver::{
    EvidenceSchema, Resolver, ResolverDescriptor, ResolverMetadata, ResolverOutcome,
    ResolverRegistry,
};
pub use storage::{MemoryRepository, PostgresRepository, Repository};
pub use trust::{
    Evaluation, EvaluationStore, NewEvaluation, ReputationService, ReputationSnapshot,
    TransitiveTrustQuery, TransitiveTrustResult, TrustGraph,
};
