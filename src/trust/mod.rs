//! Trust: evaluations, the trust graph, and reputation aggregation
//!
//! Evaluations are signed directed edges scoped to a realm and domain. The
//! graph engine computes direct and transitive trust over those edges; the
//! aggregator folds evaluations and verified attestations into a cached
//! reputation with a Sybil-resistance assessment.

pub mod evaluation;
pub mod graph;
pub mod reputation;

pub use evaluation::{Evaluation, EvaluationStore, NewEvaluation};
pub use graph::{
    TransitiveTrustQuery, TransitiveTrustResult, TrustGraph, TrustPath, DEFAULT_DECAY_FACTOR,
    DEFAULT_MAX_DEPTH, DEFAULT_MIN_CONFIDENCE,
};
pub use reputation::{
    compute_reputation_with_decay, compute_sybil_resistance, ReputationConfig, ReputationService,
    ReputationSnapshot, SybilReport,
};
