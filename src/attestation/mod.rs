//! Attestations: signed claims with machine-verifiable evidence
//!
//! An attestation binds an attester's claim about a subject to evidence that
//! a resolver can check. Content fields are immutable once created; only the
//! status, verification counters, and `updatedAt` mutate. Each verification
//! produces an immutable [`VerificationRun`] record.

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use manager::AttestationManager;

/// Lifecycle state of an attestation.
///
/// `revoked` and `expired` are terminal for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationStatus {
    Pending,
    Verified,
    Failed,
    Revoked,
    Expired,
}

impl AttestationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationStatus::Pending => "pending",
            AttestationStatus::Verified => "verified",
            AttestationStatus::Failed => "failed",
            AttestationStatus::Revoked => "revoked",
            AttestationStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttestationStatus::Pending),
            "verified" => Some(AttestationStatus::Verified),
            "failed" => Some(AttestationStatus::Failed),
            "revoked" => Some(AttestationStatus::Revoked),
            "expired" => Some(AttestationStatus::Expired),
            _ => None,
        }
    }

    /// Whether verification may still run from this state.
    pub fn verifiable(&self) -> bool {
        !matches!(self, AttestationStatus::Revoked | AttestationStatus::Expired)
    }
}

/// A signed claim about a subject, backed by resolver-checkable evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Content id over `{realmId, subject, claim, resolverId, evidence,
    /// references, ts}`.
    pub id: String,
    pub realm_id: String,
    pub attester: String,
    pub subject: String,
    pub claim: String,
    pub resolver_id: String,
    pub evidence: Value,
    /// Content ids of other attestations this one builds on.
    pub references: Vec<String>,
    /// Instance signature over the content fields.
    pub signature: String,
    pub status: AttestationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verification_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
}

/// Terminal status of a single verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Verified,
    Failed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Verified => "verified",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verified" => Some(RunStatus::Verified),
            "failed" => Some(RunStatus::Failed),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// One verification attempt. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRun {
    pub id: String,
    pub attestation_id: String,
    pub resolver_id: String,
    pub resolver_version: String,
    pub status: RunStatus,
    pub output: Value,
    /// `sha256(canonical(output))`.
    pub output_hash: String,
    /// Evidence as it stood when the run executed.
    pub snapshot: Value,
    pub duration_ms: u64,
    pub triggered_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Creation request for an attestation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttestation {
    pub realm_id: String,
    pub attester: String,
    pub subject: String,
    pub claim: String,
    pub resolver_id: String,
    pub evidence: Value,
    #[serde(default)]
    pub references: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
