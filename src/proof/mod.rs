//! Portable reputation proofs
//!
//! A proof is a signed, self-contained snapshot of a cached reputation plus a
//! Merkle commitment over its supporting evidence (verified attestations and
//! evaluations, each sorted by id ascending so the leaf list is
//! reconstructible from storage later). Verification reports signature,
//! expiry, and issuer checks independently so callers can tell tampering from
//! staleness.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::attestation::AttestationStatus;
use crate::audit::AuditLog;
use crate::crypto::canonical::content_id;
use crate::crypto::merkle::{generate_proof, merkle_root, verify_proof, MerkleProof};
use crate::crypto::signing::{verify_object, InstanceIdentity};
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{AttestationFilter, EvaluationFilter, Repository};
use crate::trust::reputation::ReputationSnapshot;

/// Wire version of the proof format.
pub const PROOF_VERSION: &str = "IRRL-Proof-v1";

/// Default validity window for freshly issued proofs.
pub const DEFAULT_VALID_FOR_DAYS: u32 = 7;

/// The signed body of a reputation proof. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationProof {
    pub version: String,
    pub subject: String,
    pub realm_id: String,
    pub domain: String,
    pub reputation: ProofReputation,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub evidence_merkle_root: String,
}

/// Reputation figures embedded in a proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofReputation {
    pub score: f64,
    pub confidence: f64,
    pub evaluation_count: usize,
    pub attestation_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl From<&ReputationSnapshot> for ProofReputation {
    fn from(snapshot: &ReputationSnapshot) -> Self {
        Self {
            score: snapshot.score,
            confidence: snapshot.confidence,
            evaluation_count: snapshot.evaluation_count,
            attestation_count: snapshot.attestation_count,
            computed_at: snapshot.computed_at,
        }
    }
}

/// Wire envelope around a signed proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofEnvelope {
    pub data: ReputationProof,
    pub signature: String,
    pub public_key: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// A persisted proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProof {
    pub id: String,
    pub envelope: ProofEnvelope,
    pub evidence_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Independent verification checks over a proof envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerification {
    pub valid: bool,
    pub signature_valid: bool,
    pub expired: bool,
    pub issuer_trusted: bool,
}

/// Issues and verifies portable reputation proofs.
pub struct ProofService {
    repository: Arc<dyn Repository>,
    identity: Arc<InstanceIdentity>,
    audit: Arc<AuditLog>,
    /// PEM public keys whose proofs this instance trusts.
    trusted_issuer_keys: Vec<String>,
}

impl ProofService {
    pub fn new(
        repository: Arc<dyn Repository>,
        identity: Arc<InstanceIdentity>,
        audit: Arc<AuditLog>,
        mut trusted_issuer_keys: Vec<String>,
    ) -> Self {
        // The instance always trusts its own key.
        let own = identity.public_key_pem().trim().to_string();
        if !trusted_issuer_keys.iter().any(|k| k.trim() == own) {
            trusted_issuer_keys.push(own);
        }
        Self {
            repository,
            identity,
            audit,
            trusted_issuer_keys,
        }
    }

    /// Ordered evidence leaf list: verified attestation ids for
    /// `(subject, realm)` then evaluation ids for `(subject, realm, domain)`,
    /// each ascending.
    async fn evidence_leaves(
        &self,
        subject: &str,
        realm_id: &str,
        domain: &str,
    ) -> ServiceResult<Vec<String>> {
        let mut attestation_ids: Vec<String> = self
            .repository
            .list_attestations(&AttestationFilter {
                subject: Some(subject.to_string()),
                realm_id: Some(realm_id.to_string()),
                status: Some(AttestationStatus::Verified),
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        attestation_ids.sort();

        let mut evaluation_ids: Vec<String> = self
            .repository
            .list_evaluations(&EvaluationFilter {
                to_entity: Some(subject.to_string()),
                realm_id: Some(realm_id.to_string()),
                domain: Some(domain.to_string()),
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        evaluation_ids.sort();

        attestation_ids.extend(evaluation_ids);
        Ok(attestation_ids)
    }

    /// Issue a signed proof for a subject's cached reputation.
    pub async fn generate(
        &self,
        subject: &str,
        realm_id: &str,
        domain: &str,
        valid_for_days: Option<u32>,
    ) -> ServiceResult<StoredProof> {
        let snapshot = self
            .repository
            .get_reputation_cache(subject, realm_id, domain)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "reputation",
                id: format!("{}/{}/{}", subject, realm_id, domain),
            })?;

        let leaves = self.evidence_leaves(subject, realm_id, domain).await?;
        let evidence_merkle_root = merkle_root(&leaves);

        let now = Utc::now();
        let valid_for = valid_for_days.unwrap_or(DEFAULT_VALID_FOR_DAYS);
        let data = ReputationProof {
            version: PROOF_VERSION.to_string(),
            subject: subject.to_string(),
            realm_id: realm_id.to_string(),
            domain: domain.to_string(),
            reputation: ProofReputation::from(&snapshot),
            issuer: self.identity.issuer().to_string(),
            issued_at: now,
            valid_until: now + Duration::days(i64::from(valid_for)),
            evidence_merkle_root,
        };

        let signature = self.identity.sign_object(&data)?;
        let envelope = ProofEnvelope {
            data,
            signature,
            public_key: self.identity.public_key_pem().to_string(),
            timestamp: now,
            version: PROOF_VERSION.to_string(),
        };
        let stored = StoredProof {
            id: content_id(&envelope.data)?,
            envelope,
            evidence_count: leaves.len(),
            created_at: now,
        };

        self.repository.insert_proof(&stored).await?;
        info!(
            proof = %stored.id,
            subject = %subject,
            realm = %realm_id,
            domain = %domain,
            evidence = stored.evidence_count,
            "Reputation proof generated"
        );
        self.audit
            .append(
                "proof.generated",
                self.identity.issuer(),
                vec![stored.id.clone(), subject.to_string()],
                json!({ "realmId": realm_id, "domain": domain }),
            )
            .await?;

        Ok(stored)
    }

    /// Verify an envelope's signature, expiry, and issuer independently.
    pub fn verify(&self, envelope: &ProofEnvelope) -> ProofVerification {
        let signature_valid =
            verify_object(&envelope.data, &envelope.signature, &envelope.public_key);
        let expired = envelope.data.valid_until <= Utc::now();
        let issuer_trusted = self
            .trusted_issuer_keys
            .iter()
            .any(|key| key.trim() == envelope.public_key.trim());

        ProofVerification {
            valid: signature_valid && !expired && issuer_trusted,
            signature_valid,
            expired,
            issuer_trusted,
        }
    }

    /// Fetch a stored proof.
    pub async fn get(&self, proof_id: &str) -> ServiceResult<StoredProof> {
        self.repository
            .get_proof(proof_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "proof",
                id: proof_id.to_string(),
            })
    }

    /// List stored proofs.
    pub async fn list(&self, filter: crate::storage::ProofFilter) -> ServiceResult<Vec<StoredProof>> {
        self.repository.list_proofs(&filter).await
    }

    /// Inclusion proof for one evidence id under a stored proof's
    /// commitment. The leaf list is rebuilt from storage in the committed
    /// order.
    pub async fn evidence_proof(
        &self,
        proof_id: &str,
        evidence_id: &str,
    ) -> ServiceResult<MerkleProof> {
        let stored = self.get(proof_id).await?;
        let data = &stored.envelope.data;
        let leaves = self
            .evidence_leaves(&data.subject, &data.realm_id, &data.domain)
            .await?;
        let index = leaves
            .iter()
            .position(|leaf| leaf == evidence_id)
            .ok_or_else(|| ServiceError::NotFound {
                kind: "evidence",
                id: evidence_id.to_string(),
            })?;
        generate_proof(&leaves, index)
    }

    /// Verify an inclusion proof against an expected committed root.
    pub fn verify_evidence(&self, proof: &MerkleProof, expected_root: &str) -> bool {
        verify_proof(proof) && proof.root == expected_root
    }
}
