//! In-memory repository
//!
//! Backs tests and development runs without a `DATABASE_URL`. All state sits
//! behind one `RwLock`, which also makes the combined operations (evaluation
//! upsert + cache invalidation, run + status commit) naturally atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::attestation::{Attestation, VerificationRun};
use crate::audit::AuditEvent;
use crate::error::{ServiceError, ServiceResult};
use crate::proof::StoredProof;
use crate::realm::Realm;
use crate::storage::{
    apply_window, AttestationFilter, EvaluationFilter, ProofFilter, RealmFilter, Repository,
};
use crate::trust::evaluation::Evaluation;
use crate::trust::reputation::ReputationSnapshot;

#[derive(Default)]
struct MemoryState {
    realms: HashMap<String, Realm>,
    attestations: HashMap<String, Attestation>,
    attestation_order: Vec<String>,
    runs: Vec<VerificationRun>,
    evaluations: Vec<Evaluation>,
    reputation_cache: HashMap<(String, String, String), ReputationSnapshot>,
    proofs: HashMap<String, StoredProof>,
    proof_order: Vec<String>,
    audit_events: Vec<AuditEvent>,
}

/// Repository keeping everything in process memory.
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_realm(&self, realm: &Realm) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.realms.contains_key(&realm.id) {
            return Err(ServiceError::AlreadyExists(format!("realm {}", realm.id)));
        }
        state.realms.insert(realm.id.clone(), realm.clone());
        Ok(())
    }

    async fn get_realm(&self, id: &str) -> ServiceResult<Option<Realm>> {
        Ok(self.state.read().await.realms.get(id).cloned())
    }

    async fn get_realm_by_path(&self, path: &str) -> ServiceResult<Option<Realm>> {
        Ok(self
            .state
            .read()
            .await
            .realms
            .values()
            .find(|r| r.path == path)
            .cloned())
    }

    async fn list_realms(&self, filter: &RealmFilter) -> ServiceResult<Vec<Realm>> {
        let state = self.state.read().await;
        let mut realms: Vec<Realm> = state
            .realms
            .values()
            .filter(|r| filter.domain.as_ref().map(|d| &r.domain == d).unwrap_or(true))
            .filter(|r| {
                filter
                    .parent
                    .as_ref()
                    .map(|p| r.parent.as_ref() == Some(p))
                    .unwrap_or(true)
            })
            .filter(|r| {
                filter
                    .path_prefix
                    .as_ref()
                    .map(|prefix| r.path.starts_with(prefix.as_str()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        realms.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(apply_window(realms, filter.limit, filter.offset))
    }

    async fn delete_realm(&self, id: &str) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.realms.remove(id).is_none() {
            return Err(ServiceError::NotFound {
                kind: "realm",
                id: id.to_string(),
            });
        }
        state.reputation_cache.retain(|(_, realm, _), _| realm != id);
        let removed: Vec<String> = state
            .proofs
            .values()
            .filter(|p| p.envelope.data.realm_id == id)
            .map(|p| p.id.clone())
            .collect();
        for proof_id in removed {
            state.proofs.remove(&proof_id);
            state.proof_order.retain(|p| p != &proof_id);
        }
        Ok(())
    }

    async fn realm_has_attestations(&self, realm_id: &str) -> ServiceResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .attestations
            .values()
            .any(|a| a.realm_id == realm_id))
    }

    async fn insert_attestation(&self, attestation: &Attestation) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.attestations.contains_key(&attestation.id) {
            return Err(ServiceError::AlreadyExists(format!(
                "attestation {}",
                attestation.id
            )));
        }
        state
            .attestations
            .insert(attestation.id.clone(), attestation.clone());
        state.attestation_order.push(attestation.id.clone());
        Ok(())
    }

    async fn get_attestation(&self, id: &str) -> ServiceResult<Option<Attestation>> {
        Ok(self.state.read().await.attestations.get(id).cloned())
    }

    async fn update_attestation(&self, attestation: &Attestation) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if !state.attestations.contains_key(&attestation.id) {
            return Err(ServiceError::NotFound {
                kind: "attestation",
                id: attestation.id.clone(),
            });
        }
        state
            .attestations
            .insert(attestation.id.clone(), attestation.clone());
        Ok(())
    }

    async fn list_attestations(
        &self,
        filter: &AttestationFilter,
    ) -> ServiceResult<Vec<Attestation>> {
        let state = self.state.read().await;
        let attestations: Vec<Attestation> = state
            .attestation_order
            .iter()
            .filter_map(|id| state.attestations.get(id))
            .filter(|a| {
                filter
                    .realm_id
                    .as_ref()
                    .map(|r| &a.realm_id == r)
                    .unwrap_or(true)
            })
            .filter(|a| {
                filter
                    .subject
                    .as_ref()
                    .map(|s| &a.subject == s)
                    .unwrap_or(true)
            })
            .filter(|a| filter.status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect();
        Ok(apply_window(attestations, filter.limit, filter.offset))
    }

    async fn delete_attestation(&self, id: &str) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.attestations.remove(id).is_none() {
            return Err(ServiceError::NotFound {
                kind: "attestation",
                id: id.to_string(),
            });
        }
        state.attestation_order.retain(|a| a != id);
        state.runs.retain(|r| r.attestation_id != id);
        Ok(())
    }

    async fn list_expirable_attestations(
        &self,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Attestation>> {
        Ok(self
            .state
            .read()
            .await
            .attestations
            .values()
            .filter(|a| {
                a.status.verifiable()
                    && a.expires_at.map(|expires| expires < now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn record_verification(
        &self,
        run: &VerificationRun,
        attestation: &Attestation,
    ) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if !state.attestations.contains_key(&attestation.id) {
            return Err(ServiceError::NotFound {
                kind: "attestation",
                id: attestation.id.clone(),
            });
        }
        state.runs.push(run.clone());
        state
            .attestations
            .insert(attestation.id.clone(), attestation.clone());
        Ok(())
    }

    async fn list_runs(&self, attestation_id: &str) -> ServiceResult<Vec<VerificationRun>> {
        Ok(self
            .state
            .read()
            .await
            .runs
            .iter()
            .filter(|r| r.attestation_id == attestation_id)
            .cloned()
            .collect())
    }

    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> ServiceResult<Evaluation> {
        let mut state = self.state.write().await;
        let stored = match state.evaluations.iter_mut().find(|e| {
            e.from_entity == evaluation.from_entity
                && e.to_entity == evaluation.to_entity
                && e.realm_id == evaluation.realm_id
                && e.domain == evaluation.domain
        }) {
            Some(existing) => {
                existing.score = evaluation.score;
                existing.weight = evaluation.weight;
                existing.rationale = evaluation.rationale.clone();
                existing.supporting_attestations = evaluation.supporting_attestations.clone();
                existing.signature = evaluation.signature.clone();
                existing.clone()
            }
            None => {
                state.evaluations.push(evaluation.clone());
                evaluation.clone()
            }
        };
        // Same lock, same operation: the cache can never serve a snapshot
        // computed without this evaluation.
        state.reputation_cache.retain(|(subject, realm, _), _| {
            !(subject == &stored.to_entity && realm == &stored.realm_id)
        });
        Ok(stored)
    }

    async fn list_evaluations(&self, filter: &EvaluationFilter) -> ServiceResult<Vec<Evaluation>> {
        let state = self.state.read().await;
        let evaluations: Vec<Evaluation> = state
            .evaluations
            .iter()
            .filter(|e| {
                filter
                    .from_entity
                    .as_ref()
                    .map(|f| &e.from_entity == f)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .to_entity
                    .as_ref()
                    .map(|t| &e.to_entity == t)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .realm_id
                    .as_ref()
                    .map(|r| &e.realm_id == r)
                    .unwrap_or(true)
            })
            .filter(|e| filter.domain.as_ref().map(|d| &e.domain == d).unwrap_or(true))
            .cloned()
            .collect();
        Ok(apply_window(evaluations, filter.limit, filter.offset))
    }

    async fn get_reputation_cache(
        &self,
        subject: &str,
        realm_id: &str,
        domain: &str,
    ) -> ServiceResult<Option<ReputationSnapshot>> {
        Ok(self
            .state
            .read()
            .await
            .reputation_cache
            .get(&(
                subject.to_string(),
                realm_id.to_string(),
                domain.to_string(),
            ))
            .cloned())
    }

    async fn upsert_reputation_cache(&self, snapshot: &ReputationSnapshot) -> ServiceResult<()> {
        self.state.write().await.reputation_cache.insert(
            (
                snapshot.subject.clone(),
                snapshot.realm_id.clone(),
                snapshot.domain.clone(),
            ),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn insert_proof(&self, proof: &StoredProof) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.proofs.contains_key(&proof.id) {
            return Err(ServiceError::AlreadyExists(format!("proof {}", proof.id)));
        }
        state.proofs.insert(proof.id.clone(), proof.clone());
        state.proof_order.push(proof.id.clone());
        Ok(())
    }

    async fn get_proof(&self, id: &str) -> ServiceResult<Option<StoredProof>> {
        Ok(self.state.read().await.proofs.get(id).cloned())
    }

    async fn list_proofs(&self, filter: &ProofFilter) -> ServiceResult<Vec<StoredProof>> {
        let state = self.state.read().await;
        let proofs: Vec<StoredProof> = state
            .proof_order
            .iter()
            .filter_map(|id| state.proofs.get(id))
            .filter(|p| {
                filter
                    .subject
                    .as_ref()
                    .map(|s| &p.envelope.data.subject == s)
                    .unwrap_or(true)
            })
            .filter(|p| {
                filter
                    .realm_id
                    .as_ref()
                    .map(|r| &p.envelope.data.realm_id == r)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        Ok(apply_window(proofs, filter.limit, filter.offset))
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> ServiceResult<()> {
        self.state.write().await.audit_events.push(event.clone());
        Ok(())
    }

    async fn latest_audit_hash(&self) -> ServiceResult<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .audit_events
            .last()
            .map(|e| e.hash.clone()))
    }

    async fn list_audit_events(&self) -> ServiceResult<Vec<AuditEvent>> {
        Ok(self.state.read().await.audit_events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn evaluation(from: &str, to: &str, score: u8) -> Evaluation {
        Evaluation {
            id: format!("cid_{}_{}", from, to),
            from_entity: from.to_string(),
            to_entity: to.to_string(),
            realm_id: "realm-1".to_string(),
            domain: "d".to_string(),
            score,
            weight: 1.0,
            rationale: None,
            supporting_attestations: Vec::new(),
            signature: String::new(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    fn snapshot(subject: &str) -> ReputationSnapshot {
        ReputationSnapshot {
            subject: subject.to_string(),
            realm_id: "realm-1".to_string(),
            domain: "d".to_string(),
            score: 50.0,
            confidence: 0.5,
            evaluation_count: 1,
            attestation_count: 0,
            breakdown: crate::trust::reputation::ReputationBreakdown {
                raw_score: 50.0,
                attestation_bonus: 0.0,
                decay_penalty: 0.0,
                staleness_days: 0.0,
                half_life_days: 180.0,
            },
            computed_at: Utc::now(),
            valid_until: Utc::now() + chrono::Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn test_evaluation_upsert_keeps_first_id() {
        let repo = MemoryRepository::new();
        let first = evaluation("A", "B", 40);
        let stored = repo.upsert_evaluation(&first).await.unwrap();
        assert_eq!(stored.id, first.id);

        let mut second = evaluation("A", "B", 90);
        second.id = "cid_other".to_string();
        let stored = repo.upsert_evaluation(&second).await.unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.score, 90);

        let all = repo
            .list_evaluations(&EvaluationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluation_upsert_invalidates_subject_cache() {
        let repo = MemoryRepository::new();
        repo.upsert_reputation_cache(&snapshot("B")).await.unwrap();
        repo.upsert_reputation_cache(&snapshot("C")).await.unwrap();

        repo.upsert_evaluation(&evaluation("A", "B", 70))
            .await
            .unwrap();

        assert!(repo
            .get_reputation_cache("B", "realm-1", "d")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .get_reputation_cache("C", "realm-1", "d")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_audit_tail_tracks_latest_event() {
        let repo = MemoryRepository::new();
        assert!(repo.latest_audit_hash().await.unwrap().is_none());

        let event = AuditEvent {
            id: "audit_1".to_string(),
            kind: "realm.created".to_string(),
            actor: "a".to_string(),
            entity_ids: vec![],
            payload: json!({}),
            previous_hash: "genesis".to_string(),
            hash: "h1".to_string(),
            timestamp: Utc::now(),
        };
        repo.append_audit_event(&event).await.unwrap();
        assert_eq!(repo.latest_audit_hash().await.unwrap().unwrap(), "h1");
    }
}
