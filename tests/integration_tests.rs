//! Integration tests for the IRRL reputation service
//!
//! These tests exercise end-to-end flows across the service components:
//! attestation lifecycle with verification runs, evaluation upserts and
//! cache invalidation, trust-graph queries, reputation aggregation,
//! proof generation with Merkle evidence commitments, and the audit chain.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use irrl::attestation::{AttestationManager, AttestationStatus, NewAttestation, RunStatus};
use irrl::audit::AuditLog;
use irrl::config::ResolverConfig;
use irrl::crypto::canonical::sha256_hex;
use irrl::crypto::signing::InstanceIdentity;
use irrl::proof::ProofService;
use irrl::realm::{NewRealm, RealmRulesPatch, RealmStore};
use irrl::resolver::ResolverRegistry;
use irrl::storage::{EvaluationFilter, MemoryRepository, Repository};
use irrl::trust::evaluation::{Evaluation, EvaluationStore, NewEvaluation};
use irrl::trust::graph::{TransitiveTrustQuery, TrustGraph};
use irrl::trust::reputation::ReputationService;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    repository: Arc<dyn Repository>,
    audit: Arc<AuditLog>,
    realms: Arc<RealmStore>,
    attestations: Arc<AttestationManager>,
    evaluations: Arc<EvaluationStore>,
    reputation: Arc<ReputationService>,
    proofs: Arc<ProofService>,
}

async fn harness() -> Harness {
    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let identity = Arc::new(InstanceIdentity::generate().unwrap());
    let audit = Arc::new(AuditLog::new(repository.clone(), true));
    let registry = Arc::new(ResolverRegistry::new());
    registry
        .register_built_ins(&ResolverConfig { github_token: None })
        .await;

    Harness {
        repository: repository.clone(),
        audit: audit.clone(),
        realms: Arc::new(RealmStore::new(repository.clone(), audit.clone())),
        attestations: Arc::new(AttestationManager::new(
            repository.clone(),
            registry,
            audit.clone(),
            identity.clone(),
        )),
        evaluations: Arc::new(EvaluationStore::new(
            repository.clone(),
            audit.clone(),
            identity.clone(),
        )),
        reputation: Arc::new(ReputationService::new(repository.clone())),
        proofs: Arc::new(ProofService::new(
            repository,
            identity,
            audit,
            Vec::new(),
        )),
    }
}

fn realm_request(id: &str, domain: &str) -> NewRealm {
    NewRealm {
        id: id.to_string(),
        name: format!("{} realm", id),
        description: String::new(),
        parent: None,
        domain: domain.to_string(),
        rules: RealmRulesPatch::default(),
        created_by: "ent_admin".to_string(),
    }
}

/// Attestation whose content-hash evidence verifies successfully.
fn hash_attestation(realm: &str, subject: &str, content: &str) -> NewAttestation {
    NewAttestation {
        realm_id: realm.to_string(),
        attester: "ent_attester".to_string(),
        subject: subject.to_string(),
        claim: format!("authored {}", content),
        resolver_id: "content-hash".to_string(),
        evidence: json!({
            "content": content,
            "expectedHash": sha256_hex(content.as_bytes()),
        }),
        references: Vec::new(),
        expires_at: None,
    }
}

fn evaluation_request(from: &str, to: &str, realm: &str, domain: &str, score: u8) -> NewEvaluation {
    NewEvaluation {
        from: from.to_string(),
        to: to.to_string(),
        realm_id: realm.to_string(),
        domain: domain.to_string(),
        score,
        weight: Some(1.0),
        rationale: None,
        supporting_attestations: Vec::new(),
        expires_at: None,
    }
}

/// Insert an evaluation with a controlled age, bypassing the store clock.
async fn backdated_evaluation(
    repository: &Arc<dyn Repository>,
    from: &str,
    to: &str,
    realm: &str,
    domain: &str,
    score: u8,
    age_days: i64,
) -> Evaluation {
    let created_at = Utc::now() - Duration::days(age_days);
    let evaluation = Evaluation {
        id: format!("cid_{}_{}_{}", from, to, age_days),
        from_entity: from.to_string(),
        to_entity: to.to_string(),
        realm_id: realm.to_string(),
        domain: domain.to_string(),
        score,
        weight: 1.0,
        rationale: None,
        supporting_attestations: Vec::new(),
        signature: String::new(),
        expires_at: None,
        created_at,
    };
    repository.upsert_evaluation(&evaluation).await.unwrap()
}

// ============================================================================
// Realm Hierarchy
// ============================================================================

mod realms {
    use super::*;

    #[tokio::test]
    async fn test_hierarchy_paths_and_children() {
        let h = harness().await;
        h.realms.create(realm_request("root", "software")).await.unwrap();

        let mut child = realm_request("team-a", "software");
        child.parent = Some("root".to_string());
        let child = h.realms.create(child).await.unwrap();
        assert_eq!(child.path, "root/team-a");
        assert_eq!(child.depth, 1);

        let mut grandchild = realm_request("proj-x", "software");
        grandchild.parent = Some("team-a".to_string());
        let grandchild = h.realms.create(grandchild).await.unwrap();
        assert_eq!(grandchild.path, "root/team-a/proj-x");
        assert_eq!(grandchild.depth, 2);

        // Path lookup resolves the same realm as id lookup.
        let by_path = h.realms.get("root/team-a/proj-x").await.unwrap();
        assert_eq!(by_path.id, grandchild.id);

        let direct = h.realms.children("root", false).await.unwrap();
        assert_eq!(direct.len(), 1);
        let all = h.realms.children("root", true).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_parent_are_rejected() {
        let h = harness().await;
        h.realms.create(realm_request("root", "software")).await.unwrap();
        assert!(h.realms.create(realm_request("root", "software")).await.is_err());

        let mut orphan = realm_request("orphan", "software");
        orphan.parent = Some("missing".to_string());
        assert!(h.realms.create(orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_refused_while_attestations_reference_realm() {
        let h = harness().await;
        h.realms.create(realm_request("root", "software")).await.unwrap();
        h.attestations
            .create(hash_attestation("root", "ent_s", "artifact-1"))
            .await
            .unwrap();

        assert!(h.realms.delete("root", "ent_admin").await.is_err());
    }
}

// ============================================================================
// Attestation Lifecycle
// ============================================================================

mod attestations {
    use super::*;

    #[tokio::test]
    async fn test_create_verify_revoke_flow() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();

        let attestation = h
            .attestations
            .create(hash_attestation("realm-1", "ent_subject", "artifact-1"))
            .await
            .unwrap();
        assert_eq!(attestation.status, AttestationStatus::Pending);
        assert!(attestation.id.starts_with("cid_"));
        assert!(!attestation.signature.is_empty());

        let run = h
            .attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Verified);
        assert_eq!(run.output["matches"], json!(true));
        assert!(!run.output_hash.is_empty());

        let stored = h
            .repository
            .get_attestation(&attestation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttestationStatus::Verified);
        assert_eq!(stored.verification_count, 1);
        assert!(stored.last_verified_at.is_some());

        // Without force, a verified attestation returns its last run.
        let cached = h
            .attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();
        assert_eq!(cached.id, run.id);

        // With force, a new run is recorded.
        let forced = h
            .attestations
            .verify(&attestation.id, true, "ent_caller")
            .await
            .unwrap();
        assert_ne!(forced.id, run.id);
        let history = h.repository.list_runs(&attestation.id).await.unwrap();
        assert_eq!(history.len(), 2);

        let revoked = h
            .attestations
            .revoke(&attestation.id, "ent_admin")
            .await
            .unwrap();
        assert_eq!(revoked.status, AttestationStatus::Revoked);
        assert!(h.attestations.revoke(&attestation.id, "ent_admin").await.is_err());
        assert!(h
            .attestations
            .verify(&attestation.id, true, "ent_caller")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_verification_can_recover() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();

        let mut request = hash_attestation("realm-1", "ent_subject", "artifact-1");
        request.evidence = json!({
            "content": "artifact-1",
            "expectedHash": "0000000000000000000000000000000000000000000000000000000000000000",
        });
        let attestation = h.attestations.create(request).await.unwrap();

        let run = h
            .attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let stored = h
            .repository
            .get_attestation(&attestation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttestationStatus::Failed);

        // A failed attestation may be re-verified.
        let again = h
            .attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();
        assert_eq!(again.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_evidence_is_rejected_with_field_errors() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();

        let mut request = hash_attestation("realm-1", "ent_subject", "artifact-1");
        request.evidence = json!({"content": 42});
        let err = h.attestations.create(request).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_EVIDENCE");
        let details = err.details().unwrap();
        assert_eq!(details["fieldErrors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expiry_scan_is_terminal() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();

        let mut request = hash_attestation("realm-1", "ent_subject", "artifact-1");
        request.expires_at = Some(Utc::now() - Duration::seconds(1));
        let attestation = h.attestations.create(request).await.unwrap();

        let expired = h.attestations.expire_scan().await.unwrap();
        assert_eq!(expired, 1);
        let stored = h
            .repository
            .get_attestation(&attestation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttestationStatus::Expired);

        // Expired is terminal for verification.
        assert!(h
            .attestations
            .verify(&attestation.id, true, "ent_caller")
            .await
            .is_err());
        // The scan is idempotent.
        assert_eq!(h.attestations.expire_scan().await.unwrap(), 0);
    }
}

// ============================================================================
// Evaluations & Trust Graph
// ============================================================================

mod trust_graph {
    use super::*;

    #[tokio::test]
    async fn test_evaluation_uniqueness_keeps_last_submission() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();

        let first = h
            .evaluations
            .submit(evaluation_request("A", "B", "realm-1", "rust", 40))
            .await
            .unwrap();
        for score in [55, 70, 90] {
            h.evaluations
                .submit(evaluation_request("A", "B", "realm-1", "rust", score))
                .await
                .unwrap();
        }

        let all = h
            .evaluations
            .list(EvaluationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].score, 90);
    }

    #[tokio::test]
    async fn test_direct_trust_via_submitted_evaluations() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        h.evaluations
            .submit(evaluation_request("A", "B", "realm-1", "rust", 80))
            .await
            .unwrap();

        let evaluations = h
            .evaluations
            .list(EvaluationFilter::default())
            .await
            .unwrap();
        let graph = TrustGraph::from_evaluations(&evaluations);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "B", "rust"));

        assert!((result.score - 0.8).abs() < 1e-9);
        assert!((result.confidence - 1.0).abs() < 1e-9);
        assert_eq!(result.metadata.paths_explored, 1);
    }

    #[tokio::test]
    async fn test_two_hop_transitive_trust_decays() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        h.evaluations
            .submit(evaluation_request("A", "B", "realm-1", "rust", 100))
            .await
            .unwrap();
        h.evaluations
            .submit(evaluation_request("B", "C", "realm-1", "rust", 100))
            .await
            .unwrap();

        let evaluations = h
            .evaluations
            .list(EvaluationFilter::default())
            .await
            .unwrap();
        let graph = TrustGraph::from_evaluations(&evaluations);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "C", "rust"));

        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].path, vec!["A", "B", "C"]);
        assert!((result.score - 0.64).abs() < 1e-9);
        assert!((result.confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_self_query_over_cycle_finds_nothing() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        h.evaluations
            .submit(evaluation_request("A", "B", "realm-1", "rust", 50))
            .await
            .unwrap();
        h.evaluations
            .submit(evaluation_request("B", "A", "realm-1", "rust", 50))
            .await
            .unwrap();

        let evaluations = h
            .evaluations
            .list(EvaluationFilter::default())
            .await
            .unwrap();
        let graph = TrustGraph::from_evaluations(&evaluations);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "A", "rust"));

        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.paths.is_empty());
    }
}

// ============================================================================
// Reputation
// ============================================================================

mod reputation {
    use super::*;

    #[tokio::test]
    async fn test_time_decayed_reputation() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        backdated_evaluation(&h.repository, "rater_1", "subject", "realm-1", "rust", 80, 30).await;
        backdated_evaluation(&h.repository, "rater_2", "subject", "realm-1", "rust", 80, 180).await;

        let snapshot = h
            .reputation
            .get_reputation("subject", "realm-1", "rust", false)
            .await
            .unwrap();

        assert!((snapshot.score - 80.0).abs() < 1e-9);
        assert!(snapshot.breakdown.decay_penalty.abs() < 1e-9);
        assert!((snapshot.confidence - 0.18).abs() < 1e-9);
        assert_eq!(snapshot.evaluation_count, 2);
    }

    #[tokio::test]
    async fn test_cache_round_trip_and_invalidation() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        h.evaluations
            .submit(evaluation_request("rater_1", "subject", "realm-1", "rust", 70))
            .await
            .unwrap();

        let first = h
            .reputation
            .get_reputation("subject", "realm-1", "rust", false)
            .await
            .unwrap();
        let cached = h
            .reputation
            .get_reputation("subject", "realm-1", "rust", false)
            .await
            .unwrap();
        assert_eq!(first.computed_at, cached.computed_at);

        // A new evaluation invalidates the cache; the next read recomputes.
        h.evaluations
            .submit(evaluation_request("rater_2", "subject", "realm-1", "rust", 90))
            .await
            .unwrap();
        let recomputed = h
            .reputation
            .get_reputation("subject", "realm-1", "rust", false)
            .await
            .unwrap();
        assert_eq!(recomputed.evaluation_count, 2);
        assert_ne!(first.computed_at, recomputed.computed_at);
    }

    #[tokio::test]
    async fn test_verified_attestations_raise_the_score() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        h.evaluations
            .submit(evaluation_request("rater_1", "subject", "realm-1", "rust", 60))
            .await
            .unwrap();

        let without = h
            .reputation
            .get_reputation("subject", "realm-1", "rust", true)
            .await
            .unwrap();

        let attestation = h
            .attestations
            .create(hash_attestation("realm-1", "subject", "artifact-1"))
            .await
            .unwrap();
        h.attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();

        let with = h
            .reputation
            .get_reputation("subject", "realm-1", "rust", true)
            .await
            .unwrap();
        assert!(with.score > without.score);
        assert!(with.breakdown.attestation_bonus > 0.0);
    }

    #[tokio::test]
    async fn test_sybil_report_flags_clustered_population() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        backdated_evaluation(&h.repository, "rater_1", "subject", "realm-1", "rust", 80, 0).await;
        backdated_evaluation(&h.repository, "rater_2", "subject", "realm-1", "rust", 75, 2).await;

        let attestation = h
            .attestations
            .create(hash_attestation("realm-1", "subject", "artifact-1"))
            .await
            .unwrap();
        h.attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();

        let report = h.reputation.sybil_resistance("subject", "realm-1").await.unwrap();
        assert!(report.score < 0.5);
        assert!(report.warnings.iter().any(|w| w == "Low evaluator diversity"));
        assert!(report.warnings.iter().any(|w| w == "Low verification depth"));
        assert!(report
            .warnings
            .iter()
            .any(|w| w == "Suspicious temporal clustering"));
    }
}

// ============================================================================
// Proofs
// ============================================================================

mod proofs {
    use super::*;

    async fn seeded_harness() -> (Harness, String, String) {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();

        let a1 = h
            .attestations
            .create(hash_attestation("realm-1", "subject", "artifact-1"))
            .await
            .unwrap();
        h.attestations.verify(&a1.id, false, "ent_caller").await.unwrap();
        let a2 = h
            .attestations
            .create(hash_attestation("realm-1", "subject", "artifact-2"))
            .await
            .unwrap();
        h.attestations.verify(&a2.id, false, "ent_caller").await.unwrap();

        h.evaluations
            .submit(evaluation_request("rater_1", "subject", "realm-1", "rust", 85))
            .await
            .unwrap();

        // Proof generation requires a cached reputation.
        h.reputation
            .get_reputation("subject", "realm-1", "rust", false)
            .await
            .unwrap();
        (h, a1.id, a2.id)
    }

    #[tokio::test]
    async fn test_proof_round_trip() {
        let (h, a1, _) = seeded_harness().await;

        let stored = h
            .proofs
            .generate("subject", "realm-1", "rust", Some(7))
            .await
            .unwrap();
        assert_eq!(stored.evidence_count, 3);
        assert_eq!(stored.envelope.version, "IRRL-Proof-v1");

        let verification = h.proofs.verify(&stored.envelope);
        assert!(verification.valid);
        assert!(verification.signature_valid);
        assert!(!verification.expired);
        assert!(verification.issuer_trusted);

        // Evidence inclusion proof matches the committed root.
        let inclusion = h.proofs.evidence_proof(&stored.id, &a1).await.unwrap();
        assert_eq!(inclusion.root, stored.envelope.data.evidence_merkle_root);
        assert!(h
            .proofs
            .verify_evidence(&inclusion, &stored.envelope.data.evidence_merkle_root));
        assert!(!h.proofs.verify_evidence(&inclusion, &sha256_hex(b"other root")));
    }

    #[tokio::test]
    async fn test_expired_proof_reports_expiry_not_tampering() {
        let (h, _, _) = seeded_harness().await;

        let stored = h
            .proofs
            .generate("subject", "realm-1", "rust", Some(0))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let verification = h.proofs.verify(&stored.envelope);
        assert!(!verification.valid);
        assert!(verification.expired);
        assert!(verification.signature_valid);
        assert!(verification.issuer_trusted);
    }

    #[tokio::test]
    async fn test_tampered_proof_fails_signature_check() {
        let (h, _, _) = seeded_harness().await;

        let stored = h
            .proofs
            .generate("subject", "realm-1", "rust", Some(7))
            .await
            .unwrap();
        let mut envelope = stored.envelope.clone();
        envelope.data.reputation.score += 5.0;

        let verification = h.proofs.verify(&envelope);
        assert!(!verification.valid);
        assert!(!verification.signature_valid);
    }

    #[tokio::test]
    async fn test_untrusted_issuer_is_flagged() {
        let (h, _, _) = seeded_harness().await;
        let stored = h
            .proofs
            .generate("subject", "realm-1", "rust", Some(7))
            .await
            .unwrap();

        // A verifier with a different identity does not trust this issuer.
        let other = ProofService::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(InstanceIdentity::generate().unwrap()),
            Arc::new(AuditLog::new(Arc::new(MemoryRepository::new()), false)),
            Vec::new(),
        );
        let verification = other.verify(&stored.envelope);
        assert!(verification.signature_valid);
        assert!(!verification.issuer_trusted);
        assert!(!verification.valid);
    }

    #[tokio::test]
    async fn test_proof_requires_cached_reputation() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        let err = h
            .proofs
            .generate("subject", "realm-1", "rust", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}

// ============================================================================
// Audit Chain
// ============================================================================

mod audit_chain {
    use super::*;
    use irrl::audit::GENESIS_HASH;

    #[tokio::test]
    async fn test_chain_covers_all_mutations_and_verifies() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        let attestation = h
            .attestations
            .create(hash_attestation("realm-1", "subject", "artifact-1"))
            .await
            .unwrap();
        h.attestations
            .verify(&attestation.id, false, "ent_caller")
            .await
            .unwrap();
        h.evaluations
            .submit(evaluation_request("rater_1", "subject", "realm-1", "rust", 85))
            .await
            .unwrap();
        h.reputation
            .get_reputation("subject", "realm-1", "rust", false)
            .await
            .unwrap();
        h.proofs
            .generate("subject", "realm-1", "rust", None)
            .await
            .unwrap();

        let events = h.repository.list_audit_events().await.unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "realm.created",
                "attestation.created",
                "attestation.verified",
                "evaluation.created",
                "proof.generated",
            ]
        );
        assert_eq!(events[0].previous_hash, GENESIS_HASH);

        let report = h.audit.verify_chain().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.checked_events, 5);
    }

    #[tokio::test]
    async fn test_tampering_is_detected_at_the_right_index() {
        let h = harness().await;
        h.realms.create(realm_request("realm-1", "software")).await.unwrap();
        h.realms.create(realm_request("realm-2", "software")).await.unwrap();
        h.realms.create(realm_request("realm-3", "software")).await.unwrap();

        let mut events = h.repository.list_audit_events().await.unwrap();
        events[1].payload = json!({"path": "forged"});

        let report = AuditLog::verify_events(&events);
        assert!(!report.valid);
        assert_eq!(report.first_invalid_index, Some(1));
    }
}
