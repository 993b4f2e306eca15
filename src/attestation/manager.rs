//! Attestation lifecycle orchestration
//!
//! Creation validates the realm, resolver, and evidence before anything is
//! persisted. Verification dispatches to the registered resolver under a time
//! bound and records an immutable run; a resolver error maps the attestation
//! back to `pending` rather than failing it. Revocation and the expiry scan
//! drive the terminal states.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::attestation::{
    Attestation, AttestationStatus, NewAttestation, RunStatus, VerificationRun,
};
use crate::audit::AuditLog;
use crate::crypto::canonical::{canonical_bytes, content_id, sha256_hex};
use crate::crypto::signing::InstanceIdentity;
use crate::error::{ServiceError, ServiceResult};
use crate::resolver::{Resolver, ResolverRegistry};
use crate::storage::Repository;

/// Orchestrates attestation creation, verification, and revocation.
pub struct AttestationManager {
    repository: Arc<dyn Repository>,
    registry: Arc<ResolverRegistry>,
    audit: Arc<AuditLog>,
    identity: Arc<InstanceIdentity>,
}

impl AttestationManager {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<ResolverRegistry>,
        audit: Arc<AuditLog>,
        identity: Arc<InstanceIdentity>,
    ) -> Self {
        Self {
            repository,
            registry,
            audit,
            identity,
        }
    }

    /// Create an attestation in state `pending`.
    pub async fn create(&self, request: NewAttestation) -> ServiceResult<Attestation> {
        if request.subject.is_empty() {
            return Err(ServiceError::Validation("subject must not be empty".into()));
        }
        if request.claim.is_empty() {
            return Err(ServiceError::Validation("claim must not be empty".into()));
        }
        if self
            .repository
            .get_realm(&request.realm_id)
            .await?
            .is_none()
        {
            return Err(ServiceError::InvalidRealm(request.realm_id.clone()));
        }

        let resolver = self
            .registry
            .get(&request.resolver_id, None)
            .await
            .ok_or_else(|| ServiceError::InvalidResolver(request.resolver_id.clone()))?;
        if self.registry.is_deprecated(&request.resolver_id).await {
            return Err(ServiceError::InvalidResolver(format!(
                "{} is deprecated",
                request.resolver_id
            )));
        }

        let validation = resolver.validate_evidence(&request.evidence);
        if !validation.valid {
            return Err(ServiceError::InvalidEvidence {
                resolver: request.resolver_id.clone(),
                errors: validation.errors,
            });
        }

        for reference in &request.references {
            if self.repository.get_attestation(reference).await?.is_none() {
                return Err(ServiceError::Validation(format!(
                    "referenced attestation not found: {}",
                    reference
                )));
            }
        }

        let now = Utc::now();
        let content = json!({
            "realmId": request.realm_id,
            "subject": request.subject,
            "claim": request.claim,
            "resolverId": request.resolver_id,
            "evidence": request.evidence,
            "references": request.references,
            "ts": now.timestamp_millis(),
        });
        let id = content_id(&content)?;
        if self.repository.get_attestation(&id).await?.is_some() {
            return Err(ServiceError::AlreadyExists(format!("attestation {}", id)));
        }
        let signature = self.identity.sign_object(&content)?;

        let attestation = Attestation {
            id: id.clone(),
            realm_id: request.realm_id,
            attester: request.attester,
            subject: request.subject,
            claim: request.claim,
            resolver_id: request.resolver_id,
            evidence: request.evidence,
            references: request.references,
            signature,
            status: AttestationStatus::Pending,
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
            verification_count: 0,
            last_verified_at: None,
        };

        self.repository.insert_attestation(&attestation).await?;
        info!(
            attestation = %attestation.id,
            realm = %attestation.realm_id,
            subject = %attestation.subject,
            resolver = %attestation.resolver_id,
            "Attestation created"
        );
        self.audit
            .append(
                "attestation.created",
                &attestation.attester,
                vec![attestation.id.clone(), attestation.realm_id.clone()],
                json!({ "subject": attestation.subject, "claim": attestation.claim }),
            )
            .await?;

        Ok(attestation)
    }

    /// Run (or re-run) verification for an attestation.
    ///
    /// An already-verified attestation returns its latest run unless `force`
    /// is set. Resolver errors and timeouts produce a run with status
    /// `error` and map the attestation back to `pending`.
    pub async fn verify(
        &self,
        attestation_id: &str,
        force: bool,
        triggered_by: &str,
    ) -> ServiceResult<VerificationRun> {
        let mut attestation = self
            .repository
            .get_attestation(attestation_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "attestation",
                id: attestation_id.to_string(),
            })?;

        match attestation.status {
            AttestationStatus::Revoked => {
                return Err(ServiceError::AlreadyRevoked(attestation.id.clone()))
            }
            AttestationStatus::Expired => {
                return Err(ServiceError::Validation(format!(
                    "attestation {} is expired",
                    attestation.id
                )))
            }
            AttestationStatus::Verified if !force => {
                if let Some(last) = self
                    .repository
                    .list_runs(&attestation.id)
                    .await?
                    .into_iter()
                    .last()
                {
                    return Ok(last);
                }
                // No run on record despite the status; fall through and
                // verify again.
            }
            _ => {}
        }

        let resolver = self
            .registry
            .get(&attestation.resolver_id, None)
            .await
            .ok_or_else(|| ServiceError::ResolverNotFound(attestation.resolver_id.clone()))?;
        let metadata = resolver.metadata().clone();
        let bound = metadata.verification_timeout();

        let started = Instant::now();
        let outcome = timeout(bound, resolver.verify(&attestation.evidence)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, output, error) = match outcome {
            Ok(Ok(result)) => {
                let status = if result.verified {
                    RunStatus::Verified
                } else {
                    RunStatus::Failed
                };
                (status, result.output, None)
            }
            Ok(Err(e)) => {
                warn!(attestation = %attestation.id, resolver = %metadata.id, error = %e, "Resolver error");
                (RunStatus::Error, serde_json::Value::Null, Some(e.to_string()))
            }
            Err(_) => {
                let e = ServiceError::ResolverTimeout {
                    resolver: metadata.id.clone(),
                    timeout_ms: bound.as_millis() as u64,
                };
                warn!(attestation = %attestation.id, resolver = %metadata.id, "Resolver timed out");
                (RunStatus::Error, serde_json::Value::Null, Some(e.to_string()))
            }
        };

        let now = Utc::now();
        let output_hash = sha256_hex(&canonical_bytes(&output)?);
        let run_content = json!({
            "attestationId": attestation.id,
            "resolverId": metadata.id,
            "resolverVersion": metadata.version,
            "status": status.as_str(),
            "outputHash": output_hash,
            "ts": now.timestamp_millis(),
        });
        let run = VerificationRun {
            id: content_id(&run_content)?,
            attestation_id: attestation.id.clone(),
            resolver_id: metadata.id.clone(),
            resolver_version: metadata.version.clone(),
            status,
            output,
            output_hash,
            snapshot: attestation.evidence.clone(),
            duration_ms,
            triggered_by: triggered_by.to_string(),
            error,
            created_at: now,
        };

        attestation.status = match status {
            RunStatus::Verified => AttestationStatus::Verified,
            RunStatus::Failed => AttestationStatus::Failed,
            RunStatus::Error => AttestationStatus::Pending,
        };
        attestation.verification_count += 1;
        attestation.last_verified_at = Some(now);
        attestation.updated_at = now;

        // Run insert and status update commit together.
        self.repository
            .record_verification(&run, &attestation)
            .await?;
        info!(
            attestation = %attestation.id,
            resolver = %run.resolver_id,
            status = %run.status.as_str(),
            duration_ms = run.duration_ms,
            "Verification run recorded"
        );
        self.audit
            .append(
                "attestation.verified",
                triggered_by,
                vec![attestation.id.clone(), run.id.clone()],
                json!({ "status": run.status.as_str(), "resolverId": run.resolver_id }),
            )
            .await?;

        Ok(run)
    }

    /// Revoke an attestation from any non-revoked state.
    pub async fn revoke(&self, attestation_id: &str, actor: &str) -> ServiceResult<Attestation> {
        let mut attestation = self
            .repository
            .get_attestation(attestation_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "attestation",
                id: attestation_id.to_string(),
            })?;

        if attestation.status == AttestationStatus::Revoked {
            return Err(ServiceError::AlreadyRevoked(attestation.id));
        }

        attestation.status = AttestationStatus::Revoked;
        attestation.updated_at = Utc::now();
        self.repository.update_attestation(&attestation).await?;
        info!(attestation = %attestation.id, actor = %actor, "Attestation revoked");
        self.audit
            .append(
                "attestation.revoked",
                actor,
                vec![attestation.id.clone()],
                json!({}),
            )
            .await?;

        Ok(attestation)
    }

    /// Derive `expired` status for attestations past their `expiresAt`.
    ///
    /// Returns the number of attestations transitioned.
    pub async fn expire_scan(&self) -> ServiceResult<usize> {
        let now = Utc::now();
        let expirable = self.repository.list_expirable_attestations(now).await?;
        let mut expired = 0usize;
        for mut attestation in expirable {
            attestation.status = AttestationStatus::Expired;
            attestation.updated_at = now;
            self.repository.update_attestation(&attestation).await?;
            self.audit
                .append(
                    "attestation.expired",
                    "system",
                    vec![attestation.id.clone()],
                    json!({}),
                )
                .await?;
            expired += 1;
        }
        if expired > 0 {
            info!(count = expired, "Attestations expired by scan");
        }
        Ok(expired)
    }
}
