//! Evaluations: signed directed trust edges
//!
//! At most one active evaluation exists per `(from, to, realm, domain)`;
//! re-submission updates the existing row in place, keeping its id. Every
//! write invalidates the subject's reputation cache for that realm; the
//! repository performs both as one atomic operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::audit::AuditLog;
use crate::crypto::signing::InstanceIdentity;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{EvaluationFilter, Repository};

/// A directed trust edge from one entity to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Content id over `{from, to, realmId, domain, score, ts}`, assigned on
    /// first insert and retained across updates.
    pub id: String,
    pub from_entity: String,
    pub to_entity: String,
    pub realm_id: String,
    pub domain: String,
    /// Trust score, 0..=100.
    pub score: u8,
    /// Evaluator-declared weight in `[0, 1]`.
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub supporting_attestations: Vec<String>,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Submission request for an evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvaluation {
    pub from: String,
    pub to: String,
    pub realm_id: String,
    pub domain: String,
    pub score: u8,
    pub weight: Option<f64>,
    pub rationale: Option<String>,
    #[serde(default)]
    pub supporting_attestations: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Store handling idempotent evaluation upserts.
pub struct EvaluationStore {
    repository: Arc<dyn Repository>,
    audit: Arc<AuditLog>,
    identity: Arc<InstanceIdentity>,
}

impl EvaluationStore {
    pub fn new(
        repository: Arc<dyn Repository>,
        audit: Arc<AuditLog>,
        identity: Arc<InstanceIdentity>,
    ) -> Self {
        Self {
            repository,
            audit,
            identity,
        }
    }

    /// Upsert an evaluation keyed by `(from, to, realm, domain)`.
    pub async fn submit(&self, request: NewEvaluation) -> ServiceResult<Evaluation> {
        if request.from.is_empty() || request.to.is_empty() {
            return Err(ServiceError::Validation(
                "from and to entities must not be empty".into(),
            ));
        }
        if request.domain.is_empty() {
            return Err(ServiceError::Validation("domain must not be empty".into()));
        }
        if request.score > 100 {
            return Err(ServiceError::Validation(
                "score must be between 0 and 100".into(),
            ));
        }
        let weight = request.weight.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&weight) {
            return Err(ServiceError::Validation(
                "weight must be between 0 and 1".into(),
            ));
        }
        if self
            .repository
            .get_realm(&request.realm_id)
            .await?
            .is_none()
        {
            return Err(ServiceError::InvalidRealm(request.realm_id.clone()));
        }

        let now = Utc::now();
        let content = json!({
            "from": request.from,
            "to": request.to,
            "realmId": request.realm_id,
            "domain": request.domain,
            "score": request.score,
            "ts": now.timestamp_millis(),
        });
        let signature = self.identity.sign_object(&content)?;
        let candidate = Evaluation {
            id: crate::crypto::canonical::content_id(&content)?,
            from_entity: request.from,
            to_entity: request.to,
            realm_id: request.realm_id,
            domain: request.domain,
            score: request.score,
            weight,
            rationale: request.rationale,
            supporting_attestations: request.supporting_attestations,
            signature,
            expires_at: request.expires_at,
            created_at: now,
        };

        // The repository keeps the existing row's id on conflict and clears
        // the subject's reputation cache in the same operation.
        let stored = self.repository.upsert_evaluation(&candidate).await?;
        info!(
            from = %stored.from_entity,
            to = %stored.to_entity,
            realm = %stored.realm_id,
            domain = %stored.domain,
            score = stored.score,
            "Evaluation recorded"
        );
        self.audit
            .append(
                "evaluation.created",
                &stored.from_entity,
                vec![stored.id.clone(), stored.to_entity.clone()],
                json!({ "realmId": stored.realm_id, "domain": stored.domain, "score": stored.score }),
            )
            .await?;

        Ok(stored)
    }

    /// List evaluations matching a filter.
    pub async fn list(&self, filter: EvaluationFilter) -> ServiceResult<Vec<Evaluation>> {
        self.repository.list_evaluations(&filter).await
    }
}
