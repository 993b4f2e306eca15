//! Realms: hierarchical trust contexts with materialized-path lookup
//!
//! A realm names a context in which attestations and evaluations are made.
//! Realms form a tree; the `path` column materializes the ancestor chain so
//! subtree queries are prefix scans. Rules omitted at creation inherit the
//! documented defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::audit::AuditLog;
use crate::crypto::signing::generate_key_pair;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{RealmFilter, Repository};

/// Default evaluation half-life when a realm omits `decayHalfLife`.
pub const DEFAULT_DECAY_HALF_LIFE_DAYS: f64 = 180.0;

/// Per-realm rules governing verification and trust computation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealmRules {
    /// Verifications required before an attestation counts as established.
    pub min_verifications: u32,
    /// Resolvers every attestation in this realm must come from.
    pub required_resolvers: Vec<String>,
    /// Resolvers accepted but not required.
    pub optional_resolvers: Vec<String>,
    /// Evaluation decay half-life as a duration string, e.g. `"180d"`.
    pub decay_half_life: String,
    /// Lower clamp for reputation scores in this realm.
    pub min_score: f64,
    /// Depth bound for transitive-trust queries scoped to this realm.
    pub max_transitive_depth: u32,
    /// Per-hop decay factor for transitive-trust queries.
    pub transitive_decay_factor: f64,
    /// Free-form realm-specific rules, opaque to the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_rules: Option<Value>,
}

impl Default for RealmRules {
    fn default() -> Self {
        Self {
            min_verifications: 1,
            required_resolvers: Vec::new(),
            optional_resolvers: Vec::new(),
            decay_half_life: "180d".to_string(),
            min_score: 0.0,
            max_transitive_depth: 5,
            transitive_decay_factor: 0.8,
            custom_rules: None,
        }
    }
}

impl RealmRules {
    /// Parse `decayHalfLife` ("Nd") into days, falling back to the default.
    pub fn half_life_days(&self) -> f64 {
        self.decay_half_life
            .strip_suffix('d')
            .and_then(|n| n.parse::<f64>().ok())
            .filter(|d| *d > 0.0)
            .unwrap_or(DEFAULT_DECAY_HALF_LIFE_DAYS)
    }
}

/// Caller-supplied rules with every field optional; omissions inherit
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealmRulesPatch {
    pub min_verifications: Option<u32>,
    pub required_resolvers: Option<Vec<String>>,
    pub optional_resolvers: Option<Vec<String>>,
    pub decay_half_life: Option<String>,
    pub min_score: Option<f64>,
    pub max_transitive_depth: Option<u32>,
    pub transitive_decay_factor: Option<f64>,
    pub custom_rules: Option<Value>,
}

impl RealmRulesPatch {
    /// Resolve the patch against the defaults.
    pub fn into_rules(self) -> RealmRules {
        let defaults = RealmRules::default();
        RealmRules {
            min_verifications: self.min_verifications.unwrap_or(defaults.min_verifications),
            required_resolvers: self
                .required_resolvers
                .unwrap_or(defaults.required_resolvers),
            optional_resolvers: self
                .optional_resolvers
                .unwrap_or(defaults.optional_resolvers),
            decay_half_life: self.decay_half_life.unwrap_or(defaults.decay_half_life),
            min_score: self.min_score.unwrap_or(defaults.min_score),
            max_transitive_depth: self
                .max_transitive_depth
                .unwrap_or(defaults.max_transitive_depth),
            transitive_decay_factor: self
                .transitive_decay_factor
                .unwrap_or(defaults.transitive_decay_factor),
            custom_rules: self.custom_rules,
        }
    }
}

/// A trust context. `id`, `parent`, `path`, and `depth` are immutable once
/// created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Realm {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub path: String,
    pub depth: u32,
    pub domain: String,
    pub rules: RealmRules,
    pub public_key: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation request for a realm.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRealm {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parent: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub rules: RealmRulesPatch,
    pub created_by: String,
}

/// Store for the realm hierarchy.
pub struct RealmStore {
    repository: Arc<dyn Repository>,
    audit: Arc<AuditLog>,
}

impl RealmStore {
    pub fn new(repository: Arc<dyn Repository>, audit: Arc<AuditLog>) -> Self {
        Self { repository, audit }
    }

    /// Create a realm, computing `path` and `depth` from its parent.
    pub async fn create(&self, request: NewRealm) -> ServiceResult<Realm> {
        if request.id.is_empty() {
            return Err(ServiceError::Validation("realm id must not be empty".into()));
        }
        if request.id.contains('/') {
            return Err(ServiceError::Validation(
                "realm id must not contain '/'".into(),
            ));
        }
        if request.domain.is_empty() {
            return Err(ServiceError::Validation("domain must not be empty".into()));
        }
        if self.repository.get_realm(&request.id).await?.is_some() {
            return Err(ServiceError::AlreadyExists(format!(
                "realm {}",
                request.id
            )));
        }

        let (path, depth) = match &request.parent {
            Some(parent_id) => {
                let parent = self
                    .repository
                    .get_realm(parent_id)
                    .await?
                    .ok_or_else(|| ServiceError::InvalidParent(parent_id.clone()))?;
                // A child id appearing anywhere in the ancestor chain would
                // close a cycle through the materialized path.
                if parent.path.split('/').any(|segment| segment == request.id) {
                    return Err(ServiceError::InvalidParent(format!(
                        "{} is an ancestor of itself",
                        request.id
                    )));
                }
                let path = format!("{}/{}", parent.path, request.id);
                let depth = path.matches('/').count() as u32;
                (path, depth)
            }
            None => (request.id.clone(), 0),
        };

        if self.repository.get_realm_by_path(&path).await?.is_some() {
            return Err(ServiceError::AlreadyExists(format!("realm path {}", path)));
        }

        let key_pair = generate_key_pair()?;
        let now = Utc::now();
        let realm = Realm {
            id: request.id,
            name: request.name,
            description: request.description,
            parent: request.parent,
            path,
            depth,
            domain: request.domain,
            rules: request.rules.into_rules(),
            public_key: key_pair.public_key,
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
        };

        self.repository.insert_realm(&realm).await?;
        info!(realm = %realm.id, path = %realm.path, domain = %realm.domain, "Realm created");
        self.audit
            .append(
                "realm.created",
                &realm.created_by,
                vec![realm.id.clone()],
                serde_json::json!({ "path": realm.path, "domain": realm.domain }),
            )
            .await?;

        Ok(realm)
    }

    /// Look a realm up by id, falling back to path lookup.
    pub async fn get(&self, id_or_path: &str) -> ServiceResult<Realm> {
        if let Some(realm) = self.repository.get_realm(id_or_path).await? {
            return Ok(realm);
        }
        self.repository
            .get_realm_by_path(id_or_path)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "realm",
                id: id_or_path.to_string(),
            })
    }

    /// List realms with optional domain/parent filters.
    pub async fn list(&self, filter: RealmFilter) -> ServiceResult<Vec<Realm>> {
        self.repository.list_realms(&filter).await
    }

    /// Children of a realm; `recursive` walks the whole subtree via the
    /// materialized path.
    pub async fn children(&self, id: &str, recursive: bool) -> ServiceResult<Vec<Realm>> {
        let realm = self.get(id).await?;
        let filter = if recursive {
            RealmFilter {
                path_prefix: Some(format!("{}/", realm.path)),
                ..Default::default()
            }
        } else {
            RealmFilter {
                parent: Some(realm.id.clone()),
                ..Default::default()
            }
        };
        self.repository.list_realms(&filter).await
    }

    /// Delete a realm, cascading to its reputation-cache and proof rows.
    ///
    /// Refused while attestations still reference the realm.
    pub async fn delete(&self, id: &str, actor: &str) -> ServiceResult<()> {
        let realm = self.get(id).await?;
        if self.repository.realm_has_attestations(&realm.id).await? {
            return Err(ServiceError::Validation(format!(
                "realm {} still has attestations",
                realm.id
            )));
        }
        self.repository.delete_realm(&realm.id).await?;
        info!(realm = %realm.id, "Realm deleted");
        self.audit
            .append(
                "realm.deleted",
                actor,
                vec![realm.id.clone()],
                serde_json::json!({ "path": realm.path }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_defaulting() {
        let rules = RealmRulesPatch {
            min_verifications: Some(3),
            ..Default::default()
        }
        .into_rules();
        assert_eq!(rules.min_verifications, 3);
        assert_eq!(rules.decay_half_life, "180d");
        assert_eq!(rules.max_transitive_depth, 5);
        assert!((rules.transitive_decay_factor - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_half_life_parsing() {
        let mut rules = RealmRules::default();
        assert!((rules.half_life_days() - 180.0).abs() < f64::EPSILON);
        rules.decay_half_life = "90d".into();
        assert!((rules.half_life_days() - 90.0).abs() < f64::EPSILON);
        rules.decay_half_life = "bogus".into();
        assert!((rules.half_life_days() - DEFAULT_DECAY_HALF_LIFE_DAYS).abs() < f64::EPSILON);
    }
}
