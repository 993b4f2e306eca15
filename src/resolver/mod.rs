//! Evidence resolvers and the process-wide registry
//!
//! A resolver is a verification plugin: it declares immutable metadata (with
//! an evidence schema), validates evidence shapes, and runs the actual check.
//! The registry indexes resolvers by `id` and `id@version`; an unversioned
//! lookup returns the most recently registered version. Custom resolvers
//! registered over the API are metadata-only descriptors and are never
//! invoked; only in-process resolvers run.

pub mod builtin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::ResolverConfig;
use crate::error::{ServiceError, ServiceResult};

/// Minimum verification time bound, regardless of declared averages.
pub const MIN_VERIFICATION_TIMEOUT_MS: u64 = 5_000;

/// Expected JSON type of an evidence field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

/// One declared evidence field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// Declarative evidence schema: a flat field list validated against the
/// evidence object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceSchema {
    pub fields: Vec<FieldSpec>,
}

impl EvidenceSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Validate evidence, collecting one message per offending field.
    pub fn validate(&self, evidence: &Value) -> EvidenceValidation {
        let mut errors = Vec::new();
        let object = match evidence.as_object() {
            Some(object) => object,
            None => {
                return EvidenceValidation {
                    valid: false,
                    errors: vec!["evidence must be a JSON object".to_string()],
                }
            }
        };
        for field in &self.fields {
            match object.get(&field.name) {
                Some(value) => {
                    if !field.kind.matches(value) {
                        errors.push(format!(
                            "field {} must be of type {:?}",
                            field.name, field.kind
                        ));
                    }
                }
                None if field.required => {
                    errors.push(format!("missing required field: {}", field.name));
                }
                None => {}
            }
        }
        EvidenceValidation {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Result of evidence-schema validation.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Immutable resolver metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverMetadata {
    pub id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub evidence_schema: EvidenceSchema,
    pub output_schema: Value,
    pub domains: Vec<String>,
    pub deterministic: bool,
    pub avg_verification_time_ms: u64,
}

impl ResolverMetadata {
    /// Registry key combining id and version.
    pub fn versioned_key(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    /// Upper bound for one verification: ten times the declared average,
    /// floored at five seconds.
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis((self.avg_verification_time_ms * 10).max(MIN_VERIFICATION_TIMEOUT_MS))
    }
}

/// Outcome of a resolver's verification run.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverOutcome {
    /// Whether the evidence checked out.
    pub verified: bool,
    /// Resolver-specific structured output; hashed into the run record.
    pub output: Value,
}

/// A verification plugin.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn metadata(&self) -> &ResolverMetadata;

    /// Validate evidence shape against the declared schema.
    fn validate_evidence(&self, evidence: &Value) -> EvidenceValidation {
        self.metadata().evidence_schema.validate(evidence)
    }

    /// Whether this resolver can handle the claim/evidence pair.
    fn can_resolve(&self, claim: &str, evidence: &Value) -> bool;

    /// Run the verification. An `Err` becomes a run with status `error`,
    /// never a request failure.
    async fn verify(&self, evidence: &Value) -> ServiceResult<ResolverOutcome>;
}

/// Registry descriptor: metadata plus registration state. Covers both
/// in-process resolvers and metadata-only custom registrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverDescriptor {
    pub metadata: ResolverMetadata,
    pub invocable: bool,
    pub deprecated: bool,
    pub registered_at: DateTime<Utc>,
}

struct RegistryInner {
    /// `id@version` → resolver.
    by_key: HashMap<String, Arc<dyn Resolver>>,
    /// `id` → most recently registered version.
    latest: HashMap<String, Arc<dyn Resolver>>,
    /// `id@version` → descriptor, for both invocable and metadata-only rows.
    descriptors: HashMap<String, ResolverDescriptor>,
    /// Registration order, for stable listings.
    order: Vec<String>,
}

/// Catalog of registered resolvers, constructed once at boot.
pub struct ResolverRegistry {
    inner: RwLock<RegistryInner>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                by_key: HashMap::new(),
                latest: HashMap::new(),
                descriptors: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Register the built-in resolver set.
    pub async fn register_built_ins(&self, config: &ResolverConfig) {
        self.register(Arc::new(builtin::ContentHashResolver::new()))
            .await;
        self.register(Arc::new(builtin::UrlOwnershipResolver::new()))
            .await;
        self.register(Arc::new(builtin::GithubRepoResolver::new(
            config.github_token.clone(),
        )))
        .await;
        info!("Built-in resolvers registered");
    }

    /// Register an in-process resolver.
    pub async fn register(&self, resolver: Arc<dyn Resolver>) {
        let metadata = resolver.metadata().clone();
        let key = metadata.versioned_key();
        let mut inner = self.inner.write().await;
        inner.by_key.insert(key.clone(), resolver.clone());
        inner.latest.insert(metadata.id.clone(), resolver);
        inner.descriptors.insert(
            key.clone(),
            ResolverDescriptor {
                metadata,
                invocable: true,
                deprecated: false,
                registered_at: Utc::now(),
            },
        );
        if !inner.order.contains(&key) {
            inner.order.push(key);
        }
    }

    /// Register a metadata-only custom resolver descriptor.
    pub async fn register_descriptor(&self, metadata: ResolverMetadata) -> ServiceResult<ResolverDescriptor> {
        let key = metadata.versioned_key();
        let mut inner = self.inner.write().await;
        if inner.descriptors.contains_key(&key) {
            return Err(ServiceError::AlreadyExists(format!("resolver {}", key)));
        }
        let descriptor = ResolverDescriptor {
            metadata,
            invocable: false,
            deprecated: false,
            registered_at: Utc::now(),
        };
        inner.descriptors.insert(key.clone(), descriptor.clone());
        inner.order.push(key);
        Ok(descriptor)
    }

    /// Fetch an invocable resolver by id, optionally pinned to a version.
    pub async fn get(&self, id: &str, version: Option<&str>) -> Option<Arc<dyn Resolver>> {
        let inner = self.inner.read().await;
        match version {
            Some(version) => inner.by_key.get(&format!("{}@{}", id, version)).cloned(),
            None => inner.latest.get(id).cloned(),
        }
    }

    /// Fetch a descriptor by id, optionally pinned to a version.
    pub async fn describe(&self, id: &str, version: Option<&str>) -> Option<ResolverDescriptor> {
        let inner = self.inner.read().await;
        match version {
            Some(version) => inner.descriptors.get(&format!("{}@{}", id, version)).cloned(),
            None => {
                let version = inner.latest.get(id).map(|r| r.metadata().version.clone());
                match version {
                    Some(version) => inner.descriptors.get(&format!("{}@{}", id, version)).cloned(),
                    // Metadata-only descriptors have no latest entry; take the
                    // last registration with a matching id.
                    None => inner
                        .order
                        .iter()
                        .rev()
                        .filter_map(|key| inner.descriptors.get(key))
                        .find(|d| d.metadata.id == id)
                        .cloned(),
                }
            }
        }
    }

    /// Whether any registration of this id is deprecated.
    pub async fn is_deprecated(&self, id: &str) -> bool {
        self.describe(id, None)
            .await
            .map(|d| d.deprecated)
            .unwrap_or(false)
    }

    /// Mark every registered version of a resolver as deprecated.
    pub async fn deprecate(&self, id: &str) -> ServiceResult<Vec<ResolverDescriptor>> {
        let mut inner = self.inner.write().await;
        let mut updated = Vec::new();
        for descriptor in inner.descriptors.values_mut() {
            if descriptor.metadata.id == id {
                descriptor.deprecated = true;
                updated.push(descriptor.clone());
            }
        }
        if updated.is_empty() {
            return Err(ServiceError::ResolverNotFound(id.to_string()));
        }
        info!(resolver = %id, "Resolver deprecated");
        Ok(updated)
    }

    /// All descriptors in registration order.
    pub async fn list(&self) -> Vec<ResolverDescriptor> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|key| inner.descriptors.get(key))
            .cloned()
            .collect()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
