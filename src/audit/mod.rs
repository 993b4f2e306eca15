//! Append-only hash-chained audit log
//!
//! Every significant mutation emits an event whose hash covers the previous
//! event's hash, forming a verifiable chain back to the `"genesis"` sentinel.
//! Appends serialize behind a mutex so concurrent writers always observe a
//! totally ordered chain; the same lock order is used for the storage commit.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::crypto::canonical::{canonical_bytes, sha256_hex};
use crate::error::ServiceResult;
use crate::storage::Repository;

/// Chain sentinel preceding the first event.
pub const GENESIS_HASH: &str = "genesis";

/// Marker used when audit persistence is disabled by configuration.
pub const DISABLED_HASH: &str = "disabled";

/// One event in the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub entity_ids: Vec<String>,
    pub payload: Value,
    pub previous_hash: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a full-chain verification walk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub checked_events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_index: Option<usize>,
}

/// The append-only audit log.
pub struct AuditLog {
    repository: Arc<dyn Repository>,
    enabled: bool,
    /// Tail hash of the chain; `None` until first use, then always the hash
    /// of the latest persisted event.
    tail: Mutex<Option<String>>,
}

impl AuditLog {
    pub fn new(repository: Arc<dyn Repository>, enabled: bool) -> Self {
        Self {
            repository,
            enabled,
            tail: Mutex::new(None),
        }
    }

    /// Append an event to the chain.
    ///
    /// With persistence disabled, a well-formed event is still returned with
    /// `previousHash = hash = "disabled"` and nothing is stored.
    pub async fn append(
        &self,
        kind: &str,
        actor: &str,
        entity_ids: Vec<String>,
        payload: Value,
    ) -> ServiceResult<AuditEvent> {
        let timestamp = Utc::now();
        let mut entity_ids = entity_ids;
        entity_ids.sort();

        if !self.enabled {
            return Ok(AuditEvent {
                id: format!("audit_{}", &sha256_hex(kind.as_bytes())[..24]),
                kind: kind.to_string(),
                actor: actor.to_string(),
                entity_ids,
                payload,
                previous_hash: DISABLED_HASH.to_string(),
                hash: DISABLED_HASH.to_string(),
                timestamp,
            });
        }

        // The mutex spans hash computation and the storage commit, so the
        // chain order and the insertion order can never diverge.
        let mut tail = self.tail.lock().await;
        let previous_hash = match tail.as_ref() {
            Some(hash) => hash.clone(),
            None => self
                .repository
                .latest_audit_hash()
                .await?
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
        };

        let hash = event_hash(kind, actor, &entity_ids, &payload, timestamp, &previous_hash)?;
        let event = AuditEvent {
            id: format!("audit_{}", &hash[..24]),
            kind: kind.to_string(),
            actor: actor.to_string(),
            entity_ids,
            payload,
            previous_hash,
            hash: hash.clone(),
            timestamp,
        };

        self.repository.append_audit_event(&event).await?;
        *tail = Some(hash);
        debug!(kind = %event.kind, actor = %event.actor, "Audit event appended");
        Ok(event)
    }

    /// Walk the persisted chain and verify every link and hash.
    pub async fn verify_chain(&self) -> ServiceResult<ChainVerification> {
        let events = self.repository.list_audit_events().await?;
        Ok(Self::verify_events(&events))
    }

    /// Pure chain verification over an ordered event list.
    pub fn verify_events(events: &[AuditEvent]) -> ChainVerification {
        let mut expected_previous = GENESIS_HASH.to_string();
        for (index, event) in events.iter().enumerate() {
            if event.previous_hash != expected_previous {
                return ChainVerification {
                    valid: false,
                    checked_events: events.len(),
                    first_invalid_index: Some(index),
                };
            }
            let recomputed = event_hash(
                &event.kind,
                &event.actor,
                &event.entity_ids,
                &event.payload,
                event.timestamp,
                &event.previous_hash,
            );
            match recomputed {
                Ok(hash) if hash == event.hash => {}
                _ => {
                    return ChainVerification {
                        valid: false,
                        checked_events: events.len(),
                        first_invalid_index: Some(index),
                    };
                }
            }
            expected_previous = event.hash.clone();
        }
        ChainVerification {
            valid: true,
            checked_events: events.len(),
            first_invalid_index: None,
        }
    }
}

fn event_hash(
    kind: &str,
    actor: &str,
    entity_ids: &[String],
    payload: &Value,
    timestamp: DateTime<Utc>,
    previous_hash: &str,
) -> ServiceResult<String> {
    let record = serde_json::json!({
        "type": kind,
        "actor": actor,
        "entityIds": entity_ids,
        "payload": payload,
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        "previousHash": previous_hash,
    });
    Ok(sha256_hex(&canonical_bytes(&record)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRepository;
    use serde_json::json;

    fn audit_log() -> AuditLog {
        AuditLog::new(Arc::new(MemoryRepository::new()), true)
    }

    #[tokio::test]
    async fn test_first_event_links_to_genesis() {
        let log = audit_log();
        let event = log
            .append("attestation.created", "ent_a", vec!["cid_1".into()], json!({}))
            .await
            .unwrap();
        assert_eq!(event.previous_hash, GENESIS_HASH);
        assert!(event.id.starts_with("audit_"));
    }

    #[tokio::test]
    async fn test_chain_links_and_verifies() {
        let log = audit_log();
        let first = log
            .append("realm.created", "ent_a", vec!["r1".into()], json!({}))
            .await
            .unwrap();
        let second = log
            .append("evaluation.created", "ent_a", vec!["cid_2".into()], json!({}))
            .await
            .unwrap();
        assert_eq!(second.previous_hash, first.hash);

        let report = log.verify_chain().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.checked_events, 2);
    }

    #[tokio::test]
    async fn test_entity_ids_are_sorted() {
        let log = audit_log();
        let event = log
            .append(
                "proof.generated",
                "ent_a",
                vec!["z".into(), "a".into(), "m".into()],
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(event.entity_ids, vec!["a", "m", "z"]);
    }

    #[tokio::test]
    async fn test_tampered_payload_breaks_chain() {
        let log = audit_log();
        for i in 0..3 {
            log.append("attestation.created", "ent_a", vec![format!("cid_{i}")], json!({"i": i}))
                .await
                .unwrap();
        }
        let mut events = log.repository.list_audit_events().await.unwrap();
        events[1].payload = json!({"i": 99});

        let report = AuditLog::verify_events(&events);
        assert!(!report.valid);
        assert_eq!(report.first_invalid_index, Some(1));
    }

    #[tokio::test]
    async fn test_disabled_log_returns_sentinel_event() {
        let log = AuditLog::new(Arc::new(MemoryRepository::new()), false);
        let event = log
            .append("attestation.created", "ent_a", vec![], json!({}))
            .await
            .unwrap();
        assert_eq!(event.previous_hash, DISABLED_HASH);
        assert_eq!(event.hash, DISABLED_HASH);
        assert_eq!(log.repository.list_audit_events().await.unwrap().len(), 0);
    }
}
