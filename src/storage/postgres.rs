//! PostgreSQL repository using sqlx
//!
//! Runtime queries over a connection pool; schema DDL runs once at boot.
//! JSON-shaped columns (evidence, rules, payloads, proof envelopes) are
//! stored as JSONB. The combined operations run inside transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

use crate::attestation::{Attestation, AttestationStatus, RunStatus, VerificationRun};
use crate::audit::AuditEvent;
use crate::error::{ServiceError, ServiceResult};
use crate::proof::StoredProof;
use crate::realm::Realm;
use crate::storage::{
    AttestationFilter, EvaluationFilter, ProofFilter, RealmFilter, Repository,
};
use crate::trust::evaluation::Evaluation;
use crate::trust::reputation::ReputationSnapshot;

/// Repository backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect to the database and prepare the pool.
    pub async fn connect(database_url: &str, pool_size: u32) -> ServiceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await
            .map_err(ServiceError::storage)?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> ServiceResult<()> {
        info!("Initializing database schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS realms (
                id VARCHAR(255) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                parent VARCHAR(255),
                path TEXT NOT NULL UNIQUE,
                depth INTEGER NOT NULL,
                domain VARCHAR(255) NOT NULL,
                rules JSONB NOT NULL,
                public_key TEXT NOT NULL,
                created_by VARCHAR(255) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attestations (
                id VARCHAR(255) PRIMARY KEY,
                realm_id VARCHAR(255) NOT NULL REFERENCES realms(id),
                attester VARCHAR(255) NOT NULL,
                subject VARCHAR(255) NOT NULL,
                claim TEXT NOT NULL,
                resolver_id VARCHAR(255) NOT NULL,
                evidence JSONB NOT NULL,
                refs JSONB NOT NULL,
                signature TEXT NOT NULL,
                status VARCHAR(20) NOT NULL,
                expires_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL,
                verification_count INTEGER NOT NULL DEFAULT 0,
                last_verified_at TIMESTAMP WITH TIME ZONE
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verification_runs (
                seq BIGSERIAL PRIMARY KEY,
                id VARCHAR(255) NOT NULL UNIQUE,
                attestation_id VARCHAR(255) NOT NULL
                    REFERENCES attestations(id) ON DELETE CASCADE,
                resolver_id VARCHAR(255) NOT NULL,
                resolver_version VARCHAR(50) NOT NULL,
                status VARCHAR(20) NOT NULL,
                output JSONB NOT NULL,
                output_hash VARCHAR(64) NOT NULL,
                snapshot JSONB NOT NULL,
                duration_ms BIGINT NOT NULL,
                triggered_by VARCHAR(255) NOT NULL,
                error TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evaluations (
                id VARCHAR(255) PRIMARY KEY,
                from_entity VARCHAR(255) NOT NULL,
                to_entity VARCHAR(255) NOT NULL,
                realm_id VARCHAR(255) NOT NULL REFERENCES realms(id),
                domain VARCHAR(255) NOT NULL,
                score INTEGER NOT NULL,
                weight DOUBLE PRECISION NOT NULL,
                rationale TEXT,
                supporting_attestations JSONB NOT NULL,
                signature TEXT NOT NULL,
                expires_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                UNIQUE(from_entity, to_entity, realm_id, domain)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reputation_cache (
                subject VARCHAR(255) NOT NULL,
                realm_id VARCHAR(255) NOT NULL,
                domain VARCHAR(255) NOT NULL,
                score DOUBLE PRECISION NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                evaluation_count INTEGER NOT NULL,
                attestation_count INTEGER NOT NULL,
                breakdown JSONB NOT NULL,
                computed_at TIMESTAMP WITH TIME ZONE NOT NULL,
                valid_until TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (subject, realm_id, domain)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proofs (
                id VARCHAR(255) PRIMARY KEY,
                subject VARCHAR(255) NOT NULL,
                realm_id VARCHAR(255) NOT NULL,
                domain VARCHAR(255) NOT NULL,
                envelope JSONB NOT NULL,
                evidence_count INTEGER NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                seq BIGSERIAL PRIMARY KEY,
                id VARCHAR(255) NOT NULL,
                type VARCHAR(100) NOT NULL,
                actor VARCHAR(255) NOT NULL,
                entity_ids JSONB NOT NULL,
                payload JSONB NOT NULL,
                previous_hash VARCHAR(64) NOT NULL,
                hash VARCHAR(64) NOT NULL,
                timestamp TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_attestations_realm_subject ON attestations(realm_id, subject)",
            "CREATE INDEX IF NOT EXISTS idx_attestations_status ON attestations(status)",
            "CREATE INDEX IF NOT EXISTS idx_runs_attestation ON verification_runs(attestation_id)",
            "CREATE INDEX IF NOT EXISTS idx_evaluations_to ON evaluations(to_entity, realm_id, domain)",
            "CREATE INDEX IF NOT EXISTS idx_evaluations_from_domain ON evaluations(from_entity, domain)",
            "CREATE INDEX IF NOT EXISTS idx_proofs_subject ON proofs(subject, realm_id)",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(ServiceError::storage)?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn realm_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<Realm> {
    let rules: serde_json::Value = row.get("rules");
    Ok(Realm {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        parent: row.get("parent"),
        path: row.get("path"),
        depth: row.get::<i32, _>("depth") as u32,
        domain: row.get("domain"),
        rules: serde_json::from_value(rules).map_err(ServiceError::storage)?,
        public_key: row.get("public_key"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn attestation_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<Attestation> {
    let status: String = row.get("status");
    let references: serde_json::Value = row.get("refs");
    Ok(Attestation {
        id: row.get("id"),
        realm_id: row.get("realm_id"),
        attester: row.get("attester"),
        subject: row.get("subject"),
        claim: row.get("claim"),
        resolver_id: row.get("resolver_id"),
        evidence: row.get("evidence"),
        references: serde_json::from_value(references).map_err(ServiceError::storage)?,
        signature: row.get("signature"),
        status: AttestationStatus::parse(&status)
            .ok_or_else(|| ServiceError::Internal(format!("unknown attestation status: {}", status)))?,
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        verification_count: row.get::<i32, _>("verification_count") as u32,
        last_verified_at: row.get("last_verified_at"),
    })
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<VerificationRun> {
    let status: String = row.get("status");
    Ok(VerificationRun {
        id: row.get("id"),
        attestation_id: row.get("attestation_id"),
        resolver_id: row.get("resolver_id"),
        resolver_version: row.get("resolver_version"),
        status: RunStatus::parse(&status)
            .ok_or_else(|| ServiceError::Internal(format!("unknown run status: {}", status)))?,
        output: row.get("output"),
        output_hash: row.get("output_hash"),
        snapshot: row.get("snapshot"),
        duration_ms: row.get::<i64, _>("duration_ms") as u64,
        triggered_by: row.get("triggered_by"),
        error: row.get("error"),
        created_at: row.get("created_at"),
    })
}

fn evaluation_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<Evaluation> {
    let supporting: serde_json::Value = row.get("supporting_attestations");
    Ok(Evaluation {
        id: row.get("id"),
        from_entity: row.get("from_entity"),
        to_entity: row.get("to_entity"),
        realm_id: row.get("realm_id"),
        domain: row.get("domain"),
        score: row.get::<i32, _>("score") as u8,
        weight: row.get("weight"),
        rationale: row.get("rationale"),
        supporting_attestations: serde_json::from_value(supporting).map_err(ServiceError::storage)?,
        signature: row.get("signature"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<ReputationSnapshot> {
    let breakdown: serde_json::Value = row.get("breakdown");
    Ok(ReputationSnapshot {
        subject: row.get("subject"),
        realm_id: row.get("realm_id"),
        domain: row.get("domain"),
        score: row.get("score"),
        confidence: row.get("confidence"),
        evaluation_count: row.get::<i32, _>("evaluation_count") as usize,
        attestation_count: row.get::<i32, _>("attestation_count") as usize,
        breakdown: serde_json::from_value(breakdown).map_err(ServiceError::storage)?,
        computed_at: row.get("computed_at"),
        valid_until: row.get("valid_until"),
    })
}

fn proof_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<StoredProof> {
    let envelope: serde_json::Value = row.get("envelope");
    Ok(StoredProof {
        id: row.get("id"),
        envelope: serde_json::from_value(envelope).map_err(ServiceError::storage)?,
        evidence_count: row.get::<i32, _>("evidence_count") as usize,
        created_at: row.get("created_at"),
    })
}

fn audit_event_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<AuditEvent> {
    let entity_ids: serde_json::Value = row.get("entity_ids");
    Ok(AuditEvent {
        id: row.get("id"),
        kind: row.get("type"),
        actor: row.get("actor"),
        entity_ids: serde_json::from_value(entity_ids).map_err(ServiceError::storage)?,
        payload: row.get("payload"),
        previous_hash: row.get("previous_hash"),
        hash: row.get("hash"),
        timestamp: row.get("timestamp"),
    })
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert_realm(&self, realm: &Realm) -> ServiceResult<()> {
        let rules = serde_json::to_value(&realm.rules).map_err(ServiceError::storage)?;
        sqlx::query(
            r#"
            INSERT INTO realms
                (id, name, description, parent, path, depth, domain, rules,
                 public_key, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
        )
        .bind(&realm.id)
        .bind(&realm.name)
        .bind(&realm.description)
        .bind(&realm.parent)
        .bind(&realm.path)
        .bind(realm.depth as i32)
        .bind(&realm.domain)
        .bind(rules)
        .bind(&realm.public_key)
        .bind(&realm.created_by)
        .bind(realm.created_at)
        .bind(realm.updated_at)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn get_realm(&self, id: &str) -> ServiceResult<Option<Realm>> {
        let row = sqlx::query("SELECT * FROM realms WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        row.map(|r| realm_from_row(&r)).transpose()
    }

    async fn get_realm_by_path(&self, path: &str) -> ServiceResult<Option<Realm>> {
        let row = sqlx::query("SELECT * FROM realms WHERE path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        row.map(|r| realm_from_row(&r)).transpose()
    }

    async fn list_realms(&self, filter: &RealmFilter) -> ServiceResult<Vec<Realm>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM realms
            WHERE ($1::varchar IS NULL OR domain = $1)
              AND ($2::varchar IS NULL OR parent = $2)
              AND ($3::text IS NULL OR path LIKE $3 || '%')
            ORDER BY path
            LIMIT $4 OFFSET $5
        "#,
        )
        .bind(&filter.domain)
        .bind(&filter.parent)
        .bind(&filter.path_prefix)
        .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        rows.iter().map(realm_from_row).collect()
    }

    async fn delete_realm(&self, id: &str) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await.map_err(ServiceError::storage)?;
        sqlx::query("DELETE FROM reputation_cache WHERE realm_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::storage)?;
        sqlx::query("DELETE FROM proofs WHERE realm_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::storage)?;
        let result = sqlx::query("DELETE FROM realms WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::storage)?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound {
                kind: "realm",
                id: id.to_string(),
            });
        }
        tx.commit().await.map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn realm_has_attestations(&self, realm_id: &str) -> ServiceResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM attestations WHERE realm_id = $1) AS present")
            .bind(realm_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        Ok(row.get("present"))
    }

    async fn insert_attestation(&self, attestation: &Attestation) -> ServiceResult<()> {
        let references =
            serde_json::to_value(&attestation.references).map_err(ServiceError::storage)?;
        sqlx::query(
            r#"
            INSERT INTO attestations
                (id, realm_id, attester, subject, claim, resolver_id, evidence,
                 refs, signature, status, expires_at, created_at, updated_at,
                 verification_count, last_verified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
        )
        .bind(&attestation.id)
        .bind(&attestation.realm_id)
        .bind(&attestation.attester)
        .bind(&attestation.subject)
        .bind(&attestation.claim)
        .bind(&attestation.resolver_id)
        .bind(&attestation.evidence)
        .bind(references)
        .bind(&attestation.signature)
        .bind(attestation.status.as_str())
        .bind(attestation.expires_at)
        .bind(attestation.created_at)
        .bind(attestation.updated_at)
        .bind(attestation.verification_count as i32)
        .bind(attestation.last_verified_at)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn get_attestation(&self, id: &str) -> ServiceResult<Option<Attestation>> {
        let row = sqlx::query("SELECT * FROM attestations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        row.map(|r| attestation_from_row(&r)).transpose()
    }

    async fn update_attestation(&self, attestation: &Attestation) -> ServiceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE attestations
            SET status = $2, updated_at = $3, verification_count = $4,
                last_verified_at = $5
            WHERE id = $1
        "#,
        )
        .bind(&attestation.id)
        .bind(attestation.status.as_str())
        .bind(attestation.updated_at)
        .bind(attestation.verification_count as i32)
        .bind(attestation.last_verified_at)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound {
                kind: "attestation",
                id: attestation.id.clone(),
            });
        }
        Ok(())
    }

    async fn list_attestations(
        &self,
        filter: &AttestationFilter,
    ) -> ServiceResult<Vec<Attestation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM attestations
            WHERE ($1::varchar IS NULL OR realm_id = $1)
              AND ($2::varchar IS NULL OR subject = $2)
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY created_at
            LIMIT $4 OFFSET $5
        "#,
        )
        .bind(&filter.realm_id)
        .bind(&filter.subject)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        rows.iter().map(attestation_from_row).collect()
    }

    async fn delete_attestation(&self, id: &str) -> ServiceResult<()> {
        // verification_runs cascade via the foreign key.
        let result = sqlx::query("DELETE FROM attestations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound {
                kind: "attestation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_expirable_attestations(
        &self,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Attestation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM attestations
            WHERE expires_at IS NOT NULL AND expires_at < $1
              AND status NOT IN ('revoked', 'expired')
        "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        rows.iter().map(attestation_from_row).collect()
    }

    async fn record_verification(
        &self,
        run: &VerificationRun,
        attestation: &Attestation,
    ) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await.map_err(ServiceError::storage)?;
        sqlx::query(
            r#"
            INSERT INTO verification_runs
                (id, attestation_id, resolver_id, resolver_version, status,
                 output, output_hash, snapshot, duration_ms, triggered_by,
                 error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
        )
        .bind(&run.id)
        .bind(&run.attestation_id)
        .bind(&run.resolver_id)
        .bind(&run.resolver_version)
        .bind(run.status.as_str())
        .bind(&run.output)
        .bind(&run.output_hash)
        .bind(&run.snapshot)
        .bind(run.duration_ms as i64)
        .bind(&run.triggered_by)
        .bind(&run.error)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await
        .map_err(ServiceError::storage)?;

        sqlx::query(
            r#"
            UPDATE attestations
            SET status = $2, updated_at = $3, verification_count = $4,
                last_verified_at = $5
            WHERE id = $1
        "#,
        )
        .bind(&attestation.id)
        .bind(attestation.status.as_str())
        .bind(attestation.updated_at)
        .bind(attestation.verification_count as i32)
        .bind(attestation.last_verified_at)
        .execute(&mut *tx)
        .await
        .map_err(ServiceError::storage)?;

        tx.commit().await.map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn list_runs(&self, attestation_id: &str) -> ServiceResult<Vec<VerificationRun>> {
        let rows = sqlx::query(
            "SELECT * FROM verification_runs WHERE attestation_id = $1 ORDER BY seq",
        )
        .bind(attestation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        rows.iter().map(run_from_row).collect()
    }

    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> ServiceResult<Evaluation> {
        let supporting = serde_json::to_value(&evaluation.supporting_attestations)
            .map_err(ServiceError::storage)?;
        let mut tx = self.pool.begin().await.map_err(ServiceError::storage)?;

        let existing = sqlx::query(
            r#"
            SELECT * FROM evaluations
            WHERE from_entity = $1 AND to_entity = $2 AND realm_id = $3 AND domain = $4
            FOR UPDATE
        "#,
        )
        .bind(&evaluation.from_entity)
        .bind(&evaluation.to_entity)
        .bind(&evaluation.realm_id)
        .bind(&evaluation.domain)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ServiceError::storage)?;

        let stored = match existing {
            Some(row) => {
                let mut stored = evaluation_from_row(&row)?;
                sqlx::query(
                    r#"
                    UPDATE evaluations
                    SET score = $2, weight = $3, rationale = $4,
                        supporting_attestations = $5, signature = $6
                    WHERE id = $1
                "#,
                )
                .bind(&stored.id)
                .bind(evaluation.score as i32)
                .bind(evaluation.weight)
                .bind(&evaluation.rationale)
                .bind(&supporting)
                .bind(&evaluation.signature)
                .execute(&mut *tx)
                .await
                .map_err(ServiceError::storage)?;
                stored.score = evaluation.score;
                stored.weight = evaluation.weight;
                stored.rationale = evaluation.rationale.clone();
                stored.supporting_attestations = evaluation.supporting_attestations.clone();
                stored.signature = evaluation.signature.clone();
                stored
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO evaluations
                        (id, from_entity, to_entity, realm_id, domain, score,
                         weight, rationale, supporting_attestations, signature,
                         expires_at, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
                )
                .bind(&evaluation.id)
                .bind(&evaluation.from_entity)
                .bind(&evaluation.to_entity)
                .bind(&evaluation.realm_id)
                .bind(&evaluation.domain)
                .bind(evaluation.score as i32)
                .bind(evaluation.weight)
                .bind(&evaluation.rationale)
                .bind(&supporting)
                .bind(&evaluation.signature)
                .bind(evaluation.expires_at)
                .bind(evaluation.created_at)
                .execute(&mut *tx)
                .await
                .map_err(ServiceError::storage)?;
                evaluation.clone()
            }
        };

        sqlx::query("DELETE FROM reputation_cache WHERE subject = $1 AND realm_id = $2")
            .bind(&stored.to_entity)
            .bind(&stored.realm_id)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::storage)?;

        tx.commit().await.map_err(ServiceError::storage)?;
        Ok(stored)
    }

    async fn list_evaluations(&self, filter: &EvaluationFilter) -> ServiceResult<Vec<Evaluation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM evaluations
            WHERE ($1::varchar IS NULL OR from_entity = $1)
              AND ($2::varchar IS NULL OR to_entity = $2)
              AND ($3::varchar IS NULL OR realm_id = $3)
              AND ($4::varchar IS NULL OR domain = $4)
            ORDER BY created_at
            LIMIT $5 OFFSET $6
        "#,
        )
        .bind(&filter.from_entity)
        .bind(&filter.to_entity)
        .bind(&filter.realm_id)
        .bind(&filter.domain)
        .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        rows.iter().map(evaluation_from_row).collect()
    }

    async fn get_reputation_cache(
        &self,
        subject: &str,
        realm_id: &str,
        domain: &str,
    ) -> ServiceResult<Option<ReputationSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM reputation_cache WHERE subject = $1 AND realm_id = $2 AND domain = $3",
        )
        .bind(subject)
        .bind(realm_id)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    async fn upsert_reputation_cache(&self, snapshot: &ReputationSnapshot) -> ServiceResult<()> {
        let breakdown = serde_json::to_value(&snapshot.breakdown).map_err(ServiceError::storage)?;
        sqlx::query(
            r#"
            INSERT INTO reputation_cache
                (subject, realm_id, domain, score, confidence, evaluation_count,
                 attestation_count, breakdown, computed_at, valid_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (subject, realm_id, domain) DO UPDATE SET
                score = EXCLUDED.score,
                confidence = EXCLUDED.confidence,
                evaluation_count = EXCLUDED.evaluation_count,
                attestation_count = EXCLUDED.attestation_count,
                breakdown = EXCLUDED.breakdown,
                computed_at = EXCLUDED.computed_at,
                valid_until = EXCLUDED.valid_until
        "#,
        )
        .bind(&snapshot.subject)
        .bind(&snapshot.realm_id)
        .bind(&snapshot.domain)
        .bind(snapshot.score)
        .bind(snapshot.confidence)
        .bind(snapshot.evaluation_count as i32)
        .bind(snapshot.attestation_count as i32)
        .bind(breakdown)
        .bind(snapshot.computed_at)
        .bind(snapshot.valid_until)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn insert_proof(&self, proof: &StoredProof) -> ServiceResult<()> {
        let envelope = serde_json::to_value(&proof.envelope).map_err(ServiceError::storage)?;
        sqlx::query(
            r#"
            INSERT INTO proofs
                (id, subject, realm_id, domain, envelope, evidence_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
        )
        .bind(&proof.id)
        .bind(&proof.envelope.data.subject)
        .bind(&proof.envelope.data.realm_id)
        .bind(&proof.envelope.data.domain)
        .bind(envelope)
        .bind(proof.evidence_count as i32)
        .bind(proof.created_at)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn get_proof(&self, id: &str) -> ServiceResult<Option<StoredProof>> {
        let row = sqlx::query("SELECT * FROM proofs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        row.map(|r| proof_from_row(&r)).transpose()
    }

    async fn list_proofs(&self, filter: &ProofFilter) -> ServiceResult<Vec<StoredProof>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM proofs
            WHERE ($1::varchar IS NULL OR subject = $1)
              AND ($2::varchar IS NULL OR realm_id = $2)
            ORDER BY created_at
            LIMIT $3 OFFSET $4
        "#,
        )
        .bind(&filter.subject)
        .bind(&filter.realm_id)
        .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        rows.iter().map(proof_from_row).collect()
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> ServiceResult<()> {
        let entity_ids = serde_json::to_value(&event.entity_ids).map_err(ServiceError::storage)?;
        sqlx::query(
            r#"
            INSERT INTO audit_events
                (id, type, actor, entity_ids, payload, previous_hash, hash, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(&event.actor)
        .bind(entity_ids)
        .bind(&event.payload)
        .bind(&event.previous_hash)
        .bind(&event.hash)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(ServiceError::storage)?;
        Ok(())
    }

    async fn latest_audit_hash(&self) -> ServiceResult<Option<String>> {
        let row = sqlx::query("SELECT hash FROM audit_events ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        Ok(row.map(|r| r.get("hash")))
    }

    async fn list_audit_events(&self) -> ServiceResult<Vec<AuditEvent>> {
        let rows = sqlx::query("SELECT * FROM audit_events ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(ServiceError::storage)?;
        rows.iter().map(audit_event_from_row).collect()
    }
}
