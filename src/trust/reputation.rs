//! Reputation aggregation
//!
//! Folds a subject's evaluations into a time-decayed score with an
//! attestation bonus and a staleness penalty, plus a confidence figure and a
//! Sybil-resistance assessment derived from the evaluation population.
//! Results are cached per `(subject, realm, domain)` with a short TTL and
//! invalidated whenever a new evaluation lands for the subject.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::attestation::{Attestation, AttestationStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{AttestationFilter, EvaluationFilter, Repository};
use crate::trust::evaluation::Evaluation;

/// Cache entries stay fresh for five minutes.
pub const CACHE_TTL_SECONDS: i64 = 300;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Clamp bounds and decay half-life for one computation.
#[derive(Debug, Clone)]
pub struct ReputationConfig {
    pub half_life_days: f64,
    pub min_score: f64,
    pub max_score: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            half_life_days: 180.0,
            min_score: 0.0,
            max_score: 100.0,
        }
    }
}

/// Inputs to one reputation computation.
pub struct ReputationInput<'a> {
    pub evaluations: &'a [Evaluation],
    pub attestation_count: usize,
    pub verified_attestation_count: usize,
    pub newest_evaluation: Option<DateTime<Utc>>,
}

/// Per-term breakdown of a computed score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationBreakdown {
    pub raw_score: f64,
    pub attestation_bonus: f64,
    pub decay_penalty: f64,
    pub staleness_days: f64,
    pub half_life_days: f64,
}

/// A computed reputation, cacheable per `(subject, realm, domain)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationSnapshot {
    pub subject: String,
    pub realm_id: String,
    pub domain: String,
    pub score: f64,
    pub confidence: f64,
    pub evaluation_count: usize,
    pub attestation_count: usize,
    pub breakdown: ReputationBreakdown,
    pub computed_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Sybil-resistance factor values, each in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SybilFactors {
    pub evaluator_diversity: f64,
    pub verification_depth: f64,
    pub temporal_spread: f64,
    pub cross_realm_consistency: f64,
}

/// Sybil-resistance assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SybilReport {
    pub score: f64,
    pub factors: SybilFactors,
    pub warnings: Vec<String>,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Time-decayed weighted reputation over an evaluation set.
pub fn compute_reputation_with_decay(
    input: &ReputationInput<'_>,
    config: &ReputationConfig,
    now: DateTime<Utc>,
) -> (f64, f64, ReputationBreakdown) {
    let half_life = config.half_life_days.max(f64::EPSILON);

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for eval in input.evaluations {
        let age_days = (now - eval.created_at).num_seconds() as f64 / SECONDS_PER_DAY;
        let w = eval.weight * 0.5f64.powf(age_days.max(0.0) / half_life);
        weighted_sum += f64::from(eval.score) * w;
        weight_total += w;
    }
    let raw_score = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        50.0
    };

    let attestation_bonus = if input.verified_attestation_count == 0 {
        0.0
    } else {
        let verified = input.verified_attestation_count as f64;
        let total = input.attestation_count.max(1) as f64;
        (verified / total) * 10.0 * (verified / 5.0).min(1.0)
    };

    let staleness_days = input
        .newest_evaluation
        .map(|newest| ((now - newest).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0))
        .unwrap_or(0.0);
    let decay_penalty = ((staleness_days - half_life) * 0.1).max(0.0);

    let score = round1(
        (raw_score + attestation_bonus - decay_penalty).clamp(config.min_score, config.max_score),
    );
    let confidence = round2(
        (input.evaluations.len() as f64 / 10.0).min(1.0)
            * 0.5f64.powf(staleness_days / half_life),
    );

    (
        score,
        confidence,
        ReputationBreakdown {
            raw_score,
            attestation_bonus,
            decay_penalty,
            staleness_days,
            half_life_days: half_life,
        },
    )
}

/// Sybil-resistance score over the evaluation and attestation populations.
pub fn compute_sybil_resistance(
    evaluations: &[Evaluation],
    attestations: &[Attestation],
) -> SybilReport {
    let unique_evaluators: HashSet<&str> = evaluations
        .iter()
        .map(|e| e.from_entity.as_str())
        .collect();
    let evaluator_diversity = (unique_evaluators.len() as f64 / 10.0).min(1.0);

    let avg_verification_count = if attestations.is_empty() {
        0.0
    } else {
        attestations
            .iter()
            .map(|a| f64::from(a.verification_count))
            .sum::<f64>()
            / attestations.len() as f64
    };
    let verification_depth = (avg_verification_count / 3.0).min(1.0);

    let span_days = match (
        evaluations.iter().map(|e| e.created_at).min(),
        evaluations.iter().map(|e| e.created_at).max(),
    ) {
        (Some(oldest), Some(newest)) => {
            (newest - oldest).num_seconds() as f64 / SECONDS_PER_DAY
        }
        _ => 0.0,
    };
    let temporal_spread = (span_days / 90.0).min(1.0);

    let unique_realms: HashSet<&str> = evaluations.iter().map(|e| e.realm_id.as_str()).collect();
    let cross_realm_consistency =
        ((unique_realms.len().saturating_sub(1)) as f64 / 3.0).min(1.0);

    let mut warnings = Vec::new();
    if unique_evaluators.len() < 3 {
        warnings.push("Low evaluator diversity".to_string());
    }
    if avg_verification_count < 2.0 {
        warnings.push("Low verification depth".to_string());
    }
    if span_days < 7.0 {
        warnings.push("Suspicious temporal clustering".to_string());
    }

    let score = round2(
        0.35 * evaluator_diversity
            + 0.25 * verification_depth
            + 0.20 * temporal_spread
            + 0.20 * cross_realm_consistency,
    );

    SybilReport {
        score,
        factors: SybilFactors {
            evaluator_diversity,
            verification_depth,
            temporal_spread,
            cross_realm_consistency,
        },
        warnings,
    }
}

/// Cached read-through reputation service.
pub struct ReputationService {
    repository: Arc<dyn Repository>,
}

impl ReputationService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Reputation for a subject in a realm and domain, served from cache
    /// while fresh.
    pub async fn get_reputation(
        &self,
        subject: &str,
        realm_id: &str,
        domain: &str,
        refresh: bool,
    ) -> ServiceResult<ReputationSnapshot> {
        let now = Utc::now();
        if !refresh {
            if let Some(cached) = self
                .repository
                .get_reputation_cache(subject, realm_id, domain)
                .await?
            {
                if cached.valid_until > now {
                    debug!(subject = %subject, realm = %realm_id, domain = %domain, "Reputation cache hit");
                    return Ok(cached);
                }
            }
        }

        let realm = self
            .repository
            .get_realm(realm_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidRealm(realm_id.to_string()))?;

        let evaluations = self
            .repository
            .list_evaluations(&EvaluationFilter {
                to_entity: Some(subject.to_string()),
                realm_id: Some(realm_id.to_string()),
                domain: Some(domain.to_string()),
                ..Default::default()
            })
            .await?;
        let attestations = self
            .repository
            .list_attestations(&AttestationFilter {
                subject: Some(subject.to_string()),
                realm_id: Some(realm_id.to_string()),
                ..Default::default()
            })
            .await?;
        let verified_count = attestations
            .iter()
            .filter(|a| a.status == AttestationStatus::Verified)
            .count();

        let config = ReputationConfig {
            half_life_days: realm.rules.half_life_days(),
            min_score: realm.rules.min_score,
            max_score: 100.0,
        };
        let input = ReputationInput {
            evaluations: &evaluations,
            attestation_count: attestations.len(),
            verified_attestation_count: verified_count,
            newest_evaluation: evaluations.iter().map(|e| e.created_at).max(),
        };
        let (score, confidence, breakdown) = compute_reputation_with_decay(&input, &config, now);

        let snapshot = ReputationSnapshot {
            subject: subject.to_string(),
            realm_id: realm_id.to_string(),
            domain: domain.to_string(),
            score,
            confidence,
            evaluation_count: evaluations.len(),
            attestation_count: attestations.len(),
            breakdown,
            computed_at: now,
            valid_until: now + Duration::seconds(CACHE_TTL_SECONDS),
        };
        self.repository.upsert_reputation_cache(&snapshot).await?;
        debug!(subject = %subject, realm = %realm_id, domain = %domain, score = score, "Reputation computed");
        Ok(snapshot)
    }

    /// Sybil-resistance assessment for a subject in a realm.
    pub async fn sybil_resistance(
        &self,
        subject: &str,
        realm_id: &str,
    ) -> ServiceResult<SybilReport> {
        let evaluations = self
            .repository
            .list_evaluations(&EvaluationFilter {
                to_entity: Some(subject.to_string()),
                realm_id: Some(realm_id.to_string()),
                ..Default::default()
            })
            .await?;
        let attestations = self
            .repository
            .list_attestations(&AttestationFilter {
                subject: Some(subject.to_string()),
                realm_id: Some(realm_id.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(compute_sybil_resistance(&evaluations, &attestations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_aged(score: u8, weight: f64, age_days: i64, now: DateTime<Utc>) -> Evaluation {
        Evaluation {
            id: format!("cid_eval_{}_{}", score, age_days),
            from_entity: format!("rater_{}", age_days),
            to_entity: "subject".to_string(),
            realm_id: "realm-1".to_string(),
            domain: "d".to_string(),
            score,
            weight,
            rationale: None,
            supporting_attestations: Vec::new(),
            signature: String::new(),
            expires_at: None,
            created_at: now - Duration::days(age_days),
        }
    }

    fn attestation(verification_count: u32) -> Attestation {
        Attestation {
            id: format!("cid_att_{}", verification_count),
            realm_id: "realm-1".to_string(),
            attester: "attester".to_string(),
            subject: "subject".to_string(),
            claim: "claim".to_string(),
            resolver_id: "content-hash".to_string(),
            evidence: json!({}),
            references: Vec::new(),
            signature: String::new(),
            status: AttestationStatus::Verified,
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            verification_count,
            last_verified_at: None,
        }
    }

    #[test]
    fn test_decay_weighted_score() {
        let now = Utc::now();
        let evals = vec![eval_aged(80, 1.0, 30, now), eval_aged(80, 1.0, 180, now)];
        let input = ReputationInput {
            evaluations: &evals,
            attestation_count: 0,
            verified_attestation_count: 0,
            newest_evaluation: evals.iter().map(|e| e.created_at).max(),
        };
        let (score, confidence, breakdown) =
            compute_reputation_with_decay(&input, &ReputationConfig::default(), now);

        assert!((score - 80.0).abs() < 0.11);
        assert!(breakdown.decay_penalty.abs() < 1e-9);
        // min(1, 2/10) · 0.5^(30/180) ≈ 0.178, rounded to 0.18
        assert!((confidence - 0.18).abs() < 0.011);
    }

    #[test]
    fn test_no_evaluations_yields_neutral_raw_score() {
        let now = Utc::now();
        let input = ReputationInput {
            evaluations: &[],
            attestation_count: 0,
            verified_attestation_count: 0,
            newest_evaluation: None,
        };
        let (score, confidence, breakdown) =
            compute_reputation_with_decay(&input, &ReputationConfig::default(), now);
        assert!((breakdown.raw_score - 50.0).abs() < 1e-9);
        assert!((score - 50.0).abs() < 1e-9);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_attestation_bonus_scales_with_verified_share() {
        let now = Utc::now();
        let evals = vec![eval_aged(50, 1.0, 1, now)];
        let input = ReputationInput {
            evaluations: &evals,
            attestation_count: 10,
            verified_attestation_count: 5,
            newest_evaluation: Some(now - Duration::days(1)),
        };
        let (_, _, breakdown) =
            compute_reputation_with_decay(&input, &ReputationConfig::default(), now);
        // (5/10) · 10 · min(5/5, 1) = 5
        assert!((breakdown.attestation_bonus - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_staleness_penalty_applies_past_half_life() {
        let now = Utc::now();
        let evals = vec![eval_aged(90, 1.0, 200, now)];
        let config = ReputationConfig {
            half_life_days: 180.0,
            ..Default::default()
        };
        let input = ReputationInput {
            evaluations: &evals,
            attestation_count: 0,
            verified_attestation_count: 0,
            newest_evaluation: Some(now - Duration::days(200)),
        };
        let (_, _, breakdown) = compute_reputation_with_decay(&input, &config, now);
        assert!((breakdown.decay_penalty - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_confidence_non_increasing_in_staleness() {
        let now = Utc::now();
        let mut previous = f64::MAX;
        for staleness in [0i64, 30, 90, 180, 360] {
            let evals = vec![eval_aged(80, 1.0, staleness, now)];
            let input = ReputationInput {
                evaluations: &evals,
                attestation_count: 0,
                verified_attestation_count: 0,
                newest_evaluation: Some(now - Duration::days(staleness)),
            };
            let (_, confidence, _) =
                compute_reputation_with_decay(&input, &ReputationConfig::default(), now);
            assert!(confidence <= previous);
            previous = confidence;
        }
    }

    #[test]
    fn test_sybil_warnings_for_clustered_population() {
        let now = Utc::now();
        let evals = vec![eval_aged(80, 1.0, 0, now), eval_aged(70, 1.0, 2, now)];
        let report = compute_sybil_resistance(&evals, &[attestation(1)]);

        assert!(report.warnings.iter().any(|w| w == "Low evaluator diversity"));
        assert!(report.warnings.iter().any(|w| w == "Low verification depth"));
        assert!(report
            .warnings
            .iter()
            .any(|w| w == "Suspicious temporal clustering"));
        assert!(report.score < 0.5);
    }

    #[test]
    fn test_sybil_factors_saturate() {
        let now = Utc::now();
        let evals: Vec<Evaluation> = (0..12)
            .map(|i| {
                let mut e = eval_aged(80, 1.0, i * 30, now);
                e.from_entity = format!("rater_{}", i);
                e.realm_id = format!("realm-{}", i % 5);
                e
            })
            .collect();
        let attestations: Vec<Attestation> = (0..4).map(|_| attestation(5)).collect();
        let report = compute_sybil_resistance(&evals, &attestations);

        assert!((report.factors.evaluator_diversity - 1.0).abs() < 1e-9);
        assert!((report.factors.verification_depth - 1.0).abs() < 1e-9);
        assert!((report.factors.temporal_spread - 1.0).abs() < 1e-9);
        assert!((report.factors.cross_realm_consistency - 1.0).abs() < 1e-9);
        assert!(report.warnings.is_empty());
        assert!((report.score - 1.0).abs() < 1e-9);
    }
}
