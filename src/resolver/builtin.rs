//! Built-in resolvers
//!
//! Three plugins ship with the service: a deterministic local hash check and
//! two network-backed ownership checks. Network resolvers declare themselves
//! non-deterministic; their outputs still hash deterministically into the
//! verification run.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::crypto::canonical::sha256_hex;
use crate::error::{ServiceError, ServiceResult};
use crate::resolver::{
    EvidenceSchema, FieldKind, FieldSpec, Resolver, ResolverMetadata, ResolverOutcome,
};

const HTTP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Verifies that evidence content hashes to a declared SHA-256 digest.
pub struct ContentHashResolver {
    metadata: ResolverMetadata,
}

impl ContentHashResolver {
    pub fn new() -> Self {
        Self {
            metadata: ResolverMetadata {
                id: "content-hash".to_string(),
                version: "1.0.0".to_string(),
                name: "Content hash check".to_string(),
                description: "Verifies that the evidence content hashes to the expected SHA-256 digest".to_string(),
                author: "irrl".to_string(),
                evidence_schema: EvidenceSchema::new(vec![
                    FieldSpec::required("content", FieldKind::String),
                    FieldSpec::required("expectedHash", FieldKind::String),
                ]),
                output_schema: json!({
                    "computedHash": "string",
                    "matches": "boolean",
                }),
                domains: vec!["*".to_string()],
                deterministic: true,
                avg_verification_time_ms: 5,
            },
        }
    }
}

impl Default for ContentHashResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for ContentHashResolver {
    fn metadata(&self) -> &ResolverMetadata {
        &self.metadata
    }

    fn can_resolve(&self, _claim: &str, evidence: &Value) -> bool {
        self.validate_evidence(evidence).valid
    }

    async fn verify(&self, evidence: &Value) -> ServiceResult<ResolverOutcome> {
        let content = evidence["content"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("content must be a string".into()))?;
        let expected = evidence["expectedHash"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("expectedHash must be a string".into()))?;

        let computed = sha256_hex(content.as_bytes());
        let matches = computed == expected.trim_start_matches("sha256:");
        Ok(ResolverOutcome {
            verified: matches,
            output: json!({
                "computedHash": computed,
                "matches": matches,
            }),
        })
    }
}

/// Verifies URL ownership by fetching the page and looking for a challenge
/// token in the body.
pub struct UrlOwnershipResolver {
    metadata: ResolverMetadata,
    http: reqwest::Client,
}

impl UrlOwnershipResolver {
    pub fn new() -> Self {
        Self {
            metadata: ResolverMetadata {
                id: "url-ownership".to_string(),
                version: "1.0.0".to_string(),
                name: "URL ownership check".to_string(),
                description: "Fetches a URL and checks that the body contains the challenge token".to_string(),
                author: "irrl".to_string(),
                evidence_schema: EvidenceSchema::new(vec![
                    FieldSpec::required("url", FieldKind::String),
                    FieldSpec::required("token", FieldKind::String),
                ]),
                output_schema: json!({
                    "url": "string",
                    "status": "number",
                    "tokenFound": "boolean",
                }),
                domains: vec!["web".to_string(), "identity".to_string()],
                deterministic: false,
                avg_verification_time_ms: 1_500,
            },
            http: reqwest::Client::new(),
        }
    }
}

impl Default for UrlOwnershipResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for UrlOwnershipResolver {
    fn metadata(&self) -> &ResolverMetadata {
        &self.metadata
    }

    fn can_resolve(&self, _claim: &str, evidence: &Value) -> bool {
        evidence["url"]
            .as_str()
            .map(|u| u.starts_with("http://") || u.starts_with("https://"))
            .unwrap_or(false)
    }

    async fn verify(&self, evidence: &Value) -> ServiceResult<ResolverOutcome> {
        let url = evidence["url"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("url must be a string".into()))?;
        let token = evidence["token"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("token must be a string".into()))?;

        let response = self
            .http
            .get(url)
            .timeout(HTTP_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(format!("fetch failed: {}", e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Internal(format!("body read failed: {}", e)))?;

        let token_found = body.contains(token);
        Ok(ResolverOutcome {
            verified: status < 400 && token_found,
            output: json!({
                "url": url,
                "status": status,
                "tokenFound": token_found,
            }),
        })
    }
}

/// Verifies that a GitHub repository exists, optionally authenticated.
pub struct GithubRepoResolver {
    metadata: ResolverMetadata,
    http: reqwest::Client,
    token: Option<String>,
}

impl GithubRepoResolver {
    pub fn new(token: Option<String>) -> Self {
        Self {
            metadata: ResolverMetadata {
                id: "github-repo".to_string(),
                version: "1.0.0".to_string(),
                name: "GitHub repository check".to_string(),
                description: "Confirms a GitHub repository exists and reports its metadata".to_string(),
                author: "irrl".to_string(),
                evidence_schema: EvidenceSchema::new(vec![
                    FieldSpec::required("owner", FieldKind::String),
                    FieldSpec::required("repo", FieldKind::String),
                ]),
                output_schema: json!({
                    "fullName": "string",
                    "exists": "boolean",
                    "stars": "number",
                }),
                domains: vec!["software".to_string(), "opensource".to_string()],
                deterministic: false,
                avg_verification_time_ms: 2_000,
            },
            http: reqwest::Client::new(),
            token,
        }
    }
}

#[async_trait]
impl Resolver for GithubRepoResolver {
    fn metadata(&self) -> &ResolverMetadata {
        &self.metadata
    }

    fn can_resolve(&self, _claim: &str, evidence: &Value) -> bool {
        self.validate_evidence(evidence).valid
    }

    async fn verify(&self, evidence: &Value) -> ServiceResult<ResolverOutcome> {
        let owner = evidence["owner"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("owner must be a string".into()))?;
        let repo = evidence["repo"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("repo must be a string".into()))?;

        let mut request = self
            .http
            .get(format!("https://api.github.com/repos/{}/{}", owner, repo))
            .header("User-Agent", "irrl-resolver")
            .header("Accept", "application/vnd.github+json")
            .timeout(HTTP_FETCH_TIMEOUT);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Internal(format!("github request failed: {}", e)))?;
        let status = response.status().as_u16();

        if status == 404 {
            return Ok(ResolverOutcome {
                verified: false,
                output: json!({
                    "fullName": format!("{}/{}", owner, repo),
                    "exists": false,
                }),
            });
        }
        if status >= 400 {
            return Err(ServiceError::Internal(format!(
                "github returned status {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Internal(format!("github response decode failed: {}", e)))?;
        Ok(ResolverOutcome {
            verified: true,
            output: json!({
                "fullName": body["full_name"],
                "exists": true,
                "stars": body["stargazers_count"],
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_hash_accepts_matching_digest() {
        let resolver = ContentHashResolver::new();
        let digest = sha256_hex(b"hello world");
        let outcome = resolver
            .verify(&json!({"content": "hello world", "expectedHash": digest}))
            .await
            .unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.output["matches"], json!(true));
    }

    #[tokio::test]
    async fn test_content_hash_rejects_mismatch() {
        let resolver = ContentHashResolver::new();
        let outcome = resolver
            .verify(&json!({"content": "hello world", "expectedHash": "deadbeef"}))
            .await
            .unwrap();
        assert!(!outcome.verified);
    }

    #[tokio::test]
    async fn test_content_hash_accepts_prefixed_digest() {
        let resolver = ContentHashResolver::new();
        let digest = format!("sha256:{}", sha256_hex(b"payload"));
        let outcome = resolver
            .verify(&json!({"content": "payload", "expectedHash": digest}))
            .await
            .unwrap();
        assert!(outcome.verified);
    }

    #[test]
    fn test_url_resolver_scopes_to_http_urls() {
        let resolver = UrlOwnershipResolver::new();
        assert!(resolver.can_resolve("owns-site", &json!({"url": "https://example.com", "token": "t"})));
        assert!(!resolver.can_resolve("owns-site", &json!({"url": "ftp://example.com", "token": "t"})));
    }

    #[test]
    fn test_builtin_metadata_is_wellformed() {
        for metadata in [
            ContentHashResolver::new().metadata().clone(),
            UrlOwnershipResolver::new().metadata().clone(),
            GithubRepoResolver::new(None).metadata().clone(),
        ] {
            assert!(!metadata.id.is_empty());
            assert!(!metadata.evidence_schema.fields.is_empty());
            assert!(metadata.verification_timeout() >= Duration::from_secs(5));
        }
    }
}
