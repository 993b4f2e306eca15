use anyhow::Result;
use axum::http::Method;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

use irrl::api::{
    create_attestation_router, create_proof_router, create_realm_router, create_resolver_router,
    create_system_router, create_trust_router, create_verification_router, AttestationApiState,
    ProofApiState, RealmApiState, ResolverApiState, SystemApiState, TrustApiState,
    VerificationApiState,
};
use irrl::attestation::AttestationManager;
use irrl::audit::AuditLog;
use irrl::config::AppConfig;
use irrl::crypto::signing::InstanceIdentity;
use irrl::proof::ProofService;
use irrl::realm::RealmStore;
use irrl::resolver::ResolverRegistry;
use irrl::storage::{MemoryRepository, PostgresRepository, Repository};
use irrl::trust::evaluation::EvaluationStore;
use irrl::trust::reputation::ReputationService;

/// Period of the attestation expiry scan.
const EXPIRY_SCAN_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?);

    init_logging(&config)?;
    info!(
        environment = %config.environment,
        audit_enabled = config.audit.enabled,
        "Starting IRRL reputation service"
    );

    // Storage backend: PostgreSQL when configured, in-memory otherwise.
    let repository: Arc<dyn Repository> = match &config.database.url {
        Some(url) => {
            let postgres = PostgresRepository::connect(url, config.database.pool_size).await?;
            postgres.init_schema().await?;
            Arc::new(postgres)
        }
        None => {
            warn!("Running with in-memory storage; state will not survive restarts");
            Arc::new(MemoryRepository::new())
        }
    };

    // Process-scoped singletons become explicit objects, built once here.
    let identity = Arc::new(InstanceIdentity::generate()?);
    info!(issuer = %identity.issuer(), "Instance signing identity generated");

    let audit = Arc::new(AuditLog::new(repository.clone(), config.audit.enabled));
    let registry = Arc::new(ResolverRegistry::new());
    registry.register_built_ins(&config.resolvers).await;

    let realms = Arc::new(RealmStore::new(repository.clone(), audit.clone()));
    let attestations = Arc::new(AttestationManager::new(
        repository.clone(),
        registry.clone(),
        audit.clone(),
        identity.clone(),
    ));
    let evaluations = Arc::new(EvaluationStore::new(
        repository.clone(),
        audit.clone(),
        identity.clone(),
    ));
    let reputation = Arc::new(ReputationService::new(repository.clone()));
    let proofs = Arc::new(ProofService::new(
        repository.clone(),
        identity.clone(),
        audit.clone(),
        Vec::new(),
    ));

    spawn_expiry_scan(attestations.clone());

    let app = Router::new()
        .nest(
            "/realms",
            create_realm_router(RealmApiState {
                realms: realms.clone(),
            }),
        )
        .nest(
            "/attestations",
            create_attestation_router(AttestationApiState {
                manager: attestations.clone(),
                repository: repository.clone(),
            }),
        )
        .nest(
            "/verify",
            create_verification_router(VerificationApiState {
                manager: attestations.clone(),
                repository: repository.clone(),
            }),
        )
        .nest(
            "/trust",
            create_trust_router(TrustApiState {
                evaluations: evaluations.clone(),
                reputation: reputation.clone(),
                repository: repository.clone(),
            }),
        )
        .nest(
            "/proofs",
            create_proof_router(ProofApiState {
                proofs: proofs.clone(),
            }),
        )
        .nest(
            "/resolvers",
            create_resolver_router(ResolverApiState {
                registry: registry.clone(),
            }),
        )
        .merge(create_system_router(SystemApiState {
            identity: identity.clone(),
            audit: audit.clone(),
        }))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;
    info!("IRRL server listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize tracing from the configured level.
fn init_logging(config: &AppConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;
    Ok(())
}

/// Build the CORS layer from configured origins.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    match &config.security.cors_origins {
        Some(origins) => {
            let parsed: Vec<_> = origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            layer.allow_origin(AllowOrigin::list(parsed))
        }
        None => layer.allow_origin(Any),
    }
}

/// Periodically derive `expired` status for attestations past `expiresAt`.
fn spawn_expiry_scan(manager: Arc<AttestationManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SCAN_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = manager.expire_scan().await {
                warn!(error = %e, "Attestation expiry scan failed");
            }
        }
    });
}
