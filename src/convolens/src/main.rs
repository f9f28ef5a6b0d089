//! ConvoLens — user-segmentation service for LLM-conversation analytics.
//!
//! Main entry point that wires the stores, registry, and API server.

use clap::Parser;
use convolens_api::ApiServer;
use convolens_cohorts::{
    CohortRegistry, CohortType, CreateCohort, CriteriaEvaluator, CriteriaNode,
    InMemoryMembershipStore, InMemoryMetricStore,
};
use convolens_core::config::AppConfig;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "convolens")]
#[command(about = "Cohort engine for LLM-conversation analytics")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CONVOLENS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CONVOLENS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Seed demo users and a demo cohort on startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convolens=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("ConvoLens starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        max_concurrent_fetches = config.refresh.max_concurrent_fetches,
        "Configuration loaded"
    );

    // Wire the in-memory stores and the registry
    let metric_store = Arc::new(InMemoryMetricStore::new());
    let membership_store = Arc::new(InMemoryMembershipStore::new());
    let evaluator = CriteriaEvaluator::new(config.activity);
    let registry = Arc::new(CohortRegistry::new(
        metric_store.clone(),
        membership_store,
        evaluator,
        config.refresh.clone(),
    ));

    if cli.seed_demo {
        seed_demo(&metric_store, &registry).await;
    }

    // Start metrics exporter
    let api_server = ApiServer::new(config.clone(), registry);
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("ConvoLens is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}

/// Seed demo users and one dynamic cohort, then run an initial refresh so
/// the API has data to show.
async fn seed_demo(metric_store: &InMemoryMetricStore, registry: &CohortRegistry) {
    metric_store.seed_demo_users();

    let criteria: CriteriaNode = match serde_json::from_value(serde_json::json!({
        "type": "or",
        "children": [
            {"type": "subscription_plan", "in": ["pro", "enterprise"]},
            {"type": "total_conversations", "gt": 50}
        ]
    })) {
        Ok(criteria) => criteria,
        Err(e) => {
            error!(error = %e, "Failed to build demo criteria");
            return;
        }
    };

    let created = registry.create(CreateCohort {
        name: "engaged users".to_string(),
        description: Some("paid plan or more than 50 conversations".to_string()),
        cohort_type: CohortType::Dynamic,
        criteria: Some(criteria),
        tags: vec!["demo".to_string()],
    });

    match created {
        Ok(cohort) => match registry.refresh_cohort(cohort.id, None).await {
            Ok(outcome) => info!(
                cohort_id = %cohort.id,
                matched = outcome.matched,
                "Demo cohort seeded and refreshed"
            ),
            Err(e) => error!(error = %e, "Demo cohort refresh failed"),
        },
        Err(e) => error!(error = %e, "Failed to create demo cohort"),
    }
}
