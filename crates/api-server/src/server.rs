//! API server — HTTP surface plus the Prometheus metrics exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use convolens_cohorts::CohortRegistry;
use convolens_core::config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    registry: Arc<CohortRegistry>,
}

impl ApiServer {
    pub fn new(config: AppConfig, registry: Arc<CohortRegistry>) -> Self {
        Self { config, registry }
    }

    /// Start the HTTP REST server. Blocks until shutdown.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            registry: self.registry.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        let app = Router::new()
            // Cohort management
            .route(
                "/v1/cohorts",
                post(rest::create_cohort).get(rest::list_cohorts),
            )
            .route("/v1/cohorts/preview", post(rest::preview_criteria))
            .route(
                "/v1/cohorts/:id",
                get(rest::get_cohort).delete(rest::delete_cohort),
            )
            .route("/v1/cohorts/:id/refresh", post(rest::refresh_cohort))
            .route("/v1/cohorts/:id/refreshes", get(rest::refresh_history))
            .route("/v1/cohorts/:id/members", get(rest::cohort_members))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
