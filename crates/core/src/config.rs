use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CONVOLENS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub activity: ActivityThresholds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Batch refresh tuning: snapshot fetch concurrency, per-attempt timeout,
/// and how many extra attempts a candidate gets before it is skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
}

/// Conversation-count boundaries for the derived activity buckets.
/// These are business policy, so they live in configuration rather than
/// as constants in the evaluator: Low = [0, medium_min),
/// Medium = [medium_min, high_min), High = [high_min, very_high_min),
/// VeryHigh = [very_high_min, ∞).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ActivityThresholds {
    #[serde(default = "default_medium_min")]
    pub medium_min: u64,
    #[serde(default = "default_high_min")]
    pub high_min: u64,
    #[serde(default = "default_very_high_min")]
    pub very_high_min: u64,
}

// Default functions
fn default_node_id() -> String {
    "convolens-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_max_concurrent_fetches() -> usize {
    16
}
fn default_fetch_timeout_ms() -> u64 {
    5000
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_medium_min() -> u64 {
    10
}
fn default_high_min() -> u64 {
    50
}
fn default_very_high_min() -> u64 {
    200
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            fetch_retries: default_fetch_retries(),
        }
    }
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            medium_min: default_medium_min(),
            high_min: default_high_min(),
            very_high_min: default_very_high_min(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            refresh: RefreshConfig::default(),
            activity: ActivityThresholds::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CONVOLENS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
