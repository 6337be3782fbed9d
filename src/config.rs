use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the summary service.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Identifies this service instance in logs. Default: "performance_monitoring".
    #[serde(default = "default_publisher_id")]
    pub publisher_id: String,

    /// Metadata store connection configuration.
    #[serde(default)]
    pub etcd: EtcdConfig,

    /// Time-series store connection configuration.
    #[serde(default)]
    pub graphite: GraphiteConfig,

    /// Periodic aggregation configuration.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Metadata store (etcd v2 keys API) connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConfig {
    /// etcd HTTP endpoint (e.g., "http://localhost:2379").
    #[serde(default)]
    pub endpoint: String,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Basic auth username. Empty disables authentication.
    #[serde(default)]
    pub username: String,

    /// Basic auth password.
    #[serde(default)]
    pub password: String,
}

/// Time-series store (Graphite) connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphiteConfig {
    /// Graphite render API URL (e.g., "http://localhost:10080/render").
    #[serde(default)]
    pub render_url: String,

    /// Carbon plaintext listener address as host:port.
    #[serde(default)]
    pub carbon_addr: String,

    /// Prefix prepended to every series name. Default: "tendrl".
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Request timeout for render queries and carbon pushes. Default: 10s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Render window used for "latest" queries. Default: "-2min".
    #[serde(default = "default_latest_window")]
    pub latest_window: String,
}

/// Periodic aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Node summary cycle interval. Default: 60s.
    #[serde(default = "default_summary_interval", with = "humantime_serde")]
    pub node_summary_interval: Duration,

    /// Pause between two nodes within a cycle. Default: 100ms.
    #[serde(default = "default_node_yield", with = "humantime_serde")]
    pub node_yield: Duration,

    /// Cluster/system summary cycle interval. Default: 60s.
    #[serde(default = "default_summary_interval", with = "humantime_serde")]
    pub cluster_summary_interval: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_publisher_id() -> String {
    "performance_monitoring".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_prefix() -> String {
    "tendrl".to_string()
}

fn default_latest_window() -> String {
    "-2min".to_string()
}

fn default_summary_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_node_yield() -> Duration {
    Duration::from_millis(100)
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            publisher_id: default_publisher_id(),
            etcd: EtcdConfig::default(),
            graphite: GraphiteConfig::default(),
            aggregator: AggregatorConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_request_timeout(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            render_url: String::new(),
            carbon_addr: String::new(),
            prefix: default_prefix(),
            timeout: default_request_timeout(),
            latest_window: default_latest_window(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            node_summary_interval: default_summary_interval(),
            node_yield: default_node_yield(),
            cluster_summary_interval: default_summary_interval(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()
            .with_context(|| format!("validating config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.publisher_id.is_empty() {
            bail!("publisher_id must not be empty");
        }

        if self.etcd.endpoint.is_empty() {
            bail!("etcd.endpoint is required");
        }

        if self.graphite.render_url.is_empty() {
            bail!("graphite.render_url is required");
        }

        if self.graphite.carbon_addr.is_empty() {
            bail!("graphite.carbon_addr is required");
        }

        match self.graphite.carbon_addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => bail!(
                "graphite.carbon_addr must be host:port, got {}",
                self.graphite.carbon_addr
            ),
        }

        if self.graphite.latest_window.is_empty() {
            bail!("graphite.latest_window must not be empty");
        }

        let agg = &self.aggregator;
        if agg.node_summary_interval.is_zero() {
            bail!("aggregator.node_summary_interval must be positive");
        }

        if agg.cluster_summary_interval.is_zero() {
            bail!("aggregator.cluster_summary_interval must be positive");
        }

        if agg.node_yield >= agg.node_summary_interval {
            bail!(
                "aggregator.node_yield {:?} must be smaller than node_summary_interval {:?}",
                agg.node_yield,
                agg.node_summary_interval
            );
        }

        Ok(())
    }
}
