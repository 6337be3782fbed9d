use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "summaryd";

/// Prometheus metrics for service health and observability.
///
/// All metrics use the "summaryd" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    // === Node summaries ===
    /// Total node summary cycles run.
    pub node_cycles: Counter,
    /// Total node summaries persisted.
    pub node_summaries_written: Counter,
    /// Node summaries skipped by reason (snapshot_load, metadata, save).
    pub node_summaries_skipped: CounterVec,
    /// Latest-stat fetch failures by resource.
    pub metric_fetch_failures: CounterVec,
    /// Duration of a full node summary cycle.
    pub node_cycle_duration: Histogram,
    /// Nodes enumerated in the most recent cycle.
    pub nodes_seen: Gauge,

    // === Cluster / system summaries ===
    /// Total cluster summaries persisted.
    pub cluster_summaries_written: Counter,
    /// System summaries computed by backend.
    pub system_summaries_computed: CounterVec,
    /// Dispatches that found no plugin for the declared backend.
    pub plugin_dispatch_misses: Counter,
    /// Number of registered backend plugins.
    pub plugins_registered: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let node_cycles = Counter::with_opts(
            Opts::new("node_cycles_total", "Total node summary cycles run.").namespace(NAMESPACE),
        )?;
        let node_summaries_written = Counter::with_opts(
            Opts::new(
                "node_summaries_written_total",
                "Total node summaries persisted.",
            )
            .namespace(NAMESPACE),
        )?;
        let node_summaries_skipped = CounterVec::new(
            Opts::new(
                "node_summaries_skipped_total",
                "Total node summaries skipped by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let metric_fetch_failures = CounterVec::new(
            Opts::new(
                "metric_fetch_failures_total",
                "Total latest-stat fetch failures by resource.",
            )
            .namespace(NAMESPACE),
            &["resource"],
        )?;
        let node_cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "node_cycle_duration_seconds",
                "Duration of a full node summary cycle.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        let nodes_seen = Gauge::with_opts(
            Opts::new("nodes_seen", "Nodes enumerated in the most recent cycle.")
                .namespace(NAMESPACE),
        )?;

        let cluster_summaries_written = Counter::with_opts(
            Opts::new(
                "cluster_summaries_written_total",
                "Total cluster summaries persisted.",
            )
            .namespace(NAMESPACE),
        )?;
        let system_summaries_computed = CounterVec::new(
            Opts::new(
                "system_summaries_computed_total",
                "Total system summaries computed by backend.",
            )
            .namespace(NAMESPACE),
            &["sds_name"],
        )?;
        let plugin_dispatch_misses = Counter::with_opts(
            Opts::new(
                "plugin_dispatch_misses_total",
                "Total dispatches that found no plugin for the declared backend.",
            )
            .namespace(NAMESPACE),
        )?;
        let plugins_registered = Gauge::with_opts(
            Opts::new("plugins_registered", "Number of registered backend plugins.")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(node_cycles.clone()))?;
        registry.register(Box::new(node_summaries_written.clone()))?;
        registry.register(Box::new(node_summaries_skipped.clone()))?;
        registry.register(Box::new(metric_fetch_failures.clone()))?;
        registry.register(Box::new(node_cycle_duration.clone()))?;
        registry.register(Box::new(nodes_seen.clone()))?;
        registry.register(Box::new(cluster_summaries_written.clone()))?;
        registry.register(Box::new(system_summaries_computed.clone()))?;
        registry.register(Box::new(plugin_dispatch_misses.clone()))?;
        registry.register(Box::new(plugins_registered.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            node_cycles,
            node_summaries_written,
            node_summaries_skipped,
            metric_fetch_failures,
            node_cycle_duration,
            nodes_seen,
            cluster_summaries_written,
            system_summaries_computed,
            plugin_dispatch_misses,
            plugins_registered,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;
        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }

    /// Renders all registered metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode_registry(&self.registry)
    }
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
