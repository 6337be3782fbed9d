//! Periodic node summary computation.
//!
//! Every cycle enumerates the known nodes and, one node at a time, derives
//! a fresh [`NodeSummary`] from raw metrics and metadata. Usage records that
//! cannot be computed this cycle fall back to the last persisted summary,
//! so a stored summary is at most one cycle stale per field.

pub mod cluster;
pub mod metrics;
pub mod status;
pub mod utilization;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::metrics::MetricsAccessor;
use self::status::HeartbeatError;
use crate::config::AggregatorConfig;
use crate::context::ServiceContext;
use crate::store::StoreError;
use crate::summary::NodeSummary;

/// Why a node was skipped in a cycle. Nothing is persisted for it.
#[derive(Error, Debug)]
pub enum NodeSummaryError {
    #[error("loading previous summary: {0}")]
    SnapshotLoad(#[source] StoreError),

    #[error("reading node metadata: {0}")]
    Metadata(#[source] StoreError),

    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    #[error("saving summary: {0}")]
    Save(#[source] StoreError),
}

impl NodeSummaryError {
    /// Label used in the skipped-summaries metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SnapshotLoad(_) => "snapshot_load",
            Self::Metadata(_) | Self::Heartbeat(_) => "metadata",
            Self::Save(_) => "save",
        }
    }
}

/// Outcome of one node summary cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub nodes: usize,
    pub written: usize,
    pub skipped: usize,
    /// The cycle stopped early on cancellation.
    pub cancelled: bool,
}

/// Periodic node summary task.
pub struct NodeSummarise {
    ctx: ServiceContext,
    metrics: MetricsAccessor,
    interval: Duration,
    node_yield: Duration,
    run_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NodeSummarise {
    pub fn new(ctx: ServiceContext, cfg: &AggregatorConfig) -> Self {
        Self {
            metrics: MetricsAccessor::new(ctx.clone()),
            ctx,
            interval: cfg.node_summary_interval,
            node_yield: cfg.node_yield,
            run_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the periodic loop. A cycle runs immediately, then once per
    /// interval until `cancel` fires.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);

        info!(
            interval = ?this.interval,
            node_yield = ?this.node_yield,
            "node summary task started",
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("node summary task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        this.run_cycle(&cancel).await;
                    }
                }
            }
        });

        *self.run_task.lock().await = Some(handle);
    }

    /// Waits for the periodic loop to finish after cancellation.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "node summary task join failed");
            }
        }
    }

    /// Summarise every known node once. Cancellation is honoured between
    /// nodes only.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let node_ids = match self.ctx.central.node_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "listing nodes for summary cycle");
                return report;
            }
        };
        report.nodes = node_ids.len();

        for (i, node_id) in node_ids.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if i > 0 && !self.node_yield.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.node_yield) => {}
                }
            }

            match self.summarise_node(node_id).await {
                Ok(_) => {
                    report.written += 1;
                    self.ctx.with_health(|h| h.node_summaries_written.inc());
                }
                Err(e) => {
                    report.skipped += 1;
                    self.ctx.with_health(|h| {
                        h.node_summaries_skipped
                            .with_label_values(&[e.reason()])
                            .inc();
                    });
                    match e {
                        NodeSummaryError::SnapshotLoad(_) => debug!(
                            node_id = %node_id,
                            publisher = %self.ctx.publisher_id,
                            error = %e,
                            "failed to fetch previously computed summary",
                        ),
                        _ => error!(
                            node_id = %node_id,
                            publisher = %self.ctx.publisher_id,
                            error = %e,
                            "skipping node summary",
                        ),
                    }
                }
            }
        }

        self.ctx.with_health(|h| {
            h.node_cycles.inc();
            h.nodes_seen.set(report.nodes as f64);
            h.node_cycle_duration
                .observe(started.elapsed().as_secs_f64());
        });

        debug!(
            nodes = report.nodes,
            written = report.written,
            skipped = report.skipped,
            cancelled = report.cancelled,
            elapsed = ?started.elapsed(),
            "node summary cycle finished",
        );

        report
    }

    /// Compute, merge and persist the summary of one node.
    pub async fn summarise_node(&self, node_id: &str) -> Result<NodeSummary, NodeSummaryError> {
        let now = Utc::now();

        let cpu_usage = utilization::fetch_cpu_usage(&self.metrics, node_id, now).await;
        let memory_usage = utilization::fetch_memory_usage(&self.metrics, node_id, now).await;
        let storage_usage = utilization::fetch_storage_usage(&self.metrics, node_id, now).await;
        let alert_count = self.alert_count(node_id).await;

        let baseline = self
            .ctx
            .summaries
            .node_baseline(node_id)
            .await
            .map_err(NodeSummaryError::SnapshotLoad)?;

        let central = &self.ctx.central;
        let name = central
            .node_name(node_id)
            .await
            .map_err(NodeSummaryError::Metadata)?;
        let last_seen = central
            .node_last_seen(node_id)
            .await
            .map_err(NodeSummaryError::Metadata)?;
        let status = status::node_status(last_seen.as_deref(), now)?;
        let role = central
            .node_role(node_id)
            .await
            .map_err(NodeSummaryError::Metadata)?;
        let cluster_name = central
            .node_cluster_name(node_id)
            .await
            .map_err(NodeSummaryError::Metadata)?;

        let summary = NodeSummary {
            node_id: node_id.to_string(),
            name,
            status,
            role,
            cluster_name,
            cpu_usage: cpu_usage.unwrap_or(baseline.cpu_usage),
            memory_usage: memory_usage.unwrap_or(baseline.memory_usage),
            storage_usage: storage_usage.unwrap_or(baseline.storage_usage),
            alert_count,
        };

        self.ctx
            .summaries
            .save_node(&summary)
            .await
            .map_err(NodeSummaryError::Save)?;

        Ok(summary)
    }

    /// Number of open alerts. A failed lookup counts as zero rather than
    /// falling back to the previous summary.
    async fn alert_count(&self, node_id: &str) -> u64 {
        match self.ctx.central.node_alert_ids(node_id).await {
            Ok(ids) => ids.len() as u64,
            Err(e) => {
                debug!(node_id, error = %e, "alert lookup failed, counting zero alerts");
                0
            }
        }
    }
}
