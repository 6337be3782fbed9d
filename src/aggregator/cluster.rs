//! Periodic cluster and system summary computation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AggregatorConfig;
use crate::context::ServiceContext;
use crate::sds::manager::SdsMonitoringManager;
use crate::store::central::ClusterDetails;
use crate::summary::ClusterSummary;

/// Outcome of one cluster summary cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClusterCycleReport {
    pub clusters: usize,
    /// Clusters whose monitoring was configured during this cycle.
    pub configured: usize,
    pub written: usize,
    pub failed: usize,
    /// Failed clusters represented by their last known summary instead.
    pub stale: usize,
    /// System summaries computed, one per backend at most.
    pub systems: usize,
    /// System summaries were left as they were because a cluster had
    /// neither a fresh nor a previous summary.
    pub systems_skipped: bool,
    pub cancelled: bool,
}

/// Periodic cluster summary task.
pub struct ClusterSummarise {
    ctx: ServiceContext,
    manager: SdsMonitoringManager,
    interval: Duration,
    configured: tokio::sync::Mutex<HashSet<String>>,
    /// Last details read per cluster, used when a read fails.
    last_details: tokio::sync::Mutex<HashMap<String, ClusterDetails>>,
    run_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClusterSummarise {
    pub fn new(ctx: ServiceContext, manager: SdsMonitoringManager, cfg: &AggregatorConfig) -> Self {
        Self {
            ctx,
            manager,
            interval: cfg.cluster_summary_interval,
            configured: tokio::sync::Mutex::new(HashSet::new()),
            last_details: tokio::sync::Mutex::new(HashMap::new()),
            run_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the periodic loop; first cycle runs immediately.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);

        info!(interval = ?this.interval, "cluster summary task started");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("cluster summary task stopped");
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

    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "cluster summary task join failed");
            }
        }
    }

    /// Configure new clusters, summarise every cluster, then recompute the
    /// system summaries from this cycle's cluster summaries.
    ///
    /// A cluster that fails this cycle is represented by its last persisted
    /// summary and last read details. When either is missing the system
    /// summaries are not recomputed, so they stay stale rather than partial.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> ClusterCycleReport {
        let started = Instant::now();
        let mut report = ClusterCycleReport::default();

        let cluster_ids = match self.ctx.central.cluster_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "listing clusters for summary cycle");
                return report;
            }
        };
        report.clusters = cluster_ids.len();
        self.forget_removed(&cluster_ids).await;

        let mut clusters = BTreeMap::new();
        let mut summaries = Vec::with_capacity(cluster_ids.len());

        for cluster_id in &cluster_ids {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return report;
            }

            if self.ensure_configured(cluster_id).await {
                report.configured += 1;
            }

            match self.summarise_cluster(cluster_id, &mut report).await {
                Some((details, summary)) => {
                    summaries.extend(summary);
                    clusters.insert(cluster_id.clone(), details);
                }
                None => report.systems_skipped = true,
            }
        }

        if report.systems_skipped {
            warn!(
                failed = report.failed,
                "cluster summaries incomplete, keeping previous system summaries",
            );
        } else {
            report.systems = self
                .manager
                .compute_system_summary(&summaries, &clusters)
                .await
                .len();
        }

        debug!(
            clusters = report.clusters,
            configured = report.configured,
            written = report.written,
            failed = report.failed,
            stale = report.stale,
            systems = report.systems,
            elapsed = ?started.elapsed(),
            "cluster summary cycle finished",
        );

        report
    }

    /// Details and summary of one cluster for the system aggregation.
    /// `None` when the cluster failed and has nothing to fall back on.
    async fn summarise_cluster(
        &self,
        cluster_id: &str,
        report: &mut ClusterCycleReport,
    ) -> Option<(ClusterDetails, Option<ClusterSummary>)> {
        let details = match self.ctx.central.cluster_details(cluster_id).await {
            Ok(details) => {
                self.last_details
                    .lock()
                    .await
                    .insert(cluster_id.to_string(), details.clone());
                details
            }
            Err(e) => {
                report.failed += 1;
                error!(cluster_id, error = %e, "reading cluster details");
                let details = self.last_details.lock().await.get(cluster_id).cloned()?;
                let summary = self.previous_summary(cluster_id).await?;
                report.stale += 1;
                return Some((details, Some(summary)));
            }
        };

        match self.manager.get_cluster_summary(cluster_id, &details).await {
            Ok(Some(summary)) => {
                match self.ctx.summaries.save_cluster(&summary).await {
                    Ok(()) => {
                        report.written += 1;
                        self.ctx.with_health(|h| h.cluster_summaries_written.inc());
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(cluster_id, error = %e, "saving cluster summary");
                    }
                }
                Some((details, Some(summary)))
            }
            Ok(None) => Some((details, None)),
            Err(e) => {
                report.failed += 1;
                error!(cluster_id, error = %format!("{e:#}"), "computing cluster summary");
                let summary = self.previous_summary(cluster_id).await?;
                report.stale += 1;
                Some((details, Some(summary)))
            }
        }
    }

    async fn previous_summary(&self, cluster_id: &str) -> Option<ClusterSummary> {
        match self.ctx.summaries.load_cluster(cluster_id).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                debug!(cluster_id, error = %e, "no previous cluster summary to fall back on");
                None
            }
        }
    }

    /// Drop per-cluster state of clusters no longer listed.
    async fn forget_removed(&self, cluster_ids: &[String]) {
        let listed: HashSet<&str> = cluster_ids.iter().map(String::as_str).collect();
        self.configured
            .lock()
            .await
            .retain(|id| listed.contains(id.as_str()));
        self.last_details
            .lock()
            .await
            .retain(|id, _| listed.contains(id.as_str()));
    }

    /// Configure monitoring once per cluster per process. Returns whether
    /// the cluster got configured by this call.
    async fn ensure_configured(&self, cluster_id: &str) -> bool {
        if self.configured.lock().await.contains(cluster_id) {
            return false;
        }

        if self.manager.configure_monitoring(cluster_id).await.is_none() {
            return false;
        }

        self.configured.lock().await.insert(cluster_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sds::PluginRegistry;
    use crate::store::memory::MemoryStore;
    use crate::store::MetadataStore;
    use crate::tsdb::memory::MemoryTimeSeries;
    use crate::tsdb::TimeSeriesDb;

    fn task() -> (MemoryStore, MemoryTimeSeries, ClusterSummarise) {
        let mem = MemoryStore::new();
        let ts = MemoryTimeSeries::new();
        let ctx = ServiceContext::new(
            MetadataStore::Memory(mem.clone()),
            TimeSeriesDb::Memory(ts.clone()),
            "test",
            None,
        );
        let registry = PluginRegistry::discover(&ctx).expect("registry");
        let manager = SdsMonitoringManager::new(ctx.clone(), registry);
        let task = ClusterSummarise::new(ctx, manager, &AggregatorConfig::default());
        (mem, ts, task)
    }

    fn seed_gluster(mem: &MemoryStore, id: &str, used: &str, usable: &str) {
        mem.insert(&format!("clusters/{id}/TendrlContext/sds_name"), "gluster");
        mem.insert(&format!("clusters/{id}/TendrlContext/integration_id"), id);
        mem.insert(&format!("clusters/{id}/GlobalDetails/status"), "healthy");
        mem.insert(&format!("clusters/{id}/Volumes/v1/used_capacity"), used);
        mem.insert(&format!("clusters/{id}/Volumes/v1/usable_capacity"), usable);
    }

    #[tokio::test]
    async fn test_cycle_summarises_clusters_and_system() {
        let (mem, ts, task) = task();
        seed_gluster(&mem, "c1", "10", "100");
        seed_gluster(&mem, "c2", "30", "100");

        let report = task.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.clusters, 2);
        assert_eq!(report.configured, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.systems, 2);

        let c1 = task.ctx.summaries.load_cluster("c1").await.expect("saved");
        assert_eq!(c1.sds_type, "gluster");

        let system = task.ctx.summaries.load_system("gluster").await.expect("saved");
        assert_eq!(system.utilization.used, 40.0);
        assert_eq!(system.utilization.total, 200.0);
        assert_eq!(system.utilization.percent_used, 20.0);
        assert_eq!(ts.last_pushed("gluster.system_utilization.percent_used"), Some(20.0));
    }

    #[tokio::test]
    async fn test_clusters_configured_once() {
        let (mem, _, task) = task();
        seed_gluster(&mem, "c1", "10", "100");

        let first = task.run_cycle(&CancellationToken::new()).await;
        let second = task.run_cycle(&CancellationToken::new()).await;
        assert_eq!(first.configured, 1);
        assert_eq!(second.configured, 0);
        assert_eq!(second.written, 1);
    }

    #[tokio::test]
    async fn test_failing_cluster_does_not_abort_cycle() {
        let (mem, _, task) = task();
        seed_gluster(&mem, "c1", "10", "100");
        seed_gluster(&mem, "c2", "30", "100");
        mem.fail_prefix("clusters/c2");

        let report = task.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert!(report.systems_skipped);
        assert!(task.ctx.summaries.load_cluster("c2").await.is_err());
        assert!(task.ctx.summaries.load_system("gluster").await.is_err());
    }

    #[tokio::test]
    async fn test_transient_cluster_failure_keeps_system_whole() {
        let (mem, _, task) = task();
        seed_gluster(&mem, "c1", "10", "100");
        seed_gluster(&mem, "c2", "30", "100");

        task.run_cycle(&CancellationToken::new()).await;
        mem.fail_prefix("clusters/c2");
        let report = task.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.stale, 1);
        assert!(!report.systems_skipped);

        let system = task.ctx.summaries.load_system("gluster").await.expect("saved");
        assert_eq!(system.utilization.used, 40.0);
        assert_eq!(system.utilization.total, 200.0);
        assert_eq!(system.cluster_count.get("total"), Some(&2));
        assert_eq!(system.cluster_count.get("healthy"), Some(&2));
    }

    #[tokio::test]
    async fn test_removed_clusters_are_forgotten() {
        let (mem, _, task) = task();
        seed_gluster(&mem, "c1", "10", "100");
        seed_gluster(&mem, "c2", "30", "100");
        task.run_cycle(&CancellationToken::new()).await;
        assert_eq!(task.configured.lock().await.len(), 2);

        mem.remove("clusters/c1");
        let report = task.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.clusters, 1);

        let configured = task.configured.lock().await;
        assert!(!configured.contains("c1"));
        assert!(configured.contains("c2"));
        assert!(!task.last_details.lock().await.contains_key("c1"));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_stops_before_clusters() {
        let (mem, _, task) = task();
        seed_gluster(&mem, "c1", "10", "100");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = task.run_cycle(&cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.written, 0);
    }
}
