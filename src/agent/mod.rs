use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::cluster::ClusterSummarise;
use crate::aggregator::NodeSummarise;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::export::health::HealthMetrics;
use crate::sds::manager::SdsMonitoringManager;
use crate::sds::PluginRegistry;
use crate::store::etcd::EtcdClient;
use crate::store::MetadataStore;
use crate::tsdb::graphite::GraphiteClient;
use crate::tsdb::TimeSeriesDb;

/// Agent wires the stores, plugins and periodic summary tasks together.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    node_task: Option<Arc<NodeSummarise>>,
    cluster_task: Option<Arc<ClusterSummarise>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            node_task: None,
            cluster_task: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Connect the stores and start both summary tasks.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Health server first so probes respond during startup.
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        // 2. External clients.
        let store = MetadataStore::Etcd(
            EtcdClient::new(&self.cfg.etcd).context("creating metadata store client")?,
        );
        let tsdb = TimeSeriesDb::Graphite(
            GraphiteClient::new(&self.cfg.graphite).context("creating time-series client")?,
        );
        info!(
            metadata_store = store.name(),
            time_series = tsdb.name(),
            etcd = %self.cfg.etcd.endpoint,
            graphite = %self.cfg.graphite.render_url,
            "stores configured",
        );

        let ctx = ServiceContext::new(
            store,
            tsdb,
            self.cfg.publisher_id.clone(),
            Some(Arc::clone(&self.health)),
        );

        // 3. Backend plugins.
        let registry = PluginRegistry::discover(&ctx).context("registering sds plugins")?;
        let manager = SdsMonitoringManager::new(ctx.clone(), registry);

        // 4. Periodic tasks.
        let node_task = Arc::new(NodeSummarise::new(ctx.clone(), &self.cfg.aggregator));
        node_task.start(self.cancel.child_token()).await;
        self.node_task = Some(node_task);

        let cluster_task = Arc::new(ClusterSummarise::new(ctx, manager, &self.cfg.aggregator));
        cluster_task.start(self.cancel.child_token()).await;
        self.cluster_task = Some(cluster_task);

        info!(publisher = %self.cfg.publisher_id, "summary service started");

        Ok(())
    }

    /// Cancel the periodic tasks, wait for in-flight cycles to finish, then
    /// stop the health server.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = &self.node_task {
            task.wait_for_shutdown().await;
        }
        if let Some(task) = &self.cluster_task {
            task.wait_for_shutdown().await;
        }

        self.health.stop().await?;

        Ok(())
    }
}
