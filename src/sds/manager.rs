use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use super::{PluginRegistry, SdsPlugin};
use crate::context::ServiceContext;
use crate::store::central::ClusterDetails;
use crate::summary::{ClusterSummary, SystemSummary};

/// Routes cluster work to the plugin owning each cluster and fans system
/// aggregation out to every plugin.
pub struct SdsMonitoringManager {
    ctx: ServiceContext,
    registry: PluginRegistry,
}

impl SdsMonitoringManager {
    pub fn new(ctx: ServiceContext, registry: PluginRegistry) -> Self {
        ctx.with_health(|h| h.plugins_registered.set(registry.len() as f64));
        info!(plugins = ?registry.names(), "sds plugins registered");

        Self { ctx, registry }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Configure monitoring for a cluster through the plugin its context
    /// declares. Returns the name of the plugin that configured it.
    ///
    /// Never fails: a context not published yet is skipped silently, every
    /// other problem is logged and the cluster is left unconfigured.
    pub async fn configure_monitoring(&self, integration_id: &str) -> Option<&'static str> {
        let mut context = match self.ctx.central.cluster_context(integration_id).await {
            Ok(context) => context,
            Err(e) if e.is_not_found() => {
                debug!(integration_id, "cluster context not published yet");
                return None;
            }
            Err(e) => {
                error!(integration_id, error = %e, "reading cluster context");
                return None;
            }
        };

        // The context record may omit its own id.
        if context.integration_id.is_empty() {
            context.integration_id = integration_id.to_string();
        }

        let Some(plugin) = self.registry.get(&context.sds_name) else {
            error!(
                integration_id,
                sds_name = %context.sds_name,
                "no plugin registered for cluster backend",
            );
            self.ctx.with_health(|h| h.plugin_dispatch_misses.inc());
            return None;
        };

        if let Err(e) = plugin.configure_monitoring(&context).await {
            error!(
                integration_id,
                sds_name = plugin.name(),
                error = %format!("{e:#}"),
                "configuring cluster monitoring",
            );
            return None;
        }

        Some(plugin.name())
    }

    /// Summary of one cluster from its owning plugin. `None` when the
    /// cluster declares no backend or one without a plugin.
    pub async fn get_cluster_summary(
        &self,
        cluster_id: &str,
        details: &ClusterDetails,
    ) -> Result<Option<ClusterSummary>> {
        let Some(sds_name) = details.sds_name() else {
            debug!(cluster_id, "cluster has no context yet");
            return Ok(None);
        };

        let Some(plugin) = self.registry.get(sds_name) else {
            self.ctx.with_health(|h| h.plugin_dispatch_misses.inc());
            return Ok(None);
        };

        plugin
            .get_cluster_summary(cluster_id, details)
            .await
            .with_context(|| format!("{sds_name} summary of cluster {cluster_id}"))
            .map(Some)
    }

    /// Give every plugin all cluster summaries and clusters; each keeps
    /// its own. Plugin failures are logged and leave that backend out.
    pub async fn compute_system_summary(
        &self,
        summaries: &[ClusterSummary],
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> Vec<SystemSummary> {
        let mut systems = Vec::with_capacity(self.registry.len());

        for plugin in self.registry.iter() {
            match plugin.compute_system_summary(summaries, clusters).await {
                Ok(system) => systems.push(system),
                Err(e) => error!(
                    sds_name = plugin.name(),
                    error = %format!("{e:#}"),
                    "computing system summary",
                ),
            }
        }

        systems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::health::HealthMetrics;
    use crate::store::memory::MemoryStore;
    use crate::store::MetadataStore;
    use crate::tsdb::memory::MemoryTimeSeries;
    use crate::tsdb::TimeSeriesDb;
    use std::sync::Arc;

    fn manager() -> (MemoryStore, Arc<HealthMetrics>, SdsMonitoringManager) {
        let mem = MemoryStore::new();
        let health = Arc::new(HealthMetrics::new("127.0.0.1:0").expect("metrics"));
        let ctx = ServiceContext::new(
            MetadataStore::Memory(mem.clone()),
            TimeSeriesDb::Memory(MemoryTimeSeries::new()),
            "test",
            Some(Arc::clone(&health)),
        );
        let registry = PluginRegistry::discover(&ctx).expect("registry");
        (mem, health, SdsMonitoringManager::new(ctx, registry))
    }

    #[tokio::test]
    async fn test_configure_dispatches_by_declared_backend() {
        let (mem, health, manager) = manager();
        mem.insert("clusters/c1/TendrlContext/sds_name", "gluster");
        mem.insert("clusters/c1/TendrlContext/integration_id", "c1");

        assert_eq!(manager.configure_monitoring("c1").await, Some("gluster"));
        assert!(mem.value("monitoring/clusters/c1/collectors").is_some());
        assert_eq!(health.plugins_registered.get(), 2.0);
    }

    #[tokio::test]
    async fn test_configure_fills_missing_context_id() {
        let (mem, _, manager) = manager();
        mem.insert("clusters/c1/TendrlContext/sds_name", "gluster");

        assert_eq!(manager.configure_monitoring("c1").await, Some("gluster"));
        assert!(mem.value("monitoring/clusters/c1/collectors").is_some());
        assert!(mem.value("monitoring/clusters//collectors").is_none());
    }

    #[tokio::test]
    async fn test_configure_unknown_backend_is_skipped() {
        let (mem, health, manager) = manager();
        mem.insert("clusters/c1/TendrlContext/sds_name", "unknown");

        assert_eq!(manager.configure_monitoring("c1").await, None);
        assert_eq!(health.plugin_dispatch_misses.get(), 1.0);
        assert!(mem.value("monitoring/clusters/c1/collectors").is_none());
    }

    #[tokio::test]
    async fn test_configure_missing_context_is_silent() {
        let (_, health, manager) = manager();
        assert_eq!(manager.configure_monitoring("c1").await, None);
        assert_eq!(health.plugin_dispatch_misses.get(), 0.0);
    }

    #[tokio::test]
    async fn test_configure_store_failure_is_swallowed() {
        let (mem, _, manager) = manager();
        mem.insert("clusters/c1/TendrlContext/sds_name", "ceph");
        mem.fail_prefix("clusters/c1");
        assert_eq!(manager.configure_monitoring("c1").await, None);
    }

    #[tokio::test]
    async fn test_cluster_summary_without_context_is_none() {
        let (_, _, manager) = manager();
        let details = ClusterDetails::from_tree("c1", serde_json::json!({})).expect("details");
        assert!(manager
            .get_cluster_summary("c1", &details)
            .await
            .expect("ok")
            .is_none());
    }

    #[tokio::test]
    async fn test_system_summary_per_backend() {
        let (_, _, manager) = manager();
        let systems = manager
            .compute_system_summary(&[], &BTreeMap::new())
            .await;
        let names: Vec<_> = systems.iter().map(|s| s.sds_type.as_str()).collect();
        assert_eq!(names, vec!["ceph", "gluster"]);
    }
}
