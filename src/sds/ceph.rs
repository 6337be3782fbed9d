//! Ceph backend.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use serde_json::Value;

use super::common::{child_count, number, sum_detail, SdsCommon};
use super::SdsPlugin;
use crate::context::ServiceContext;
use crate::store::central::{ClusterDetails, TendrlContext};
use crate::summary::{ClusterSummary, SystemSummary, Utilization};

pub const NAME: &str = "ceph";

const EXTRA_SERVICES: [&str; 2] = ["ceph-mon", "ceph-osd"];

const COLLECTORS: [&str; 6] = [
    "cpu",
    "memory",
    "df",
    "ceph_cluster",
    "ceph_pool",
    "ceph_osd",
];

pub const POOLS_COUNT: &str = "pools_count";
pub const OSDS_COUNT: &str = "osds_count";

pub struct CephPlugin {
    common: SdsCommon,
}

impl CephPlugin {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            common: SdsCommon::new(NAME, ctx, &EXTRA_SERVICES),
        }
    }
}

/// Cluster utilization as reported under `Utilization/{used,total}`.
fn cluster_utilization(tree: &Value) -> Utilization {
    let section = tree.get("Utilization");
    Utilization::from_used_total(
        number(section.and_then(|u| u.get("used"))),
        number(section.and_then(|u| u.get("total"))),
    )
}

impl SdsPlugin for CephPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn configure_monitoring(&self, context: &TendrlContext) -> Result<()> {
        ensure!(
            context.sds_name == NAME,
            "cluster {} is not a {NAME} cluster",
            context.integration_id,
        );
        self.common
            .write_collectors(&context.integration_id, &COLLECTORS)
            .await
    }

    async fn get_cluster_summary(
        &self,
        cluster_id: &str,
        details: &ClusterDetails,
    ) -> Result<ClusterSummary> {
        let utilization = cluster_utilization(&details.tree);
        let mut summary = self
            .common
            .cluster_summary(cluster_id, details, utilization)
            .await;

        summary.sds_det.extra.insert(
            POOLS_COUNT.to_string(),
            child_count(details.tree.get("Pools")).into(),
        );
        summary.sds_det.extra.insert(
            OSDS_COUNT.to_string(),
            child_count(details.tree.get("Osds")).into(),
        );

        Ok(summary)
    }

    async fn compute_system_summary(
        &self,
        summaries: &[ClusterSummary],
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> Result<SystemSummary> {
        let mut system = self.common.system_summary(summaries, clusters).await;

        let own = || summaries.iter().filter(|s| s.sds_type == NAME);
        for key in [POOLS_COUNT, OSDS_COUNT] {
            system
                .sds_det
                .insert(key.to_string(), sum_detail(own(), key).into());
        }

        self.common.publish_system_summary(&system).await?;
        Ok(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::MetadataStore;
    use crate::tsdb::memory::MemoryTimeSeries;
    use crate::tsdb::TimeSeriesDb;

    fn plugin() -> (MemoryStore, MemoryTimeSeries, CephPlugin) {
        let mem = MemoryStore::new();
        let ts = MemoryTimeSeries::new();
        let ctx = ServiceContext::new(
            MetadataStore::Memory(mem.clone()),
            TimeSeriesDb::Memory(ts.clone()),
            "test",
            None,
        );
        (mem, ts, CephPlugin::new(ctx))
    }

    fn seed_cluster(mem: &MemoryStore, id: &str, used: &str, total: &str, status: &str) {
        mem.insert(&format!("clusters/{id}/TendrlContext/sds_name"), NAME);
        mem.insert(&format!("clusters/{id}/TendrlContext/integration_id"), id);
        mem.insert(&format!("clusters/{id}/GlobalDetails/status"), status);
        mem.insert(&format!("clusters/{id}/Utilization/used"), used);
        mem.insert(&format!("clusters/{id}/Utilization/total"), total);
        mem.insert(&format!("clusters/{id}/Pools/1/pool_name"), "rbd");
        mem.insert(&format!("clusters/{id}/Pools/2/pool_name"), "data");
        mem.insert(&format!("clusters/{id}/Osds/0/uuid"), "a");
        mem.insert(&format!("clusters/{id}/nodes/n1/NodeContext/fqdn"), "mon1");
    }

    #[tokio::test]
    async fn test_cluster_summary_reads_utilization_and_counts() {
        let (mem, _, plugin) = plugin();
        seed_cluster(&mem, "c1", "250", "1000", "HEALTH_OK");
        mem.insert("nodes/n1/Services/ceph-mon/exists", "True");
        mem.insert("nodes/n1/Services/ceph-mon/running", "True");

        let details = plugin
            .common
            .ctx
            .central
            .cluster_details("c1")
            .await
            .expect("details");
        let summary = plugin
            .get_cluster_summary("c1", &details)
            .await
            .expect("summary");

        assert_eq!(summary.sds_type, "ceph");
        assert_eq!(summary.utilization.used, 250.0);
        assert_eq!(summary.utilization.total, 1000.0);
        assert_eq!(summary.utilization.percent_used, 25.0);
        assert_eq!(summary.sds_det.extra.get(POOLS_COUNT), Some(&Value::from(2)));
        assert_eq!(summary.sds_det.extra.get(OSDS_COUNT), Some(&Value::from(1)));
        assert_eq!(summary.hosts_count.get("total"), Some(&1));
        assert_eq!(summary.hosts_count.get("not_monitored"), Some(&1));

        let services = summary.sds_det.services_count.decode().expect("decodes");
        assert_eq!(services.get("ceph-mon").map(|c| c.running), Some(1));
    }

    #[tokio::test]
    async fn test_system_summary_sums_pools_and_osds() {
        let (mem, ts, plugin) = plugin();
        seed_cluster(&mem, "c1", "100", "400", "HEALTH_OK");
        seed_cluster(&mem, "c2", "100", "400", "HEALTH_WARN");

        let central = &plugin.common.ctx.central;
        let mut clusters = BTreeMap::new();
        let mut summaries = Vec::new();
        for id in ["c1", "c2"] {
            let details = central.cluster_details(id).await.expect("details");
            summaries.push(
                plugin
                    .get_cluster_summary(id, &details)
                    .await
                    .expect("summary"),
            );
            clusters.insert(id.to_string(), details);
        }

        let system = plugin
            .compute_system_summary(&summaries, &clusters)
            .await
            .expect("system");

        assert_eq!(system.sds_det.get(POOLS_COUNT), Some(&Value::from(4u64)));
        assert_eq!(system.sds_det.get(OSDS_COUNT), Some(&Value::from(2u64)));
        assert_eq!(system.cluster_count.get("total"), Some(&2));
        assert_eq!(system.utilization.percent_used, 25.0);
        assert_eq!(ts.last_pushed("ceph.cluster_count.HEALTH_WARN"), Some(1.0));

        let stored = plugin
            .common
            .ctx
            .summaries
            .load_system(NAME)
            .await
            .expect("persisted");
        assert_eq!(stored, system);
    }

    #[tokio::test]
    async fn test_configure_writes_collectors() {
        let (mem, _, plugin) = plugin();
        let context = TendrlContext {
            integration_id: "c1".to_string(),
            sds_name: NAME.to_string(),
            ..Default::default()
        };
        plugin.configure_monitoring(&context).await.expect("configured");
        let stored = mem
            .value("monitoring/clusters/c1/collectors")
            .expect("written");
        assert!(stored.contains("ceph_pool"));
    }

    #[tokio::test]
    async fn test_configure_rejects_foreign_cluster() {
        let (_, _, plugin) = plugin();
        let context = TendrlContext {
            integration_id: "c1".to_string(),
            sds_name: "gluster".to_string(),
            ..Default::default()
        };
        assert!(plugin.configure_monitoring(&context).await.is_err());
    }
}
