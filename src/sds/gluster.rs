//! Gluster backend.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use serde_json::Value;

use super::common::{number, sum_detail, SdsCommon};
use super::SdsPlugin;
use crate::context::ServiceContext;
use crate::store::central::{ClusterDetails, TendrlContext};
use crate::summary::{ClusterSummary, SystemSummary, Utilization};

pub const NAME: &str = "gluster";

const EXTRA_SERVICES: [&str; 1] = ["glusterd"];

const COLLECTORS: [&str; 6] = [
    "cpu",
    "memory",
    "df",
    "tendrl_glusterfs_health_counters",
    "tendrl_glusterfs_brick_utilization",
    "tendrl_glusterfs_profile_info",
];

pub const VOLUMES_COUNT: &str = "volumes_count";
pub const BRICKS_COUNT: &str = "bricks_count";

pub struct GlusterPlugin {
    common: SdsCommon,
}

impl GlusterPlugin {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            common: SdsCommon::new(NAME, ctx, &EXTRA_SERVICES),
        }
    }
}

fn volumes(tree: &Value) -> impl Iterator<Item = &Value> {
    tree.get("Volumes")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|m| m.values())
}

/// Cluster utilization summed over all volumes.
fn cluster_utilization(tree: &Value) -> Utilization {
    let (used, total) = volumes(tree).fold((0.0, 0.0), |(used, total), vol| {
        (
            used + number(vol.get("used_capacity")),
            total + number(vol.get("usable_capacity")),
        )
    });
    Utilization::from_used_total(used, total)
}

fn bricks_count(tree: &Value) -> u64 {
    volumes(tree)
        .map(|vol| number(vol.get("brick_count")) as u64)
        .sum()
}

impl SdsPlugin for GlusterPlugin {
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
            VOLUMES_COUNT.to_string(),
            (volumes(&details.tree).count() as u64).into(),
        );
        summary
            .sds_det
            .extra
            .insert(BRICKS_COUNT.to_string(), bricks_count(&details.tree).into());

        Ok(summary)
    }

    async fn compute_system_summary(
        &self,
        summaries: &[ClusterSummary],
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> Result<SystemSummary> {
        let mut system = self.common.system_summary(summaries, clusters).await;

        let own = || summaries.iter().filter(|s| s.sds_type == NAME);
        for key in [VOLUMES_COUNT, BRICKS_COUNT] {
            system
                .sds_det
                .insert(key.to_string(), sum_detail(own(), key).into());
        }

        self.common.publish_system_summary(&system).await?;
        Ok(system)
    }
}
