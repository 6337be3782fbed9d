//! Summarisation helpers shared by every backend plugin.
//!
//! All system-level helpers only consider summaries and clusters owned by
//! the plugin's own backend (`sds_type == name`).

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::ServiceContext;
use crate::store::central::ClusterDetails;
use crate::store::KvStore;
use crate::summary::{
    format_timestamp, ClusterSummary, NodeStatus, ServicesCount, SystemSummary, Utilization,
};
use crate::tsdb::{
    series_name, TimeSeries, PERCENT_USED, SYSTEM_UTILIZATION, TOTAL, USED,
};

/// Services every backend reports on.
pub const BASE_SERVICES: [&str; 2] = ["tendrl-node-agent", "etcd"];

/// Resource name of the per-status cluster count series.
pub const CLUSTER_COUNT: &str = "cluster_count";

/// Key holding the collector set configured for a cluster.
pub fn collectors_key(integration_id: &str) -> String {
    format!("monitoring/clusters/{integration_id}/collectors")
}

/// Shared state and helpers of a backend plugin.
#[derive(Clone)]
pub struct SdsCommon {
    pub name: &'static str,
    pub ctx: ServiceContext,
    pub supported_services: Vec<String>,
}

impl SdsCommon {
    pub fn new(name: &'static str, ctx: ServiceContext, extra_services: &[&str]) -> Self {
        let supported_services = BASE_SERVICES
            .iter()
            .chain(extra_services)
            .map(|s| s.to_string())
            .collect();

        Self {
            name,
            ctx,
            supported_services,
        }
    }

    fn owns_cluster(&self, details: &ClusterDetails) -> bool {
        details.sds_name() == Some(self.name)
    }

    fn own_summaries<'a>(
        &'a self,
        summaries: &'a [ClusterSummary],
    ) -> impl Iterator<Item = &'a ClusterSummary> {
        summaries.iter().filter(move |s| s.sds_type == self.name)
    }

    /// Count this backend's clusters by global status, plus `total`.
    /// Clusters without a status are not counted.
    pub fn clusters_status_wise_counts(
        &self,
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::from([("total".to_string(), 0)]);
        for details in clusters.values().filter(|d| self.owns_cluster(d)) {
            if let Some(status) = &details.status {
                *counts.entry(status.clone()).or_insert(0) += 1;
                *counts.entry("total".to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Sum used/total over this backend's clusters and push the result as
    /// the backend's system utilization series.
    pub async fn system_utilization(&self, summaries: &[ClusterSummary]) -> Utilization {
        let (used, total) = self
            .own_summaries(summaries)
            .fold((0.0, 0.0), |(used, total), s| {
                (used + s.utilization.used, total + s.utilization.total)
            });
        let utilization = Utilization::from_used_total(used, total);

        for (kind, value) in [
            (TOTAL, utilization.total),
            (USED, utilization.used),
            (PERCENT_USED, utilization.percent_used),
        ] {
            let series = series_name(self.name, kind, SYSTEM_UTILIZATION);
            if let Err(e) = self.ctx.tsdb.push_metric(&series, value).await {
                warn!(sds_name = self.name, %series, error = %e, "pushing system utilization");
            }
        }

        utilization
    }

    /// Sum each cluster's host status counts into one mapping.
    pub fn system_host_status_wise_counts(
        &self,
        summaries: &[ClusterSummary],
    ) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> =
            ["total", "down", "crit_alert_count", "warn_alert_count"]
                .into_iter()
                .map(|k| (k.to_string(), 0))
                .collect();

        for summary in self.own_summaries(summaries) {
            for (status, count) in &summary.hosts_count {
                *counts.entry(status.clone()).or_insert(0) += count;
            }
        }
        counts
    }

    /// Tally running/not-running supported services across the nodes of a
    /// cluster. Only services that exist on a node are counted.
    pub async fn services_count(&self, details: &ClusterDetails) -> ServicesCount {
        let mut counts = ServicesCount::new();

        for node_id in &details.nodes {
            let services = match self.ctx.central.node_services(node_id).await {
                Ok(services) => services,
                Err(e) => {
                    debug!(node_id = %node_id, error = %e, "reading node services");
                    continue;
                }
            };

            for (service, state) in services {
                if !state.exists || !self.supported_services.contains(&service) {
                    continue;
                }
                let counter = counts.entry(service).or_default();
                if state.running {
                    counter.running += 1;
                } else {
                    counter.not_running += 1;
                }
            }
        }

        counts
    }

    /// Merge every cluster's services count into one mapping. Summaries with
    /// an undecodable count are skipped.
    pub fn system_services_count(&self, summaries: &[ClusterSummary]) -> ServicesCount {
        let mut total = ServicesCount::new();

        for summary in self.own_summaries(summaries) {
            let counts = match summary.sds_det.services_count.decode() {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(
                        cluster_id = %summary.cluster_id,
                        error = %e,
                        "decoding services count",
                    );
                    continue;
                }
            };

            for (service, counter) in &counts {
                total.entry(service.clone()).or_default().add(counter);
            }
        }

        total
    }

    /// Host counts of a cluster from the persisted node summaries of its
    /// nodes. Nodes never summarised count as not monitored.
    pub async fn hosts_count(&self, details: &ClusterDetails) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> = [
            NodeStatus::Up,
            NodeStatus::Down,
            NodeStatus::NotMonitored,
        ]
        .into_iter()
        .map(|s| (s.count_key().to_string(), 0))
        .collect();
        counts.insert("total".to_string(), details.nodes.len() as u64);

        for node_id in &details.nodes {
            let status = match self.ctx.summaries.load_node(node_id).await {
                Ok(summary) => summary.status,
                Err(e) => {
                    if !e.is_not_found() {
                        debug!(node_id = %node_id, error = %e, "loading node summary");
                    }
                    NodeStatus::NotMonitored
                }
            };
            *counts.entry(status.count_key().to_string()).or_insert(0) += 1;
        }

        counts
    }

    /// Cluster summary skeleton with the backend-independent fields filled.
    pub async fn cluster_summary(
        &self,
        cluster_id: &str,
        details: &ClusterDetails,
        utilization: Utilization,
    ) -> ClusterSummary {
        let mut summary = ClusterSummary {
            cluster_id: cluster_id.to_string(),
            sds_type: self.name.to_string(),
            utilization,
            hosts_count: self.hosts_count(details).await,
            sds_det: Default::default(),
            updated_at: format_timestamp(Utc::now()),
        };
        summary.sds_det.services_count = self.services_count(details).await.into();
        summary
    }

    /// System summary with the backend-independent aggregates filled.
    pub async fn system_summary(
        &self,
        summaries: &[ClusterSummary],
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> SystemSummary {
        SystemSummary {
            sds_type: self.name.to_string(),
            cluster_count: self.clusters_status_wise_counts(clusters),
            utilization: self.system_utilization(summaries).await,
            hosts_count: self.system_host_status_wise_counts(summaries),
            services_count: self.system_services_count(summaries),
            sds_det: BTreeMap::new(),
            updated_at: format_timestamp(Utc::now()),
        }
    }

    /// Push per-status cluster counts and persist the system summary.
    pub async fn publish_system_summary(&self, summary: &SystemSummary) -> Result<()> {
        for (status, count) in &summary.cluster_count {
            let series = series_name(self.name, status, CLUSTER_COUNT);
            if let Err(e) = self.ctx.tsdb.push_metric(&series, *count as f64).await {
                warn!(sds_name = self.name, %series, error = %e, "pushing cluster count");
            }
        }

        self.ctx
            .summaries
            .save_system(summary)
            .await
            .with_context(|| format!("saving {} system summary", self.name))?;

        self.ctx.with_health(|h| {
            h.system_summaries_computed
                .with_label_values(&[self.name])
                .inc();
        });

        Ok(())
    }

    /// Record the collector set the backend needs for a cluster.
    pub async fn write_collectors(&self, integration_id: &str, collectors: &[&str]) -> Result<()> {
        let key = collectors_key(integration_id);
        let value = serde_json::to_string(collectors).context("encoding collector set")?;
        self.ctx
            .central
            .kv()
            .put(&key, &value)
            .await
            .with_context(|| format!("writing {key}"))?;

        info!(
            sds_name = self.name,
            integration_id,
            collectors = collectors.len(),
            "monitoring configured",
        );
        Ok(())
    }
}

/// Numeric value of a tree leaf written either as a number or a string.
pub fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Number of children of a directory in a tree.
pub fn child_count(value: Option<&Value>) -> u64 {
    value
        .and_then(Value::as_object)
        .map_or(0, |m| m.len() as u64)
}

/// Sum of an integer backend detail across summaries.
pub fn sum_detail<'a>(summaries: impl Iterator<Item = &'a ClusterSummary>, key: &str) -> u64 {
    summaries
        .filter_map(|s| s.sds_det.extra.get(key))
        .filter_map(Value::as_u64)
        .sum()
}
