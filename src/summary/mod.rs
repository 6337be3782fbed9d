//! Derived summary documents and their persistence.
//!
//! Numeric usage figures are carried as strings so a never-computed field
//! can stay blank (`""`) in the placeholder baseline.

pub mod services;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::services::{ServiceCounter, ServicesCount, ServicesCountRepr};
pub use self::store::SummaryStore;

/// Liveness of a node derived from its last heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Up,
    Down,
    NotMonitored,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::NotMonitored => "NOT_MONITORED",
        }
    }

    /// Key used for this status in `hosts_count` mappings.
    pub fn count_key(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::NotMonitored => "not_monitored",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp format stored in `updated_at` fields.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// CPU utilization of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub percent_used: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Used/total capacity of a node resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityUsage {
    #[serde(default)]
    pub used: String,
    #[serde(default)]
    pub total: String,
    #[serde(default)]
    pub percent_used: String,
    #[serde(default)]
    pub updated_at: String,
}

pub type MemoryUsage = CapacityUsage;
pub type StorageUsage = CapacityUsage;

/// Per-node summary persisted at `monitoring/summary/nodes/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub memory_usage: MemoryUsage,
    #[serde(default)]
    pub storage_usage: StorageUsage,
    #[serde(default)]
    pub alert_count: u64,
}

impl NodeSummary {
    /// All-blank baseline used when a node has never been summarised.
    pub fn placeholder(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            name: String::new(),
            status: NodeStatus::NotMonitored,
            role: String::new(),
            cluster_name: String::new(),
            cpu_usage: CpuUsage::default(),
            memory_usage: MemoryUsage::default(),
            storage_usage: StorageUsage::default(),
            alert_count: 0,
        }
    }
}

/// Used/total capacity of a cluster or of a whole backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    #[serde(default)]
    pub used: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub percent_used: f64,
}

impl Utilization {
    /// Utilization with `percent_used` derived from `used`/`total`
    /// (0 when `total` is 0).
    pub fn from_used_total(used: f64, total: f64) -> Self {
        let percent_used = if total > 0.0 { used * 100.0 / total } else { 0.0 };
        Self {
            used,
            total,
            percent_used,
        }
    }
}

/// Backend-specific details of a cluster summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdsDetails {
    #[serde(default)]
    pub services_count: ServicesCountRepr,
    /// Backend-specific counters (pools, volumes, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Per-cluster summary persisted at `monitoring/summary/clusters/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: String,
    /// Name of the backend owning the cluster.
    pub sds_type: String,
    #[serde(default)]
    pub utilization: Utilization,
    /// Node status -> count, plus `total`.
    #[serde(default)]
    pub hosts_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub sds_det: SdsDetails,
    #[serde(default)]
    pub updated_at: String,
}

/// Backend-wide summary persisted at `monitoring/summary/system/<sds_name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub sds_type: String,
    /// Cluster status -> count, plus `total`.
    #[serde(default)]
    pub cluster_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub utilization: Utilization,
    #[serde(default)]
    pub hosts_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub services_count: ServicesCount,
    /// Backend-specific aggregates.
    #[serde(default)]
    pub sds_det: BTreeMap<String, Value>,
    #[serde(default)]
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&NodeStatus::NotMonitored).expect("serializes"),
            "\"NOT_MONITORED\""
        );
        let up: NodeStatus = serde_json::from_str("\"UP\"").expect("parses");
        assert_eq!(up, NodeStatus::Up);
        assert_eq!(NodeStatus::Down.to_string(), "DOWN");
    }

    #[test]
    fn test_placeholder_is_blank() {
        let p = NodeSummary::placeholder("n1");
        assert_eq!(p.node_id, "n1");
        assert!(p.memory_usage.percent_used.is_empty());
        assert!(p.cpu_usage.updated_at.is_empty());
        assert_eq!(p.alert_count, 0);
    }

    #[test]
    fn test_utilization_percent_guarded() {
        assert_eq!(Utilization::from_used_total(40.0, 200.0).percent_used, 20.0);
        assert_eq!(Utilization::from_used_total(5.0, 0.0).percent_used, 0.0);
    }

    #[test]
    fn test_cluster_summary_flattens_backend_details() {
        let json = r#"{
            "cluster_id": "c1",
            "sds_type": "ceph",
            "utilization": {"used": 10, "total": 100},
            "hosts_count": {"total": 2, "up": 2},
            "sds_det": {"services_count": "{u'etcd': {u'running': 1, u'not_running': 0}}", "pools_count": 3}
        }"#;
        let summary: ClusterSummary = serde_json::from_str(json).expect("parses");
        assert_eq!(summary.utilization.used, 10.0);
        assert_eq!(summary.sds_det.extra.get("pools_count"), Some(&Value::from(3)));
        assert!(matches!(
            summary.sds_det.services_count,
            ServicesCountRepr::Legacy(_)
        ));
    }

    #[test]
    fn test_format_timestamp_is_utc() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00")
            .expect("parses")
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(ts), "2024-05-01T08:00:00.000000Z");
    }
}
