//! Typed reads of the cluster/node topology other agents publish into the
//! metadata store.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{KvStore, MetadataStore, StoreError};

/// Cluster context record (`clusters/<id>/TendrlContext`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TendrlContext {
    #[serde(default)]
    pub integration_id: String,
    /// Name of the storage backend owning the cluster (e.g. "ceph").
    pub sds_name: String,
    #[serde(default)]
    pub sds_version: String,
    #[serde(default)]
    pub cluster_name: String,
}

/// Per-node service state record (`nodes/<id>/Services/<service>`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub exists: bool,
    pub running: bool,
}

impl ServiceState {
    fn from_value(value: &Value) -> Self {
        Self {
            exists: truthy(value.get("exists")),
            running: truthy(value.get("running")),
        }
    }
}

/// Full detail tree of one cluster (`clusters/<id>`).
#[derive(Debug, Clone, Default)]
pub struct ClusterDetails {
    pub integration_id: String,
    /// Absent until the owning agent has published the context.
    pub context: Option<TendrlContext>,
    /// `GlobalDetails/status`, if published.
    pub status: Option<String>,
    /// Ids of the nodes belonging to the cluster.
    pub nodes: Vec<String>,
    /// The raw tree, for backend-specific sections.
    pub tree: Value,
}

impl ClusterDetails {
    /// Build cluster details from the tree stored under `clusters/<id>`.
    pub fn from_tree(integration_id: &str, tree: Value) -> Result<Self, StoreError> {
        let context = match tree.get("TendrlContext") {
            Some(raw) => Some(
                serde_json::from_value::<TendrlContext>(raw.clone()).map_err(|e| {
                    StoreError::decode(&format!("clusters/{integration_id}/TendrlContext"), e)
                })?,
            ),
            None => None,
        };

        let status = tree
            .get("GlobalDetails")
            .and_then(|g| g.get("status"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let nodes = tree
            .get("nodes")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        Ok(Self {
            integration_id: integration_id.to_string(),
            context,
            status,
            nodes,
            tree,
        })
    }

    /// Backend name declared by the cluster context, if any.
    pub fn sds_name(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.sds_name.as_str())
    }
}

/// Typed accessor for topology records in the metadata store.
#[derive(Clone)]
pub struct CentralStore {
    store: MetadataStore,
}

impl CentralStore {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// The underlying key-value store.
    pub fn kv(&self) -> &MetadataStore {
        &self.store
    }

    /// Ids of all known nodes. No `nodes` directory means no nodes yet.
    pub async fn node_ids(&self) -> Result<Vec<String>, StoreError> {
        empty_if_missing(self.store.list("nodes").await)
    }

    /// Display name (fqdn) of a node.
    pub async fn node_name(&self, node_id: &str) -> Result<String, StoreError> {
        self.store
            .get(&format!("nodes/{node_id}/NodeContext/fqdn"))
            .await
    }

    /// Role tags of a node; empty when not yet assigned.
    pub async fn node_role(&self, node_id: &str) -> Result<String, StoreError> {
        blank_if_missing(
            self.store
                .get(&format!("nodes/{node_id}/NodeContext/tags"))
                .await,
        )
    }

    /// Name of the cluster a node belongs to; empty when unmanaged.
    pub async fn node_cluster_name(&self, node_id: &str) -> Result<String, StoreError> {
        blank_if_missing(
            self.store
                .get(&format!("nodes/{node_id}/TendrlContext/cluster_name"))
                .await,
        )
    }

    /// Last heartbeat timestamp of a node, if it ever reported one.
    pub async fn node_last_seen(&self, node_id: &str) -> Result<Option<String>, StoreError> {
        match self
            .store
            .get(&format!("nodes/{node_id}/NodeContext/last_seen_at"))
            .await
        {
            Ok(v) if v.is_empty() => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Ids of the alerts currently open for a node.
    pub async fn node_alert_ids(&self, node_id: &str) -> Result<Vec<String>, StoreError> {
        empty_if_missing(self.store.list(&format!("alerting/nodes/{node_id}")).await)
    }

    /// Service state records of a node, keyed by service name.
    pub async fn node_services(
        &self,
        node_id: &str,
    ) -> Result<BTreeMap<String, ServiceState>, StoreError> {
        let tree = match self
            .store
            .read_tree(&format!("nodes/{node_id}/Services"))
            .await
        {
            Ok(tree) => tree,
            Err(e) if e.is_not_found() => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };

        Ok(tree
            .as_object()
            .map(|services| {
                services
                    .iter()
                    .map(|(name, det)| (name.clone(), ServiceState::from_value(det)))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Integration ids of all known clusters.
    pub async fn cluster_ids(&self) -> Result<Vec<String>, StoreError> {
        empty_if_missing(self.store.list("clusters").await)
    }

    /// Context record of a cluster. `NotFound` until the owning agent
    /// publishes it.
    pub async fn cluster_context(&self, integration_id: &str) -> Result<TendrlContext, StoreError> {
        let key = format!("clusters/{integration_id}/TendrlContext");
        let tree = self.store.read_tree(&key).await?;
        serde_json::from_value(tree).map_err(|e| StoreError::decode(&key, e))
    }

    /// Full detail tree of a cluster.
    pub async fn cluster_details(&self, integration_id: &str) -> Result<ClusterDetails, StoreError> {
        let tree = self
            .store
            .read_tree(&format!("clusters/{integration_id}"))
            .await?;
        ClusterDetails::from_tree(integration_id, tree)
    }
}

fn empty_if_missing(result: Result<Vec<String>, StoreError>) -> Result<Vec<String>, StoreError> {
    match result {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}

fn blank_if_missing(result: Result<String, StoreError>) -> Result<String, StoreError> {
    match result {
        Err(e) if e.is_not_found() => Ok(String::new()),
        other => other,
    }
}

/// Interpret a stored flag. Agents write booleans as "True"/"False" strings.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
