use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ClusterSummary, NodeSummary, SystemSummary};
use crate::store::{KvStore, MetadataStore, StoreError};

const SUMMARY_ROOT: &str = "monitoring/summary";

pub fn node_key(node_id: &str) -> String {
    format!("{SUMMARY_ROOT}/nodes/{node_id}")
}

pub fn cluster_key(integration_id: &str) -> String {
    format!("{SUMMARY_ROOT}/clusters/{integration_id}")
}

pub fn system_key(sds_name: &str) -> String {
    format!("{SUMMARY_ROOT}/system/{sds_name}")
}

/// Loads and persists summary documents as JSON values in the metadata
/// store. Saves overwrite unconditionally; concurrent writers to the same
/// key race last-write-wins.
#[derive(Clone)]
pub struct SummaryStore {
    store: MetadataStore,
}

impl SummaryStore {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let raw = self.store.get(key).await?;
        serde_json::from_str(&raw).map_err(|e| StoreError::decode(key, e))
    }

    async fn save<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(doc).map_err(|e| StoreError::decode(key, e))?;
        self.store.put(key, &raw).await
    }

    /// Last persisted summary of a node.
    pub async fn load_node(&self, node_id: &str) -> Result<NodeSummary, StoreError> {
        self.load(&node_key(node_id)).await
    }

    /// Baseline for merging a fresh node summary: the last persisted one, or
    /// the blank placeholder when the node was never summarised. Any other
    /// failure is returned so the caller can abort without persisting.
    pub async fn node_baseline(&self, node_id: &str) -> Result<NodeSummary, StoreError> {
        match self.load_node(node_id).await {
            Ok(summary) => Ok(summary),
            Err(e) if e.is_not_found() => Ok(NodeSummary::placeholder(node_id)),
            Err(e) => Err(e),
        }
    }

    pub async fn save_node(&self, summary: &NodeSummary) -> Result<(), StoreError> {
        self.save(&node_key(&summary.node_id), summary).await
    }

    pub async fn load_cluster(&self, integration_id: &str) -> Result<ClusterSummary, StoreError> {
        self.load(&cluster_key(integration_id)).await
    }

    pub async fn save_cluster(&self, summary: &ClusterSummary) -> Result<(), StoreError> {
        self.save(&cluster_key(&summary.cluster_id), summary).await
    }

    pub async fn load_system(&self, sds_name: &str) -> Result<SystemSummary, StoreError> {
        self.load(&system_key(sds_name)).await
    }

    pub async fn save_system(&self, summary: &SystemSummary) -> Result<(), StoreError> {
        self.save(&system_key(&summary.sds_type), summary).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::summary::NodeStatus;

    fn summaries() -> (MemoryStore, SummaryStore) {
        let mem = MemoryStore::new();
        (mem.clone(), SummaryStore::new(MetadataStore::Memory(mem)))
    }

    #[tokio::test]
    async fn test_baseline_placeholder_when_missing() {
        let (_, store) = summaries();
        let baseline = store.node_baseline("n1").await.expect("baseline");
        assert_eq!(baseline, NodeSummary::placeholder("n1"));
    }

    #[tokio::test]
    async fn test_save_and_load_node_roundtrip() {
        let (mem, store) = summaries();
        let mut summary = NodeSummary::placeholder("n1");
        summary.status = NodeStatus::Up;
        summary.memory_usage.percent_used = "42".to_string();
        store.save_node(&summary).await.expect("save");

        assert!(mem.value("monitoring/summary/nodes/n1").is_some());
        assert_eq!(store.node_baseline("n1").await.expect("load"), summary);
    }

    #[tokio::test]
    async fn test_baseline_propagates_unavailable_and_decode() {
        let (mem, store) = summaries();
        mem.insert("monitoring/summary/nodes/bad", "not json");
        assert!(matches!(
            store.node_baseline("bad").await,
            Err(StoreError::Decode { .. })
        ));

        mem.fail_prefix("monitoring/summary/nodes/n2");
        assert!(matches!(
            store.node_baseline("n2").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_keys() {
        assert_eq!(node_key("n1"), "monitoring/summary/nodes/n1");
        assert_eq!(cluster_key("c1"), "monitoring/summary/clusters/c1");
        assert_eq!(system_key("ceph"), "monitoring/summary/system/ceph");
    }
}
