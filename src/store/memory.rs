use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{normalize_key, KvStore, StoreError};

/// In-process metadata store.
///
/// Holds leaf values keyed by their full path. Directories are implicit: a
/// key is a directory when other keys live underneath it. Clones share the
/// same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<parking_lot::RwLock<BTreeMap<String, String>>>,
    unavailable: Arc<parking_lot::RwLock<Vec<String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a leaf value synchronously. Convenient for seeding fixtures.
    pub fn insert(&self, key: &str, value: impl Into<String>) {
        self.entries
            .write()
            .insert(normalize_key(key).to_string(), value.into());
    }

    /// Remove a leaf and everything beneath it.
    pub fn remove(&self, key: &str) {
        let key = normalize_key(key);
        let prefix = format!("{key}/");
        self.entries
            .write()
            .retain(|k, _| k != key && !k.starts_with(&prefix));
    }

    /// Make every operation touching `prefix` fail with
    /// [`StoreError::Unavailable`], simulating a lost connection.
    pub fn fail_prefix(&self, prefix: &str) {
        self.unavailable
            .write()
            .push(normalize_key(prefix).to_string());
    }

    /// Returns a copy of the value at `key`, if any.
    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.read().get(normalize_key(key)).cloned()
    }

    fn check_available(&self, key: &str) -> Result<(), StoreError> {
        let failing = self.unavailable.read();
        if failing.iter().any(|p| key == p || key.starts_with(&format!("{p}/"))) {
            return Err(StoreError::Unavailable(format!("{key}: connection refused")));
        }
        Ok(())
    }
}

impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let key = normalize_key(key);
        self.check_available(key)?;

        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        let dir = normalize_key(dir);
        self.check_available(dir)?;

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let entries = self.entries.read();
        let children: BTreeSet<&str> = entries
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .collect();

        if children.is_empty() {
            return Err(StoreError::NotFound {
                key: dir.to_string(),
            });
        }

        Ok(children.into_iter().map(str::to_string).collect())
    }

    async fn read_tree(&self, key: &str) -> Result<Value, StoreError> {
        let key = normalize_key(key);
        self.check_available(key)?;

        let entries = self.entries.read();
        if let Some(value) = entries.get(key) {
            return Ok(Value::String(value.clone()));
        }

        let prefix = format!("{key}/");
        let mut root = Map::new();
        let mut found = false;
        for (k, v) in entries.iter().filter(|(k, _)| k.starts_with(&prefix)) {
            found = true;
            insert_path(&mut root, &k[prefix.len()..], v);
        }

        if !found {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }

        Ok(Value::Object(root))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = normalize_key(key);
        self.check_available(key)?;
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Place `value` at the slash-separated `path` inside `root`, creating
/// intermediate objects as needed.
fn insert_path(root: &mut Map<String, Value>, path: &str, value: &str) {
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    let mut current = root;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), Value::String(value.to_string()));
            return;
        }

        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => current = map,
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("nodes/n1/NodeContext/fqdn", "host1.example.com");
        store.insert("nodes/n1/NodeContext/tags", "ceph/mon");
        store.insert("nodes/n2/NodeContext/fqdn", "host2.example.com");
        store
    }

    #[tokio::test]
    async fn test_get_existing_and_missing() {
        let store = seeded();
        assert_eq!(
            store.get("/nodes/n1/NodeContext/fqdn").await.expect("exists"),
            "host1.example.com"
        );
        let err = store.get("nodes/n3/NodeContext/fqdn").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let store = seeded();
        let nodes = store.list("nodes").await.expect("dir exists");
        assert_eq!(nodes, vec!["n1".to_string(), "n2".to_string()]);

        let ctx = store.list("nodes/n1/NodeContext").await.expect("dir exists");
        assert_eq!(ctx, vec!["fqdn".to_string(), "tags".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_not_found() {
        let store = seeded();
        assert!(store.list("clusters").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_read_tree_builds_nested_objects() {
        let store = seeded();
        let tree = store.read_tree("nodes/n1").await.expect("tree exists");
        assert_eq!(tree["NodeContext"]["fqdn"], "host1.example.com");
        assert_eq!(tree["NodeContext"]["tags"], "ceph/mon");

        let leaf = store.read_tree("nodes/n2/NodeContext/fqdn").await.expect("leaf");
        assert_eq!(leaf, Value::String("host2.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_fail_prefix_reports_unavailable() {
        let store = seeded();
        store.fail_prefix("nodes/n1");

        let err = store.get("nodes/n1/NodeContext/fqdn").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.get("nodes/n2/NodeContext/fqdn").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_subtree() {
        let store = seeded();
        store.remove("nodes/n1");
        assert_eq!(store.list("nodes").await.expect("dir"), vec!["n2".to_string()]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        clone.put("a", "1").await.expect("put");
        assert_eq!(store.value("a").as_deref(), Some("1"));
    }
}
