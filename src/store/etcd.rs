use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{normalize_key, KvStore, StoreError};
use crate::config::EtcdConfig;

/// etcd error code for a missing key.
const ETCD_KEY_NOT_FOUND: u64 = 100;

/// etcd v2 keys API client.
#[derive(Clone)]
pub struct EtcdClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct KeysResponse {
    node: EtcdNode,
}

#[derive(Deserialize)]
struct EtcdNode {
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

#[derive(Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u64,
    #[serde(default)]
    message: String,
}

impl EtcdClient {
    /// Create a new etcd client.
    pub fn new(cfg: &EtcdConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v2/keys/{}", self.endpoint, normalize_key(key))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            req
        } else {
            req.basic_auth(&self.username, Some(&self.password))
        }
    }

    /// Fetch a node, optionally with its whole subtree.
    async fn fetch(&self, key: &str, recursive: bool) -> Result<EtcdNode, StoreError> {
        let key = normalize_key(key);
        debug!(key, recursive, "etcd read");

        let mut req = self.http.get(self.url(key));
        if recursive {
            req = req.query(&[("recursive", "true")]);
        }

        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("reading {key}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("reading {key}: {e}")))?;

        if !status.is_success() {
            return Err(classify_error(key, status, &body));
        }

        let parsed: KeysResponse =
            serde_json::from_str(&body).map_err(|e| StoreError::decode(key, e))?;

        Ok(parsed.node)
    }
}

/// Map a non-success etcd reply to a [`StoreError`].
fn classify_error(key: &str, status: reqwest::StatusCode, body: &str) -> StoreError {
    if let Ok(err) = serde_json::from_str::<EtcdErrorBody>(body) {
        if err.error_code == ETCD_KEY_NOT_FOUND {
            return StoreError::NotFound {
                key: key.to_string(),
            };
        }
        return StoreError::Unavailable(format!(
            "etcd error {} on {key}: {}",
            err.error_code, err.message
        ));
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return StoreError::NotFound {
            key: key.to_string(),
        };
    }

    StoreError::Unavailable(format!("unexpected status {status} on {key}: {body}"))
}

/// Last path segment of an etcd key.
fn leaf_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Convert an etcd node into a JSON tree.
fn node_to_value(node: &EtcdNode) -> Value {
    if !node.dir {
        return Value::String(node.value.clone().unwrap_or_default());
    }

    let mut map = Map::new();
    for child in &node.nodes {
        let name = child.key.as_deref().map(leaf_name).unwrap_or_default();
        if !name.is_empty() {
            map.insert(name.to_string(), node_to_value(child));
        }
    }
    Value::Object(map)
}

impl KvStore for EtcdClient {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let node = self.fetch(key, false).await?;
        if node.dir {
            return Err(StoreError::decode(key, "expected a value, found a directory"));
        }
        Ok(node.value.unwrap_or_default())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        let node = self.fetch(dir, false).await?;
        if !node.dir {
            return Err(StoreError::decode(dir, "expected a directory, found a value"));
        }

        Ok(node
            .nodes
            .iter()
            .filter_map(|child| child.key.as_deref().map(leaf_name))
            .map(str::to_string)
            .collect())
    }

    async fn read_tree(&self, key: &str) -> Result<Value, StoreError> {
        let node = self.fetch(key, true).await?;
        Ok(node_to_value(&node))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = normalize_key(key);
        debug!(key, "etcd write");

        let req = self.http.put(self.url(key)).form(&[("value", value)]);
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("writing {key}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error(key, status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalizes_slashes() {
        let client = EtcdClient::new(&EtcdConfig {
            endpoint: "http://127.0.0.1:2379/".to_string(),
            ..Default::default()
        })
        .expect("client builds");
        assert_eq!(
            client.url("/nodes/n1/NodeContext/"),
            "http://127.0.0.1:2379/v2/keys/nodes/n1/NodeContext"
        );
    }

    #[test]
    fn test_classify_key_not_found() {
        let body = r#"{"errorCode":100,"message":"Key not found","cause":"/nodes/x","index":7}"#;
        let err = classify_error("nodes/x", reqwest::StatusCode::NOT_FOUND, body);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_other_etcd_error() {
        let body = r#"{"errorCode":300,"message":"Raft Internal Error"}"#;
        let err = classify_error("nodes/x", reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.to_string().contains("Raft Internal Error"));
    }

    #[test]
    fn test_classify_plain_404() {
        let err = classify_error("nodes/x", reqwest::StatusCode::NOT_FOUND, "not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_node_to_value_recursive() {
        let body = r#"{
            "action": "get",
            "node": {
                "key": "/nodes/n1",
                "dir": true,
                "nodes": [
                    {"key": "/nodes/n1/NodeContext", "dir": true, "nodes": [
                        {"key": "/nodes/n1/NodeContext/fqdn", "value": "host1"}
                    ]},
                    {"key": "/nodes/n1/status", "value": "UP"}
                ]
            }
        }"#;
        let parsed: KeysResponse = serde_json::from_str(body).expect("valid response");
        let tree = node_to_value(&parsed.node);
        assert_eq!(tree["NodeContext"]["fqdn"], "host1");
        assert_eq!(tree["status"], "UP");
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name("/nodes/n1/NodeContext"), "NodeContext");
        assert_eq!(leaf_name("plain"), "plain");
    }
}
