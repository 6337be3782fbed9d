use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{TimeSeries, TsdbError};

/// In-process time-series store.
///
/// Serves canned stat replies keyed by `(entity, resource)` and records every
/// pushed data point. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryTimeSeries {
    replies: Arc<RwLock<HashMap<(String, String), String>>>,
    pushed: Arc<RwLock<Vec<(String, f64)>>>,
    failing: Arc<RwLock<HashSet<String>>>,
}

impl MemoryTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `reply` for queries of `resource` on `entity`.
    pub fn set_reply(&self, entity: &str, resource: &str, reply: impl Into<String>) {
        self.replies
            .write()
            .insert((entity.to_string(), resource.to_string()), reply.into());
    }

    /// Make every query for `entity` fail as if the store were down.
    pub fn fail_entity(&self, entity: &str) {
        self.failing.write().insert(entity.to_string());
    }

    /// All pushed data points in push order.
    pub fn pushed(&self) -> Vec<(String, f64)> {
        self.pushed.read().clone()
    }

    /// Most recent value pushed for `series`.
    pub fn last_pushed(&self, series: &str) -> Option<f64> {
        self.pushed
            .read()
            .iter()
            .rev()
            .find(|(name, _)| name == series)
            .map(|(_, value)| *value)
    }
}

impl TimeSeries for MemoryTimeSeries {
    async fn metric_stats(
        &self,
        entity: &str,
        resource: &str,
        _window: &str,
    ) -> Result<String, TsdbError> {
        if self.failing.read().contains(entity) {
            return Err(TsdbError::Unavailable(format!(
                "querying {resource} of {entity}: connection refused"
            )));
        }

        Ok(self
            .replies
            .read()
            .get(&(entity.to_string(), resource.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn push_metric(&self, series: &str, value: f64) -> Result<(), TsdbError> {
        self.pushed.write().push((series.to_string(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_series_has_no_data() {
        let tsdb = MemoryTimeSeries::new();
        let reply = tsdb
            .metric_stats("host1", "cpu.percent-user", "latest")
            .await
            .expect("query");
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_set_reply_and_fail_entity() {
        let tsdb = MemoryTimeSeries::new();
        tsdb.set_reply("host1", "cpu.percent-user", "Current:3 Max:3");
        assert_eq!(
            tsdb.metric_stats("host1", "cpu.percent-user", "latest")
                .await
                .expect("query"),
            "Current:3 Max:3"
        );

        tsdb.fail_entity("host1");
        assert!(matches!(
            tsdb.metric_stats("host1", "cpu.percent-user", "latest").await,
            Err(TsdbError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_last_pushed_returns_latest() {
        let tsdb = MemoryTimeSeries::new();
        tsdb.push_metric("a", 1.0).await.expect("push");
        tsdb.push_metric("b", 2.0).await.expect("push");
        tsdb.push_metric("a", 3.0).await.expect("push");
        assert_eq!(tsdb.last_pushed("a"), Some(3.0));
        assert_eq!(tsdb.pushed().len(), 3);
        assert_eq!(tsdb.last_pushed("c"), None);
    }
}
