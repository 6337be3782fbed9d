use thiserror::Error;
use tracing::debug;

use crate::context::ServiceContext;
use crate::store::StoreError;
use crate::tsdb::stat::{parse_latest_stat, parse_latest_stats, StatError};
use crate::tsdb::{TimeSeries, TsdbError, LATEST};

/// A raw metric could not be turned into a value.
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("{resource} of node {node_id} unavailable: {cause}")]
    Unavailable {
        node_id: String,
        resource: String,
        #[source]
        cause: MetricCause,
    },
}

/// Underlying reason a metric is unavailable.
#[derive(Error, Debug)]
pub enum MetricCause {
    #[error("resolving node name: {0}")]
    NodeName(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] TsdbError),

    #[error(transparent)]
    Stat(#[from] StatError),
}

/// Latest-value queries of node metrics.
#[derive(Clone)]
pub struct MetricsAccessor {
    ctx: ServiceContext,
}

impl MetricsAccessor {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Latest value of `resource` on a node.
    pub async fn latest_stat(&self, node_id: &str, resource: &str) -> Result<f64, MetricError> {
        let result = async {
            let reply = self.reply(node_id, resource).await?;
            Ok::<_, MetricCause>(parse_latest_stat(&reply)?)
        }
        .await;

        result.map_err(|cause| self.unavailable(node_id, resource, cause))
    }

    /// Latest values of every series matching the wildcard `pattern` on a
    /// node, NaN readings included.
    pub async fn latest_stats(
        &self,
        node_id: &str,
        pattern: &str,
    ) -> Result<Vec<f64>, MetricError> {
        let result = async {
            let reply = self.reply(node_id, pattern).await?;
            Ok::<_, MetricCause>(parse_latest_stats(&reply)?)
        }
        .await;

        result.map_err(|cause| self.unavailable(node_id, pattern, cause))
    }

    async fn reply(&self, node_id: &str, resource: &str) -> Result<String, MetricCause> {
        let node_name = self.ctx.central.node_name(node_id).await?;
        Ok(self
            .ctx
            .tsdb
            .metric_stats(&node_name, resource, LATEST)
            .await?)
    }

    fn unavailable(&self, node_id: &str, resource: &str, cause: MetricCause) -> MetricError {
        debug!(
            node_id,
            resource,
            publisher = %self.ctx.publisher_id,
            error = %cause,
            "latest stat unavailable for node summary",
        );
        self.ctx.with_health(|h| {
            h.metric_fetch_failures.with_label_values(&[resource]).inc();
        });

        MetricError::Unavailable {
            node_id: node_id.to_string(),
            resource: resource.to_string(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::MetadataStore;
    use crate::tsdb::memory::MemoryTimeSeries;
    use crate::tsdb::TimeSeriesDb;

    fn accessor() -> (MemoryStore, MemoryTimeSeries, MetricsAccessor) {
        let mem = MemoryStore::new();
        let ts = MemoryTimeSeries::new();
        let ctx = ServiceContext::new(
            MetadataStore::Memory(mem.clone()),
            TimeSeriesDb::Memory(ts.clone()),
            "test",
            None,
        );
        (mem, ts, MetricsAccessor::new(ctx))
    }

    #[tokio::test]
    async fn test_latest_stat_queries_by_node_name() {
        let (mem, ts, metrics) = accessor();
        mem.insert("nodes/n1/NodeContext/fqdn", "host1");
        ts.set_reply("host1", "cpu.percent-user", "Current:12.5 Max:20");

        let value = metrics
            .latest_stat("n1", "cpu.percent-user")
            .await
            .expect("value");
        assert_eq!(value, 12.5);
    }

    #[tokio::test]
    async fn test_latest_stat_failures() {
        let (mem, ts, metrics) = accessor();

        // Unknown node name.
        let err = metrics
            .latest_stat("n1", "cpu.percent-user")
            .await
            .unwrap_err();
        let MetricError::Unavailable { cause, .. } = err;
        assert!(matches!(cause, MetricCause::NodeName(_)));

        mem.insert("nodes/n1/NodeContext/fqdn", "host1");

        // No data yet.
        let MetricError::Unavailable { cause, .. } = metrics
            .latest_stat("n1", "cpu.percent-user")
            .await
            .unwrap_err();
        assert!(matches!(cause, MetricCause::Stat(StatError::Empty)));

        // NaN.
        ts.set_reply("host1", "memory.percent-used", "Current:nan Max:nan");
        let MetricError::Unavailable { cause, .. } = metrics
            .latest_stat("n1", "memory.percent-used")
            .await
            .unwrap_err();
        assert!(matches!(cause, MetricCause::Stat(StatError::NotANumber)));

        // Store down.
        ts.fail_entity("host1");
        let MetricError::Unavailable { cause, .. } = metrics
            .latest_stat("n1", "memory.percent-used")
            .await
            .unwrap_err();
        assert!(matches!(cause, MetricCause::Query(_)));
    }

    #[tokio::test]
    async fn test_latest_stats_keeps_nan() {
        let (mem, ts, metrics) = accessor();
        mem.insert("nodes/n1/NodeContext/fqdn", "host1");
        ts.set_reply(
            "host1",
            "df-*.df_complex-used",
            "a Current:1 Max:1\nb Current:nan Max:nan\n",
        );

        let values = metrics
            .latest_stats("n1", "df-*.df_complex-used")
            .await
            .expect("values");
        assert_eq!(values.len(), 2);
        assert!(values[1].is_nan());
    }
}
