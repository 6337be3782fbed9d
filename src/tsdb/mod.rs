//! Time-series store access.
//!
//! Raw node metrics are queried from the store as textual "latest value"
//! replies (see [`stat`]); derived system figures are pushed back as single
//! data points.

pub mod graphite;
pub mod memory;
pub mod stat;

use thiserror::Error;

use self::graphite::GraphiteClient;
use self::memory::MemoryTimeSeries;

/// Window name for "most recent value" queries.
pub const LATEST: &str = "latest";

/// Resource name of the system-wide utilization series.
pub const SYSTEM_UTILIZATION: &str = "system_utilization";

/// Utilization kinds used in series names.
pub const TOTAL: &str = "total";
pub const USED: &str = "used";
pub const PERCENT_USED: &str = "percent_used";

/// Errors returned by time-series store operations.
#[derive(Error, Debug)]
pub enum TsdbError {
    #[error("time-series store unavailable: {0}")]
    Unavailable(String),

    #[error("time-series store rejected {what}: {reason}")]
    Rejected { what: String, reason: String },
}

/// Time-series store contract consumed by the aggregation engine.
pub trait TimeSeries: Send + Sync {
    /// Fetch the textual stat reply for `resource` (which may contain
    /// wildcards) of `entity` over `window`. An empty string or `[]` means
    /// no data yet.
    fn metric_stats(
        &self,
        entity: &str,
        resource: &str,
        window: &str,
    ) -> impl std::future::Future<Output = Result<String, TsdbError>> + Send;

    /// Push one data point for `series`, timestamped now.
    fn push_metric(
        &self,
        series: &str,
        value: f64,
    ) -> impl std::future::Future<Output = Result<(), TsdbError>> + Send;
}

/// Time-series store dispatching to Graphite or to the in-process recorder.
#[derive(Clone)]
pub enum TimeSeriesDb {
    Graphite(GraphiteClient),
    Memory(MemoryTimeSeries),
}

impl TimeSeriesDb {
    /// Returns the backend name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Graphite(_) => "graphite",
            Self::Memory(_) => "memory",
        }
    }
}

impl TimeSeries for TimeSeriesDb {
    async fn metric_stats(
        &self,
        entity: &str,
        resource: &str,
        window: &str,
    ) -> Result<String, TsdbError> {
        match self {
            Self::Graphite(t) => t.metric_stats(entity, resource, window).await,
            Self::Memory(t) => t.metric_stats(entity, resource, window).await,
        }
    }

    async fn push_metric(&self, series: &str, value: f64) -> Result<(), TsdbError> {
        match self {
            Self::Graphite(t) => t.push_metric(series, value).await,
            Self::Memory(t) => t.push_metric(series, value).await,
        }
    }
}

/// Series name for a derived figure: `<sds_type>.<resource>.<kind>`.
pub fn series_name(sds_type: &str, utilization_kind: &str, resource: &str) -> String {
    format!("{sds_type}.{resource}.{utilization_kind}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_name() {
        assert_eq!(
            series_name("ceph", PERCENT_USED, SYSTEM_UTILIZATION),
            "ceph.system_utilization.percent_used"
        );
    }

    #[tokio::test]
    async fn test_dispatch_to_memory() {
        let mem = MemoryTimeSeries::new();
        let tsdb = TimeSeriesDb::Memory(mem.clone());
        tsdb.push_metric("gluster.system_utilization.used", 4.0)
            .await
            .expect("push");
        assert_eq!(tsdb.name(), "memory");
        assert_eq!(mem.last_pushed("gluster.system_utilization.used"), Some(4.0));
    }
}
