//! CPU, memory and storage utilization records of a node.
//!
//! Each record is either complete or unavailable (`None`); a record is never
//! built from a partial set of readings.

use chrono::{DateTime, Utc};

use super::metrics::MetricsAccessor;
use crate::summary::{format_timestamp, CpuUsage, MemoryUsage, StorageUsage};

pub const CPU_PERCENT_USER: &str = "cpu.percent-user";
pub const CPU_PERCENT_SYSTEM: &str = "cpu.percent-system";
pub const MEMORY_USED: &str = "memory.memory-used";
pub const MEMORY_TOTAL: &str = "aggregation-memory-sum.memory";
pub const MEMORY_PERCENT_USED: &str = "memory.percent-used";
pub const STORAGE_USED: &str = "df-*.df_complex-used";
pub const STORAGE_FREE: &str = "df-*.df_complex-free";

pub fn cpu_usage(percent_user: f64, percent_system: f64, now: DateTime<Utc>) -> CpuUsage {
    CpuUsage {
        percent_used: (percent_user + percent_system).to_string(),
        updated_at: format_timestamp(now),
    }
}

pub fn memory_usage(used: f64, total: f64, percent_used: f64, now: DateTime<Utc>) -> MemoryUsage {
    MemoryUsage {
        used: used.to_string(),
        total: total.to_string(),
        percent_used: percent_used.to_string(),
        updated_at: format_timestamp(now),
    }
}

/// Storage usage from the per-mount used/free readings.
///
/// Non-finite readings are skipped individually. Returns `None` when the
/// remaining readings add up to no capacity at all.
pub fn storage_usage(used: &[f64], free: &[f64], now: DateTime<Utc>) -> Option<StorageUsage> {
    let used: f64 = used.iter().filter(|v| v.is_finite()).sum();
    let free: f64 = free.iter().filter(|v| v.is_finite()).sum();

    let total = used + free;
    if total == 0.0 {
        return None;
    }

    Some(StorageUsage {
        used: used.to_string(),
        total: total.to_string(),
        percent_used: (used * 100.0 / total).to_string(),
        updated_at: format_timestamp(now),
    })
}

pub async fn fetch_cpu_usage(
    metrics: &MetricsAccessor,
    node_id: &str,
    now: DateTime<Utc>,
) -> Option<CpuUsage> {
    let user = metrics.latest_stat(node_id, CPU_PERCENT_USER).await.ok()?;
    let system = metrics.latest_stat(node_id, CPU_PERCENT_SYSTEM).await.ok()?;
    Some(cpu_usage(user, system, now))
}

pub async fn fetch_memory_usage(
    metrics: &MetricsAccessor,
    node_id: &str,
    now: DateTime<Utc>,
) -> Option<MemoryUsage> {
    let used = metrics.latest_stat(node_id, MEMORY_USED).await.ok()?;
    let total = metrics.latest_stat(node_id, MEMORY_TOTAL).await.ok()?;
    let percent_used = metrics.latest_stat(node_id, MEMORY_PERCENT_USED).await.ok()?;
    Some(memory_usage(used, total, percent_used, now))
}

pub async fn fetch_storage_usage(
    metrics: &MetricsAccessor,
    node_id: &str,
    now: DateTime<Utc>,
) -> Option<StorageUsage> {
    let used = metrics.latest_stats(node_id, STORAGE_USED).await.ok()?;
    let free = metrics.latest_stats(node_id, STORAGE_FREE).await.ok()?;
    storage_usage(&used, &free, now)
}
