//! Monitoring summary service: derives node, cluster and system summaries
//! from raw metrics and cluster metadata and persists them to the shared
//! metadata store.

pub mod agent;
pub mod aggregator;
pub mod config;
pub mod context;
pub mod export;
pub mod sds;
pub mod store;
pub mod summary;
pub mod tsdb;
