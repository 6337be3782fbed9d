//! Storage backend ("SDS") plugins.
//!
//! Each supported backend type implements [`SdsPlugin`]; [`Plugin`]
//! enumerates the implementations compiled into the service and
//! [`PluginRegistry`] holds one instance of each, keyed by backend name.

pub mod ceph;
pub mod common;
pub mod gluster;
pub mod manager;

use std::collections::BTreeMap;
use std::future::Future;

use anyhow::{bail, Result};

use self::ceph::CephPlugin;
use self::gluster::GlusterPlugin;
use crate::context::ServiceContext;
use crate::store::central::{ClusterDetails, TendrlContext};
use crate::summary::{ClusterSummary, SystemSummary};

/// Contract implemented by every storage backend.
pub trait SdsPlugin: Send + Sync {
    /// Backend name as declared in cluster contexts (`sds_name`).
    fn name(&self) -> &'static str;

    /// Set up whatever the backend needs to start producing metrics for a
    /// cluster. Idempotent.
    fn configure_monitoring(&self, context: &TendrlContext)
        -> impl Future<Output = Result<()>> + Send;

    /// Compute the summary of one cluster owned by this backend.
    fn get_cluster_summary(
        &self,
        cluster_id: &str,
        details: &ClusterDetails,
    ) -> impl Future<Output = Result<ClusterSummary>> + Send;

    /// Aggregate all cluster summaries of this backend into its system
    /// summary, publish derived series and persist the result.
    fn compute_system_summary(
        &self,
        summaries: &[ClusterSummary],
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> impl Future<Output = Result<SystemSummary>> + Send;
}

/// Backend plugins compiled into the service.
pub enum Plugin {
    Ceph(CephPlugin),
    Gluster(GlusterPlugin),
}

impl Plugin {
    /// One instance of every known implementation.
    pub fn all(ctx: &ServiceContext) -> Vec<Plugin> {
        vec![
            Plugin::Ceph(CephPlugin::new(ctx.clone())),
            Plugin::Gluster(GlusterPlugin::new(ctx.clone())),
        ]
    }
}

impl SdsPlugin for Plugin {
    fn name(&self) -> &'static str {
        match self {
            Self::Ceph(p) => p.name(),
            Self::Gluster(p) => p.name(),
        }
    }

    async fn configure_monitoring(&self, context: &TendrlContext) -> Result<()> {
        match self {
            Self::Ceph(p) => p.configure_monitoring(context).await,
            Self::Gluster(p) => p.configure_monitoring(context).await,
        }
    }

    async fn get_cluster_summary(
        &self,
        cluster_id: &str,
        details: &ClusterDetails,
    ) -> Result<ClusterSummary> {
        match self {
            Self::Ceph(p) => p.get_cluster_summary(cluster_id, details).await,
            Self::Gluster(p) => p.get_cluster_summary(cluster_id, details).await,
        }
    }

    async fn compute_system_summary(
        &self,
        summaries: &[ClusterSummary],
        clusters: &BTreeMap<String, ClusterDetails>,
    ) -> Result<SystemSummary> {
        match self {
            Self::Ceph(p) => p.compute_system_summary(summaries, clusters).await,
            Self::Gluster(p) => p.compute_system_summary(summaries, clusters).await,
        }
    }
}

/// Registered plugins keyed by backend name. Immutable once built.
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Plugin>,
}

impl PluginRegistry {
    /// Register every known implementation.
    pub fn discover(ctx: &ServiceContext) -> Result<Self> {
        Self::from_plugins(Plugin::all(ctx))
    }

    /// Register the given plugins. Names must be unique and non-empty.
    pub fn from_plugins(plugins: Vec<Plugin>) -> Result<Self> {
        let mut registered = BTreeMap::new();
        for plugin in plugins {
            let name = plugin.name();
            if name.is_empty() {
                bail!("plugin with empty name");
            }
            if registered.contains_key(name) {
                bail!("plugin {name} registered twice");
            }
            registered.insert(name, plugin);
        }

        Ok(Self {
            plugins: registered,
        })
    }

    /// Plugin declared under exactly `name`.
    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.values()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
