use std::sync::Arc;

use crate::export::health::HealthMetrics;
use crate::store::central::CentralStore;
use crate::store::MetadataStore;
use crate::summary::SummaryStore;
use crate::tsdb::TimeSeriesDb;

/// Handles shared by every summarising component.
///
/// Built once at startup and cloned into each component; all members are
/// cheap clones of shared clients.
#[derive(Clone)]
pub struct ServiceContext {
    pub central: CentralStore,
    pub summaries: SummaryStore,
    pub tsdb: TimeSeriesDb,
    pub publisher_id: String,
    pub health: Option<Arc<HealthMetrics>>,
}

impl ServiceContext {
    pub fn new(
        store: MetadataStore,
        tsdb: TimeSeriesDb,
        publisher_id: impl Into<String>,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            central: CentralStore::new(store.clone()),
            summaries: SummaryStore::new(store),
            tsdb,
            publisher_id: publisher_id.into(),
            health,
        }
    }

    /// Run `f` against the health metrics, if enabled.
    pub fn with_health(&self, f: impl FnOnce(&HealthMetrics)) {
        if let Some(health) = &self.health {
            f(health);
        }
    }
}
