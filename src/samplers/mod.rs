//! Periodic samplers: heap and Wi-Fi, reporting through the Registry and
//! into the non-critical stream (spec.md §4.E).

mod heap;
mod wifi;

pub use heap::{HeapRegion, HeapSampler, HeapSource};
pub use wifi::{WifiSampler, WifiSource};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::registry::{Family, Registry};
use crate::store::record::{NonCriticalRecord, Value};
use crate::store::PersistentRingStore;

pub(crate) fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

/// Shared write path every sampler uses: validate against the Registry,
/// then append a non-critical record. Read-only with respect to the
/// Registry (spec.md §5: "samplers/LogHook are read-only consumers").
pub(crate) struct SampleSink {
    registry: Arc<RwLock<Registry>>,
    store: Arc<PersistentRingStore>,
}

impl SampleSink {
    pub(crate) fn new(registry: Arc<RwLock<Registry>>, store: Arc<PersistentRingStore>) -> Self {
        Self { registry, store }
    }

    /// Report `value` for `(tag, key)` as a variable. Silently drops the
    /// sample if the descriptor is not pre-registered or its type
    /// mismatches (spec.md §4.E: "the registry rejects a sample whose
    /// descriptor was not pre-registered at init").
    pub(crate) fn report_variable(&self, tag: &str, key: &str, value: Value) {
        let data_type = value.data_type();
        let group = {
            let registry = self.registry.read();
            if registry.check_report(Family::Variable, tag, key, data_type).is_err() {
                return;
            }
            registry.group_id(tag).filter(|&g| registry.is_group_enabled(g))
        };
        let Some(group) = group else { return };
        let mut bytes = Vec::new();
        crate::store::record::DataPoint::Variable {
            tag: tag.to_string(),
            key: key.to_string(),
            timestamp_us: now_us(),
            value,
        }
        .encode(&mut bytes);
        let record = NonCriticalRecord { group, bytes };
        let mut wire = Vec::new();
        record.encode(&mut wire);
        let _ = self.store.write_non_critical(&wire);
    }

    /// Report `value` for `(tag, key)` as a metric.
    pub(crate) fn report_metric(&self, tag: &str, key: &str, value: Value) {
        let data_type = value.data_type();
        let group = {
            let registry = self.registry.read();
            if registry.check_report(Family::Metric, tag, key, data_type).is_err() {
                return;
            }
            registry.group_id(tag).filter(|&g| registry.is_group_enabled(g))
        };
        let Some(group) = group else { return };
        let mut bytes = Vec::new();
        crate::store::record::DataPoint::Metric {
            tag: tag.to_string(),
            key: key.to_string(),
            timestamp_us: now_us(),
            value,
        }
        .encode(&mut bytes);
        let record = NonCriticalRecord { group, bytes };
        let mut wire = Vec::new();
        record.encode(&mut wire);
        let _ = self.store.write_non_critical(&wire);
    }
}
