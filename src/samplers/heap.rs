//! Heap sampler: for every heap region, reports `free`, `largest_free_block`
//! and a running `min_free_ever` (spec.md §4.E).

use std::collections::HashMap;

use super::SampleSink;
use crate::store::record::Value;

/// A snapshot of one heap region's allocator state.
#[derive(Debug, Clone, Copy)]
pub struct HeapRegion {
    pub name: &'static str,
    pub free: u32,
    pub largest_free_block: u32,
}

/// Platform fact this crate cannot observe on a host: the set of heap
/// regions and their current allocator state.
pub trait HeapSource: Send + Sync {
    fn regions(&self) -> Vec<HeapRegion>;
}

/// Owns the running minimum-free-ever tracking; the [`HeapSource`] only
/// reports instantaneous state, mirroring how `esp_diagnostics_system_metrics`
/// keeps the minimum in the diagnostics layer, not the allocator.
pub struct HeapSampler {
    source: Box<dyn HeapSource>,
    sink: SampleSink,
    min_free_ever: HashMap<&'static str, u32>,
}

impl HeapSampler {
    pub(crate) fn new(source: Box<dyn HeapSource>, sink: SampleSink) -> Self {
        Self {
            source,
            sink,
            min_free_ever: HashMap::new(),
        }
    }

    /// Take one sample and report `free`, `largest_free_block`, and
    /// `min_free_ever` as variables under tag `heap.<region>`.
    pub fn sample(&mut self) {
        for region in self.source.regions() {
            let min = self
                .min_free_ever
                .entry(region.name)
                .and_modify(|m| *m = (*m).min(region.free))
                .or_insert(region.free);
            let tag: String = format!("heap.{}", region.name);
            self.sink.report_variable(&tag, "free", Value::U32(region.free));
            self.sink.report_variable(&tag, "largest_free_block", Value::U32(region.largest_free_block));
            self.sink.report_variable(&tag, "min_free_ever", Value::U32(*min));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{DataType, Descriptor, Family, Registry};
    use crate::store::events::NullSink;
    use crate::store::platform::InMemoryResetRegion;
    use crate::store::{required_bytes, PersistentRingStore};
    use parking_lot::RwLock;
    use std::sync::Arc;

    struct FixedSource(Vec<HeapRegion>);
    impl HeapSource for FixedSource {
        fn regions(&self) -> Vec<HeapRegion> {
            self.0.clone()
        }
    }

    fn test_store() -> Arc<PersistentRingStore> {
        let cfg = crate::config::StoreConfig {
            critical_size: 256,
            non_critical_size: 256,
            reporting_watermark_percent: 10,
            non_critical_overflow: crate::config::OverflowPolicy::DropNew,
        };
        let region = Box::new(InMemoryResetRegion::cold(required_bytes(&cfg)));
        Arc::new(PersistentRingStore::new(region, cfg, Box::new(NullSink)).unwrap())
    }

    #[test]
    fn tracks_running_minimum_across_samples() {
        let mut registry = Registry::new(8, 8);
        for key in ["free", "largest_free_block", "min_free_ever"] {
            registry
                .register(
                    Family::Variable,
                    Descriptor {
                        tag: "heap.internal",
                        key,
                        label: "x",
                        path: "heap.internal",
                        data_type: DataType::U32,
                        unit: None,
                    },
                )
                .unwrap();
        }
        let registry = Arc::new(RwLock::new(registry));
        let store = test_store();
        let sink = SampleSink::new(registry, store.clone());
        let source = Box::new(FixedSource(vec![HeapRegion {
            name: "internal",
            free: 1000,
            largest_free_block: 500,
        }]));
        let mut sampler = HeapSampler::new(source, sink);
        sampler.sample();
        assert_eq!(sampler.min_free_ever[&"internal"], 1000);

        sampler.source = Box::new(FixedSource(vec![HeapRegion {
            name: "internal",
            free: 200,
            largest_free_block: 100,
        }]));
        sampler.sample();
        assert_eq!(sampler.min_free_ever[&"internal"], 200);

        sampler.source = Box::new(FixedSource(vec![HeapRegion {
            name: "internal",
            free: 900,
            largest_free_block: 400,
        }]));
        sampler.sample();
        assert_eq!(sampler.min_free_ever[&"internal"], 200);
    }
}
