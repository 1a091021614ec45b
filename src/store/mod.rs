//! Two fixed-capacity byte ring buffers in reset-surviving memory
//! (spec.md §4.A). This is the highest-weighted component of the agent.

pub mod events;
pub mod platform;
pub mod record;
mod ring;

use parking_lot::{Mutex, MutexGuard};

use crate::config::StoreConfig;
use crate::error::StoreError;
use events::{EventSink, StoreEvent};
use platform::ResetRegion;
use ring::RingStream;

/// Which of the two independent byte streams an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Critical,
    NonCritical,
}

/// Number of bytes a [`ResetRegion`] must provide for the given stream
/// capacities (header overhead included).
pub fn required_bytes(config: &StoreConfig) -> usize {
    const HEADER_LEN: usize = 4;
    2 * HEADER_LEN + config.critical_size + config.non_critical_size
}

/// The persistent ring-buffer store (spec.md §4.A).
pub struct PersistentRingStore {
    // Kept alive for the store's lifetime: the two `RingStream`s hold raw
    // pointers into this region's backing bytes (see `ring::split`).
    _region: Box<dyn ResetRegion>,
    critical: Mutex<RingStream>,
    non_critical: Mutex<RingStream>,
    config: StoreConfig,
    sink: Box<dyn EventSink>,
}

impl PersistentRingStore {
    /// Bind to `region`. On a cold-boot reset cause, both streams are
    /// zeroed; otherwise each stream's integrity predicates are validated
    /// independently and a failing stream is discarded (spec.md §3, §4.A).
    pub fn new(
        mut region: Box<dyn ResetRegion>,
        config: StoreConfig,
        sink: Box<dyn EventSink>,
    ) -> Result<Self, StoreError> {
        const HEADER_LEN: usize = 4;
        let critical_total = HEADER_LEN + config.critical_size;
        let needed = required_bytes(&config);

        let cold = region.reset_cause().is_cold_boot();
        let bytes = region.bytes();
        if bytes.len() < needed {
            return Err(StoreError::InvalidArgument);
        }

        // SAFETY: `bytes` is the only live reference into `region` for the
        // duration of this call; the two halves below are disjoint and
        // `region` is moved into `self` afterwards without calling
        // `bytes()` again, so the raw pointers stay valid for `self`'s
        // lifetime.
        let (critical_region, non_critical_region) = unsafe { ring::split(bytes, critical_total) };

        let (critical, critical_ok) = RingStream::bind(critical_region, cold);
        let (non_critical, non_critical_ok) = RingStream::bind(non_critical_region, cold);

        if !critical_ok {
            sink.on_event(StoreEvent::IntegrityFailure { stream: Stream::Critical });
        }
        if !non_critical_ok {
            sink.on_event(StoreEvent::IntegrityFailure {
                stream: Stream::NonCritical,
            });
        }

        Ok(Self {
            _region: region,
            critical: Mutex::new(critical),
            non_critical: Mutex::new(non_critical),
            config,
            sink,
        })
    }

    fn watermark(&self, stream: Stream) -> usize {
        match stream {
            Stream::Critical => self.config.critical_watermark(),
            Stream::NonCritical => self.config.non_critical_watermark(),
        }
    }

    /// Append to the critical stream. Blocks on the stream lock (no
    /// non-blocking fallback, mirroring spec.md §5's "`write_*` may block
    /// up to `portMAX_DELAY` on the stream lock (critical)").
    pub fn write_critical(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.critical.lock();
        if !guard.append(bytes) {
            drop(guard);
            self.sink.on_event(StoreEvent::WriteFailed { stream: Stream::Critical });
            return Err(StoreError::OutOfMemory);
        }
        let low = guard.free() < self.watermark(Stream::Critical);
        drop(guard);
        if low {
            self.sink.on_event(StoreEvent::LowMemory { stream: Stream::Critical });
        }
        Ok(())
    }

    /// Append to the non-critical stream under the configured overflow
    /// policy. Non-blocking: returns `WouldBlock` if the lock is contended
    /// (spec.md §4.A).
    pub fn write_non_critical(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let Some(mut guard) = self.non_critical.try_lock() else {
            return Err(StoreError::WouldBlock);
        };
        if !guard.append_with_policy(bytes, self.config.non_critical_overflow) {
            drop(guard);
            self.sink.on_event(StoreEvent::WriteFailed {
                stream: Stream::NonCritical,
            });
            return Err(StoreError::OutOfMemory);
        }
        let low = guard.free() < self.watermark(Stream::NonCritical);
        drop(guard);
        if low {
            self.sink.on_event(StoreEvent::LowMemory {
                stream: Stream::NonCritical,
            });
        }
        Ok(())
    }

    /// Acquire `stream`'s lock and borrow its live span. The lock is held
    /// until the returned [`RingGuard`] is dropped or released.
    pub fn read_and_lock(&self, stream: Stream) -> RingGuard<'_> {
        let guard = match stream {
            Stream::Critical => self.critical.lock(),
            Stream::NonCritical => self.non_critical.lock(),
        };
        RingGuard { guard }
    }

    /// Read-and-lock then immediately release `consumed` bytes, without
    /// observing the data.
    pub fn release(&self, stream: Stream, consumed: usize) {
        self.read_and_lock(stream).release(consumed);
    }

    /// Copy the backing region out, for handing to a new [`ResetRegion`]
    /// that simulates a warm reset in tests. Production shutdown has no use
    /// for this: the real region survives the process exiting, in place.
    #[cfg(test)]
    fn into_region_bytes(mut self) -> Vec<u8> {
        self._region.bytes().to_vec()
    }
}

/// A live, lock-held view of one stream's contiguous data.
pub struct RingGuard<'a> {
    guard: MutexGuard<'a, RingStream>,
}

impl<'a> RingGuard<'a> {
    /// The stream's current live span. Never wrapped: defrag runs on every
    /// write that would otherwise split it (spec.md §4.A).
    pub fn bytes(&self) -> &[u8] {
        self.guard.live_slice()
    }

    /// Advance past `consumed` bytes at the head and release the lock.
    pub fn release(mut self, consumed: usize) {
        self.guard.consume(consumed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::OverflowPolicy;
    use platform::{InMemoryResetRegion, ResetCause};

    fn config(critical_size: usize, non_critical_size: usize) -> StoreConfig {
        StoreConfig {
            critical_size,
            non_critical_size,
            reporting_watermark_percent: 10,
            non_critical_overflow: OverflowPolicy::DropNew,
        }
    }

    #[test]
    fn b1_cold_boot_streams_empty() {
        let cfg = config(100, 100);
        let region = Box::new(InMemoryResetRegion::cold(required_bytes(&cfg)));
        let store = PersistentRingStore::new(region, cfg, Box::new(events::NullSink)).unwrap();
        assert_eq!(store.read_and_lock(Stream::Critical).bytes().len(), 0);
        assert_eq!(store.read_and_lock(Stream::NonCritical).bytes().len(), 0);
    }

    #[test]
    fn b4_overflow_critical_emits_write_failed() {
        let cfg = config(16, 16);
        let region = Box::new(InMemoryResetRegion::cold(required_bytes(&cfg)));
        let sink = std::sync::Arc::new(events::RecordingSink::new());
        struct Forward(std::sync::Arc<events::RecordingSink>);
        impl EventSink for Forward {
            fn on_event(&self, e: StoreEvent) {
                self.0.on_event(e)
            }
        }
        let store = PersistentRingStore::new(region, cfg, Box::new(Forward(sink.clone()))).unwrap();
        store.write_critical(&[1u8; 16]).unwrap();
        assert_eq!(store.write_critical(&[2u8; 1]), Err(StoreError::OutOfMemory));
        assert!(sink
            .drain()
            .contains(&StoreEvent::WriteFailed { stream: Stream::Critical }));
    }

    #[test]
    fn warm_boot_preserves_state_across_store_instances() {
        let cfg = config(64, 64);
        let region = Box::new(InMemoryResetRegion::cold(required_bytes(&cfg)));
        let store = PersistentRingStore::new(region, cfg, Box::new(events::NullSink)).unwrap();
        store.write_critical(b"hello").unwrap();
        let backing = store.into_region_bytes();

        let region = Box::new(InMemoryResetRegion::warm(backing, ResetCause::Panic));
        let store = PersistentRingStore::new(region, cfg, Box::new(events::NullSink)).unwrap();
        assert_eq!(store.read_and_lock(Stream::Critical).bytes(), b"hello");
    }

    #[test]
    fn non_blocking_non_critical_fails_fast_when_contended() {
        let cfg = config(64, 64);
        let region = Box::new(InMemoryResetRegion::cold(required_bytes(&cfg)));
        let store = PersistentRingStore::new(region, cfg, Box::new(events::NullSink)).unwrap();
        let _held = store.non_critical.lock();
        assert_eq!(store.write_non_critical(b"x"), Err(StoreError::WouldBlock));
    }
}
