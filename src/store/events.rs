//! Events the store raises on the data path (spec.md §4.A, §7).
//!
//! These never go through `tracing`: spec.md is explicit that data-path
//! failures are silent except through this sink, so a host that cares can
//! wire it to a counter or a log line without the store itself choosing.

use crate::store::Stream;

/// An event raised by [`crate::store::PersistentRingStore`] outside of a
/// direct call's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A write to `stream` was rejected because free space (under the
    /// configured overflow policy) was insufficient.
    WriteFailed { stream: Stream },
    /// `stream` crossed below its configured low-watermark threshold.
    LowMemory { stream: Stream },
    /// Post-reset integrity validation failed; the stream was reset empty.
    IntegrityFailure { stream: Stream },
}

/// Receives [`StoreEvent`]s. Implementations must not block or panic.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: StoreEvent);
}

/// An [`EventSink`] that discards everything, for tests that do not care.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: StoreEvent) {}
}

/// An [`EventSink`] that records events for later inspection in tests.
#[derive(Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<StoreEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events.lock())
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }
}
