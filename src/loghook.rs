//! Intercepts platform log calls and appends them to the critical stream
//! (spec.md §4.D).
//!
//! Modeled as a `tracing_subscriber::Layer` rather than a bespoke callback:
//! a host application's ordinary `tracing::error!`/`warn!`/`info!` call
//! sites become the "platform log calls" spec.md refers to, without this
//! crate inventing its own logging front-end. This is the `std`-world
//! counterpart of the original wiring into ESP-IDF's log vprintf hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::store::record::{DataPoint, Severity, LOG_MESSAGE_MAX};
use crate::store::PersistentRingStore;

fn severity_for(level: &Level) -> Option<Severity> {
    match *level {
        Level::ERROR => Some(Severity::Error),
        Level::WARN => Some(Severity::Warning),
        Level::INFO => Some(Severity::Event),
        _ => None,
    }
}

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.0, "{:?}", value);
        }
    }
}

/// A [`Layer`] that appends error/warn/info-level events to a
/// [`PersistentRingStore`]'s critical stream, at or above `min_severity`.
///
/// Runs on the caller's stack: never allocates beyond the fixed-size
/// message buffer, never logs through `tracing` itself (that would
/// reenter), and never blocks longer than the critical-stream lock.
pub struct LogHook {
    store: Arc<PersistentRingStore>,
    min_severity: Severity,
    active: AtomicBool,
}

fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Event => 2,
    }
}

impl LogHook {
    pub fn new(store: Arc<PersistentRingStore>, min_severity: Severity) -> Self {
        Self {
            store,
            min_severity,
            active: AtomicBool::new(true),
        }
    }

    /// Unregister this hook (spec.md §5 Cancellation). The caller's
    /// subscriber keeps holding the `Layer`, but every subsequent event is a
    /// no-op: there is no handle back into the caller's subscriber to
    /// actually remove the layer from.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

impl<S: Subscriber> Layer<S> for LogHook {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        let Some(severity) = severity_for(event.metadata().level()) else {
            return;
        };
        if severity_rank(severity) > severity_rank(self.min_severity) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let mut message = visitor.0;
        if message.len() > LOG_MESSAGE_MAX {
            let mut end = LOG_MESSAGE_MAX;
            while end > 0 && !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }

        let point = DataPoint::Log {
            severity,
            pc: 0, // no program-counter concept outside embedded firmware
            timestamp_us: now_us(),
            tag: event.metadata().target().to_string(),
            message,
        };
        let mut bytes = Vec::new();
        point.encode(&mut bytes);
        let _ = self.store.write_critical(&bytes);
    }
}
