//! Adaptive-interval reporting task (spec.md §4.F). Checks connectivity,
//! assembles a batch, asks the encoder to render it, hands the buffer to
//! the transport, tracks the in-flight message id, and releases consumed
//! bytes on ack.

pub mod clock;
pub mod period;
pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::encode::data::{build_data, BootSection};
use crate::encode::meta::build_meta;
use crate::platform_kv::{self, NvKv};
use crate::registry::{Family, Registry};
use crate::store::record::{DataPoint, GroupId, NonCriticalRecord};
use crate::store::{PersistentRingStore, Stream};
use clock::Clock;
use period::AdaptivePeriod;
use transport::{SendOutcome, Transport, TransportEvent};

/// The send cycle's current state (spec.md §4.F).
enum CycleState {
    Idle,
    Assembling,
    InFlight {
        id: i32,
        critical_bytes: usize,
        is_boot: bool,
        started_at: Instant,
    },
}

/// What happened on a `tick()` call, surfaced for logging/tests.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Busy,
    NotConnected,
    NothingToSend,
    Sent { critical_bytes: usize },
    SentAsync { id: i32 },
    TransportError,
}

pub struct Reporter {
    store: Arc<PersistentRingStore>,
    registry: Arc<RwLock<Registry>>,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    kv: Box<dyn NvKv>,
    period: AdaptivePeriod,
    ack_timeout: Duration,
    max_document_size: usize,
    ver: String,
    sha256: String,

    state: CycleState,
    sent_since_last_adapt: bool,
    persisted_meta_crc: u64,
    meta_in_flight: Option<(i32, u64)>,
    boot_pending: bool,
    boot_in_flight_id: Option<i32>,
    last_async_critical_bytes: usize,
}

fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

impl Reporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PersistentRingStore>,
        registry: Arc<RwLock<Registry>>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        kv: Box<dyn NvKv>,
        min_period: Duration,
        max_period: Duration,
        ack_timeout: Duration,
        max_document_size: usize,
        ver: String,
        sha256: String,
        boot_pending: bool,
    ) -> Self {
        let persisted_meta_crc = platform_kv::load_meta_crc(kv.as_ref());
        Self {
            store,
            registry,
            transport,
            clock,
            kv,
            period: AdaptivePeriod::new(min_period, max_period),
            ack_timeout,
            max_document_size,
            ver,
            sha256,
            state: CycleState::Idle,
            sent_since_last_adapt: false,
            persisted_meta_crc,
            meta_in_flight: None,
            boot_pending,
            boot_in_flight_id: None,
            last_async_critical_bytes: 0,
        }
    }

    pub fn current_period(&self) -> Duration {
        self.period.current()
    }

    /// Disconnect the transport (spec.md §5 Cancellation). Any send still
    /// in flight is abandoned; a late ack for it is ignored once the caller
    /// stops feeding `on_transport_event`.
    pub(crate) fn disconnect_transport(&self) {
        self.transport.disconnect();
    }

    /// One pass of the worker loop: adapt the period from the previous
    /// interval's outcome, then attempt a send if idle and connected.
    pub fn tick(&mut self) -> TickOutcome {
        self.check_watchdog();

        if !matches!(self.state, CycleState::Idle) {
            return TickOutcome::Busy;
        }
        if !self.transport.is_connected() {
            return TickOutcome::NotConnected;
        }

        let sent = self.sent_since_last_adapt;
        self.period.on_cycle_complete(sent);
        self.sent_since_last_adapt = false;

        self.state = CycleState::Assembling;
        self.maybe_send_meta();
        let outcome = self.send_data();
        self.state = match outcome {
            TickOutcome::SentAsync { id } => CycleState::InFlight {
                id,
                critical_bytes: self.pending_critical_bytes(id),
                is_boot: self.boot_in_flight_id == Some(id),
                started_at: self.clock.now(),
            },
            _ => CycleState::Idle,
        };
        outcome
    }

    fn pending_critical_bytes(&self, _id: i32) -> usize {
        // Set by `send_data` just before returning `SentAsync`; kept as a
        // field lookup here would require interior mutability, so
        // `send_data` stashes it directly via `last_async_critical_bytes`.
        self.last_async_critical_bytes
    }

    fn check_watchdog(&mut self) {
        let timed_out = match &self.state {
            CycleState::InFlight { id, started_at, .. } => {
                if self.clock.now().duration_since(*started_at) >= self.ack_timeout {
                    Some(*id)
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(id) = timed_out {
            self.on_send_failed(id);
            self.state = CycleState::Idle;
        }
    }

    fn maybe_send_meta(&mut self) {
        if self.meta_in_flight.is_some() {
            return;
        }
        let current_crc = self.registry.read().meta_crc();
        if current_crc == self.persisted_meta_crc {
            return;
        }
        let registry = self.registry.read();
        let metrics = registry.enumerate(Family::Metric).to_vec();
        let variables = registry.enumerate(Family::Variable).to_vec();
        drop(registry);
        let Some(doc) = build_meta(&self.ver, now_us(), &self.sha256, &metrics, &variables, &[], self.max_document_size) else {
            return;
        };
        match self.transport.send(&doc.bytes) {
            Ok(SendOutcome::Synchronous) => {
                self.persisted_meta_crc = current_crc;
                platform_kv::store_meta_crc(self.kv.as_ref(), current_crc);
            }
            Ok(SendOutcome::Async(id)) => {
                self.meta_in_flight = Some((id, current_crc));
            }
            Err(()) => {}
        }
    }

    fn send_data(&mut self) -> TickOutcome {
        let critical_guard = self.store.read_and_lock(Stream::Critical);
        let mut critical_points = Vec::new();
        let mut offset = 0;
        while let Some((point, consumed)) = DataPoint::decode(&critical_guard.bytes()[offset..]) {
            critical_points.push((point, consumed));
            offset += consumed;
        }
        let critical_total_bytes = offset;
        drop(critical_guard);

        let non_critical_guard = self.store.read_and_lock(Stream::NonCritical);
        let mut non_critical_records: Vec<(GroupId, NonCriticalRecord)> = Vec::new();
        let mut non_critical_boundaries: Vec<usize> = Vec::new();
        let mut noffset = 0;
        while let Some((record, consumed)) = NonCriticalRecord::decode(&non_critical_guard.bytes()[noffset..]) {
            non_critical_records.push((record.group, record.clone()));
            noffset += consumed;
            non_critical_boundaries.push(noffset);
        }
        drop(non_critical_guard);

        let boot = self.boot_pending.then(|| BootSection {
            reason: "panic",
            core_dump_summary: None,
            boot_count: 1,
        });

        let registry = self.registry.clone();
        let points_only: Vec<DataPoint> = critical_points.iter().map(|(p, _)| p.clone()).collect();
        let doc = build_data(
            &self.ver,
            now_us(),
            &self.sha256,
            boot.as_ref(),
            &points_only,
            &non_critical_records,
            move |gid| registry.read().group_name(gid).unwrap_or("?").to_string(),
            self.max_document_size,
        );

        if doc.bytes.is_empty() {
            return TickOutcome::NothingToSend;
        }

        let critical_bytes_consumed: usize = critical_points
            .iter()
            .take(doc.critical_included)
            .map(|(_, n)| *n)
            .sum::<usize>()
            .min(critical_total_bytes);
        let non_critical_bytes_consumed: usize = doc
            .non_critical_included
            .checked_sub(1)
            .and_then(|i| non_critical_boundaries.get(i).copied())
            .unwrap_or(0);

        // Non-critical bytes are released immediately regardless of ack
        // (spec.md §4.F, "Non-critical data policy").
        self.store.release(Stream::NonCritical, non_critical_bytes_consumed);

        match self.transport.send(&doc.bytes) {
            Ok(SendOutcome::Synchronous) => {
                self.store.release(Stream::Critical, critical_bytes_consumed);
                self.sent_since_last_adapt = true;
                if boot.is_some() {
                    self.boot_pending = false;
                }
                TickOutcome::Sent {
                    critical_bytes: critical_bytes_consumed,
                }
            }
            Ok(SendOutcome::Async(id)) => {
                self.last_async_critical_bytes = critical_bytes_consumed;
                if boot.is_some() {
                    self.boot_in_flight_id = Some(id);
                }
                TickOutcome::SentAsync { id }
            }
            Err(()) => TickOutcome::TransportError,
        }
    }

    /// Process one event the transport posted (spec.md §6).
    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SendSuccess { id } => self.on_send_success(id),
            TransportEvent::SendFailed { id } => self.on_send_failed(id),
            TransportEvent::Recv(_bytes) => {}
        }
    }

    fn on_send_success(&mut self, id: i32) {
        if let Some((meta_id, crc)) = self.meta_in_flight {
            if meta_id == id {
                self.persisted_meta_crc = crc;
                platform_kv::store_meta_crc(self.kv.as_ref(), crc);
                self.meta_in_flight = None;
                return;
            }
        }
        let matched = match &self.state {
            CycleState::InFlight {
                id: inflight_id,
                critical_bytes,
                is_boot,
                ..
            } if *inflight_id == id => Some((*critical_bytes, *is_boot)),
            _ => None,
        };
        if let Some((critical_bytes, is_boot)) = matched {
            self.store.release(Stream::Critical, critical_bytes);
            self.sent_since_last_adapt = true;
            if is_boot {
                self.boot_pending = false;
                self.boot_in_flight_id = None;
                // Core-dump erasure is a platform operation outside this
                // crate's scope; the caller observes `boot_pending`
                // transitioning to `false`.
            }
            self.state = CycleState::Idle;
        }
        // An id matching neither slot is a duplicate/late ack (invariant 4:
        // idempotent, already released, silently ignored).
    }

    fn on_send_failed(&mut self, id: i32) {
        if let Some((meta_id, _)) = self.meta_in_flight {
            if meta_id == id {
                self.meta_in_flight = None;
                return;
            }
        }
        let matched = match &self.state {
            CycleState::InFlight { id: inflight_id, is_boot, .. } if *inflight_id == id => Some(*is_boot),
            _ => None,
        };
        if let Some(is_boot) = matched {
            if is_boot {
                self.boot_in_flight_id = None;
                // boot_pending stays true: retried next cycle.
            }
            self.state = CycleState::Idle;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{OverflowPolicy, StoreConfig};
    use crate::platform_kv::InMemoryNvKv;
    use crate::registry::{DataType, Descriptor, Family};
    use crate::store::events::NullSink;
    use crate::store::platform::InMemoryResetRegion;
    use crate::store::required_bytes;
    use parking_lot::Mutex as PlMutex;

    struct StubClock(PlMutex<Instant>);
    impl StubClock {
        fn new() -> Self {
            Self(PlMutex::new(Instant::now()))
        }
        fn advance(&self, d: Duration) {
            let mut g = self.0.lock();
            *g += d;
        }
    }
    impl Clock for StubClock {
        fn now(&self) -> Instant {
            *self.0.lock()
        }
    }

    #[derive(Default)]
    struct StubTransport {
        connected: PlMutex<bool>,
        next_outcome: PlMutex<Option<Result<SendOutcome, ()>>>,
        sent: PlMutex<Vec<Vec<u8>>>,
    }
    impl Transport for StubTransport {
        fn connect(&self) -> Result<(), ()> {
            *self.connected.lock() = true;
            Ok(())
        }
        fn disconnect(&self) {
            *self.connected.lock() = false;
        }
        fn is_connected(&self) -> bool {
            *self.connected.lock()
        }
        fn send(&self, bytes: &[u8]) -> Result<SendOutcome, ()> {
            self.sent.lock().push(bytes.to_vec());
            self.next_outcome.lock().take().unwrap_or(Ok(SendOutcome::Synchronous))
        }
        fn poll_events(&self) -> Vec<TransportEvent> {
            Vec::new()
        }
    }

    fn make_reporter(transport: StubTransport, kv: InMemoryNvKv) -> (Reporter, Arc<RwLock<Registry>>, Arc<PersistentRingStore>) {
        make_reporter_with_boot(transport, kv, false)
    }

    fn make_reporter_with_boot(
        transport: StubTransport,
        kv: InMemoryNvKv,
        boot_pending: bool,
    ) -> (Reporter, Arc<RwLock<Registry>>, Arc<PersistentRingStore>) {
        let registry = Arc::new(RwLock::new(Registry::new(8, 8)));
        // Pre-seed the persisted CRC to match the (empty) registry's current
        // one, so constructing a Reporter doesn't itself trigger a meta send
        // that would consume a stubbed transport outcome meant for data.
        platform_kv::store_meta_crc(&kv, registry.read().meta_crc());
        let cfg = StoreConfig {
            critical_size: 512,
            non_critical_size: 256,
            reporting_watermark_percent: 10,
            non_critical_overflow: OverflowPolicy::DropNew,
        };
        let region = Box::new(InMemoryResetRegion::cold(required_bytes(&cfg)));
        let store = Arc::new(PersistentRingStore::new(region, cfg, Box::new(NullSink)).unwrap());
        let reporter = Reporter::new(
            store.clone(),
            registry.clone(),
            Box::new(transport),
            Box::new(StubClock::new()),
            Box::new(kv),
            Duration::from_secs(1),
            Duration::from_secs(8),
            Duration::from_secs(30),
            4096,
            "1.0.0".to_string(),
            "deadbeef".to_string(),
            boot_pending,
        );
        (reporter, registry, store)
    }

    #[test]
    fn async_send_releases_critical_bytes_only_on_matching_ack() {
        let transport = StubTransport::default();
        *transport.connected.lock() = true;
        *transport.next_outcome.lock() = Some(Ok(SendOutcome::Async(7)));
        let (mut reporter, _registry, store) = make_reporter(transport, InMemoryNvKv::new());

        let point = DataPoint::Metric {
            tag: "t".to_string(),
            key: "k".to_string(),
            timestamp_us: 0,
            value: crate::store::record::Value::I32(1),
        };
        let mut bytes = Vec::new();
        point.encode(&mut bytes);
        store.write_critical(&bytes);

        let outcome = reporter.tick();
        assert_eq!(outcome, TickOutcome::SentAsync { id: 7 });
        assert!(matches!(reporter.state, CycleState::InFlight { id: 7, .. }));

        // Duplicate/unrelated ack: ignored, state stays in flight.
        reporter.on_transport_event(TransportEvent::SendSuccess { id: 999 });
        assert!(matches!(reporter.state, CycleState::InFlight { id: 7, .. }));

        reporter.on_transport_event(TransportEvent::SendSuccess { id: 7 });
        assert!(matches!(reporter.state, CycleState::Idle));

        // Late duplicate ack after release: no-op, does not panic or double-release.
        reporter.on_transport_event(TransportEvent::SendSuccess { id: 7 });
        assert!(matches!(reporter.state, CycleState::Idle));
    }

    #[test]
    fn watchdog_times_out_and_retries() {
        let transport = StubTransport::default();
        *transport.connected.lock() = true;
        *transport.next_outcome.lock() = Some(Ok(SendOutcome::Async(3)));
        let (mut reporter, _registry, store) = make_reporter(transport, InMemoryNvKv::new());

        let point = DataPoint::Metric {
            tag: "t".to_string(),
            key: "k".to_string(),
            timestamp_us: 0,
            value: crate::store::record::Value::I32(1),
        };
        let mut bytes = Vec::new();
        point.encode(&mut bytes);
        store.write_critical(&bytes);

        reporter.tick();
        assert!(matches!(reporter.state, CycleState::InFlight { id: 3, .. }));

        let clock = StubClock::new();
        clock.advance(Duration::from_secs(31));
        reporter.clock = Box::new(clock);
        reporter.check_watchdog();
        assert!(matches!(reporter.state, CycleState::Idle));
    }

    #[test]
    fn meta_republishes_only_when_crc_changes() {
        let transport = StubTransport::default();
        *transport.connected.lock() = true;
        let (mut reporter, registry, _store) = make_reporter(transport, InMemoryNvKv::new());
        registry
            .write()
            .register(
                Family::Metric,
                Descriptor {
                    tag: "sys",
                    key: "uptime",
                    label: "Uptime",
                    path: "sys.uptime",
                    data_type: DataType::U32,
                    unit: Some("s"),
                },
            )
            .unwrap();

        reporter.tick();
        let crc_after_first = reporter.persisted_meta_crc;
        assert_ne!(crc_after_first, 0);

        // No registry change: next tick must not re-send meta.
        reporter.tick();
        assert_eq!(reporter.persisted_meta_crc, crc_after_first);
    }

    #[test]
    fn boot_section_survives_send_failure() {
        let transport = StubTransport::default();
        *transport.connected.lock() = true;
        *transport.next_outcome.lock() = Some(Ok(SendOutcome::Async(42)));
        let (mut reporter, _registry, store) = make_reporter_with_boot(transport, InMemoryNvKv::new(), true);

        let point = DataPoint::Metric {
            tag: "t".to_string(),
            key: "k".to_string(),
            timestamp_us: 0,
            value: crate::store::record::Value::I32(1),
        };
        let mut bytes = Vec::new();
        point.encode(&mut bytes);
        store.write_critical(&bytes).unwrap();

        let outcome = reporter.tick();
        assert_eq!(outcome, TickOutcome::SentAsync { id: 42 });
        assert_eq!(reporter.boot_in_flight_id, Some(42));
        assert!(reporter.boot_pending);

        // A send failure leaves boot_pending set so it retries next cycle.
        reporter.on_transport_event(TransportEvent::SendFailed { id: 42 });
        assert!(reporter.boot_pending);
        assert_eq!(reporter.boot_in_flight_id, None);
        assert!(matches!(reporter.state, CycleState::Idle));
    }

    #[test]
    fn boot_section_clears_only_once_acked() {
        let transport = StubTransport::default();
        *transport.connected.lock() = true;
        *transport.next_outcome.lock() = Some(Ok(SendOutcome::Async(42)));
        let (mut reporter, _registry, store) = make_reporter_with_boot(transport, InMemoryNvKv::new(), true);

        let point = DataPoint::Metric {
            tag: "t".to_string(),
            key: "k".to_string(),
            timestamp_us: 0,
            value: crate::store::record::Value::I32(1),
        };
        let mut bytes = Vec::new();
        point.encode(&mut bytes);
        store.write_critical(&bytes).unwrap();

        let outcome = reporter.tick();
        assert_eq!(outcome, TickOutcome::SentAsync { id: 42 });
        assert!(reporter.boot_pending);

        reporter.on_transport_event(TransportEvent::SendSuccess { id: 42 });
        assert!(!reporter.boot_pending);
        assert_eq!(reporter.boot_in_flight_id, None);
    }

    #[test]
    fn idle_cycle_sends_nothing_and_does_not_touch_transport() {
        let transport = StubTransport::default();
        *transport.connected.lock() = true;
        let (mut reporter, _registry, _store) = make_reporter(transport, InMemoryNvKv::new());

        let outcome = reporter.tick();
        assert_eq!(outcome, TickOutcome::NothingToSend);
        assert!(matches!(reporter.state, CycleState::Idle));
    }
}
