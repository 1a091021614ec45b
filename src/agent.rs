//! Top-level facade wiring Config, Store, Registry, Encoder, LogHook,
//! samplers, Reporter, and CommandDispatcher into one caller-owned value
//! (spec.md §9: "Global singleton... wrap as one `Agent` value owned by the
//! caller").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::command::{CommandDispatcher, RebootControl};
use crate::config::AgentConfig;
use crate::error::{AgentError, RegistryError};
use crate::platform_kv::{self, NvKv};
use crate::registry::{Descriptor, Family, Registry};
use crate::reporter::clock::Clock;
use crate::reporter::transport::{Transport, TransportEvent};
use crate::reporter::{Reporter, TickOutcome};
use crate::samplers::{HeapSampler, HeapSource, SampleSink, WifiSampler, WifiSource};
use crate::store::events::EventSink;
use crate::store::platform::ResetRegion;
use crate::store::record::Severity;
use crate::store::PersistentRingStore;
use crate::loghook::LogHook;

/// Everything needed to construct an [`Agent`], grouped so the constructor
/// doesn't take a dozen positional arguments in a row.
pub struct AgentDeps {
    pub region: Box<dyn ResetRegion>,
    pub event_sink: Box<dyn EventSink>,
    pub transport: Box<dyn Transport>,
    pub clock: Box<dyn Clock>,
    pub kv: Box<dyn NvKv>,
    pub reboot: Box<dyn RebootControl>,
    pub heap_source: Option<Box<dyn HeapSource>>,
    pub wifi_source: Option<Box<dyn WifiSource>>,
    pub station_mac: [u8; 6],
    pub fw_version: String,
    pub fw_sha256: String,
    /// Whether this boot followed a reset worth reporting in the boot
    /// section (panic, watchdog, brownout; see [`crate::store::platform::ResetCause`]).
    pub boot_pending: bool,
}

/// The on-device diagnostics agent: the single owned value an embedding
/// application constructs once at startup and drives from its own task
/// loop (spec.md §5: there is no internal scheduler, the caller's worker
/// tasks call `tick_reporter`/`sample_heap`/`sample_wifi`).
pub struct Agent {
    registry: Arc<RwLock<Registry>>,
    store: Arc<PersistentRingStore>,
    reporter: Reporter,
    command_dispatcher: CommandDispatcher,
    log_hook: Arc<LogHook>,
    heap_sampler: Option<HeapSampler>,
    wifi_sampler: Option<WifiSampler>,
    node_id: String,
    active: AtomicBool,
}

impl Agent {
    pub fn new(config: AgentConfig, deps: AgentDeps) -> Result<Self, AgentError> {
        let registry = Arc::new(RwLock::new(Registry::new(config.registry.max_metrics, config.registry.max_variables)));
        let store = Arc::new(PersistentRingStore::new(deps.region, config.store, deps.event_sink)?);

        let node_id = platform_kv::node_id(deps.kv.as_ref(), deps.station_mac);
        let reporting_enabled = Arc::new(AtomicBool::new(true));

        let log_hook = Arc::new(LogHook::new(store.clone(), Severity::Event));

        let heap_sampler = deps.heap_source.map(|source| {
            let sink = SampleSink::new(registry.clone(), store.clone());
            HeapSampler::new(source, sink)
        });
        let wifi_sampler = deps.wifi_source.map(|source| {
            let sink = SampleSink::new(registry.clone(), store.clone());
            WifiSampler::new(source, sink)
        });

        let reporter = Reporter::new(
            store.clone(),
            registry.clone(),
            deps.transport,
            deps.clock,
            deps.kv,
            config.reporter.min_period,
            config.reporter.max_period,
            config.reporter.ack_timeout,
            config.reporter.max_document_size,
            deps.fw_version,
            deps.fw_sha256,
            deps.boot_pending,
        );

        let command_dispatcher = CommandDispatcher::new(registry.clone(), reporting_enabled, deps.reboot);

        Ok(Self {
            registry,
            store,
            reporter,
            command_dispatcher,
            log_hook,
            heap_sampler,
            wifi_sampler,
            node_id,
            active: AtomicBool::new(true),
        })
    }

    /// Factory-provisioned or MAC-derived identifier (spec.md §6).
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register a metric descriptor. Must happen before any sampler reports
    /// under the same `(tag, key)` (spec.md §4.B).
    pub fn register_metric(&self, descriptor: Descriptor) -> Result<(), RegistryError> {
        self.registry.write().register(Family::Metric, descriptor)
    }

    /// Register a variable descriptor.
    pub fn register_variable(&self, descriptor: Descriptor) -> Result<(), RegistryError> {
        self.registry.write().register(Family::Variable, descriptor)
    }

    /// The [`tracing_subscriber::Layer`] the embedding application installs
    /// on its subscriber to route `tracing::error!`/`warn!`/`info!` into the
    /// critical stream.
    pub fn log_hook(&self) -> Arc<LogHook> {
        self.log_hook.clone()
    }

    /// Run one heap sample, if a [`HeapSource`] was supplied at construction.
    /// No-op after [`Agent::deinit`].
    pub fn sample_heap(&mut self) {
        if !self.is_active() {
            return;
        }
        if let Some(sampler) = &mut self.heap_sampler {
            sampler.sample();
        }
    }

    /// Run one Wi-Fi sample, if a [`WifiSource`] was supplied at
    /// construction. No-op after [`Agent::deinit`].
    pub fn sample_wifi(&mut self) {
        if !self.is_active() {
            return;
        }
        if let Some(sampler) = &mut self.wifi_sampler {
            sampler.sample();
        }
    }

    /// One pass of the Reporter's adaptive cycle, or `None` if whole-agent
    /// reporting is currently disabled via the command channel or the agent
    /// has been torn down with [`Agent::deinit`].
    pub fn tick_reporter(&mut self) -> Option<TickOutcome> {
        if !self.is_active() || !self.command_dispatcher.reporting_enabled() {
            return None;
        }
        Some(self.reporter.tick())
    }

    /// Feed one transport-posted event (ack, failure, or a received
    /// command document) into the agent. Ignored after [`Agent::deinit`]
    /// (spec.md §5 Cancellation: "an in-flight send is abandoned; its ack,
    /// if later received, is ignored because the dispatcher is gone").
    pub fn on_transport_event(&mut self, event: TransportEvent) {
        if !self.is_active() {
            return;
        }
        if let TransportEvent::Recv(bytes) = &event {
            let _reply = self.command_dispatcher.dispatch(bytes);
            // Posting `_reply` back to the transport is the caller's
            // responsibility: this crate has no send-side knowledge of
            // which channel a command arrived on.
            return;
        }
        self.reporter.on_transport_event(event);
    }

    /// Decode and process one inbound command document directly, returning
    /// the CBOR-encoded `{status}` reply (spec.md §4.G). Use this when the
    /// embedding application routes command documents outside the
    /// Transport's generic event stream. Returns an empty reply after
    /// [`Agent::deinit`].
    pub fn dispatch_command(&self, doc_bytes: &[u8]) -> Vec<u8> {
        if !self.is_active() {
            return Vec::new();
        }
        self.command_dispatcher.dispatch(doc_bytes)
    }

    /// Direct access to the store, for advanced callers (diagnostics CLI,
    /// tests).
    pub fn store(&self) -> &Arc<PersistentRingStore> {
        &self.store
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Tear the agent down (spec.md §5 Cancellation): disconnects the
    /// transport, unregisters the log hook, and marks every other operation
    /// a no-op. Idempotent. No internal timers to stop (samplers are driven
    /// by the caller's own loop, not owned by this crate) and no locks held
    /// across calls, so those two legs of the contract are trivially
    /// satisfied by construction.
    pub fn deinit(&mut self) {
        if !self.active.swap(false, Ordering::Relaxed) {
            return;
        }
        self.reporter.disconnect_transport();
        self.log_hook.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::RecordingRebootControl;
    use crate::config::{RegistryConfig, ReporterConfig, StoreConfig};
    use crate::platform_kv::InMemoryNvKv;
    use crate::reporter::clock::SystemClock;
    use crate::reporter::transport::SendOutcome;
    use crate::store::events::NullSink;
    use crate::store::platform::InMemoryResetRegion;
    use crate::store::required_bytes;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct StubTransport {
        connected: PlMutex<bool>,
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
        fn send(&self, _bytes: &[u8]) -> Result<SendOutcome, ()> {
            Ok(SendOutcome::Synchronous)
        }
        fn poll_events(&self) -> Vec<TransportEvent> {
            Vec::new()
        }
    }

    fn test_agent() -> Agent {
        let store_cfg = StoreConfig {
            critical_size: 512,
            non_critical_size: 256,
            reporting_watermark_percent: 10,
            non_critical_overflow: crate::config::OverflowPolicy::DropNew,
        };
        let config = AgentConfig {
            store: store_cfg,
            registry: RegistryConfig {
                max_metrics: 8,
                max_variables: 8,
            },
            reporter: ReporterConfig::default(),
        };
        let deps = AgentDeps {
            region: Box::new(InMemoryResetRegion::cold(required_bytes(&store_cfg))),
            event_sink: Box::new(NullSink),
            transport: Box::new(StubTransport::default()),
            clock: Box::new(SystemClock),
            kv: Box::new(InMemoryNvKv::new()),
            reboot: Box::new(RecordingRebootControl::new()),
            heap_source: None,
            wifi_source: None,
            station_mac: [0u8; 6],
            fw_version: "1.0.0".to_string(),
            fw_sha256: "deadbeef".to_string(),
            boot_pending: false,
        };
        Agent::new(config, deps).unwrap()
    }

    #[test]
    fn deinit_disconnects_transport_and_stops_further_ticks() {
        let mut agent = test_agent();
        assert_eq!(agent.tick_reporter(), Some(TickOutcome::NotConnected));

        agent.deinit();
        assert_eq!(agent.tick_reporter(), None);

        // Idempotent: a second deinit is a no-op, not a double-disconnect panic.
        agent.deinit();
        assert_eq!(agent.tick_reporter(), None);
    }

    #[test]
    fn dispatch_command_is_ignored_after_deinit() {
        let mut agent = test_agent();
        agent.deinit();
        assert!(agent.dispatch_command(&[0xff, 0x00]).is_empty());
    }
}
