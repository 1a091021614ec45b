//! Pluggable transport contract (spec.md §6).
//!
//! The concrete MQTT/HTTPS glue is explicitly out of scope (spec.md §1);
//! this crate only defines the seam.

/// An event the transport posts asynchronously (spec.md §6: "three events
/// on a shared event base").
#[derive(Debug, Clone)]
pub enum TransportEvent {
    SendSuccess { id: i32 },
    SendFailed { id: i32 },
    Recv(Vec<u8>),
}

/// Result of a `send` call (spec.md §6): `-1` maps to `Err`, `0` to
/// `Ok(SendOutcome::Synchronous)`, a positive id to `Ok(SendOutcome::Async)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted and already acknowledged; no further event will arrive.
    Synchronous,
    /// Accepted; a `SendSuccess`/`SendFailed` event with this id follows.
    Async(i32),
}

/// Injected network transport.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), ()>;
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn send(&self, bytes: &[u8]) -> Result<SendOutcome, ()>;
    /// Drain queued events without blocking.
    fn poll_events(&self) -> Vec<TransportEvent>;
}
