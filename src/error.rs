//! Error kinds surfaced to callers (spec.md §7).

use thiserror::Error;

/// Top-level error returned by public `Agent` operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AgentError {
    /// Null/out-of-bounds parameter, type mismatch, or pointer not in the
    /// expected segment.
    #[error("invalid argument")]
    InvalidArgument,
    /// Operation called before init / after deinit, or while a conflicting
    /// operation is in progress.
    #[error("invalid state")]
    InvalidState,
    /// Registry lookup miss.
    #[error("not found")]
    NotFound,
    /// Ring stream full.
    #[error("out of memory")]
    OutOfMemory,
    /// Registry table full.
    #[error("out of capacity")]
    OutOfCapacity,
    /// Transport returned an error or timed out.
    #[error("transport error")]
    TransportError,
    /// Reset-surviving memory predicates were violated post-reset.
    #[error("integrity error")]
    IntegrityError,
}

/// Errors from [`crate::store::PersistentRingStore`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Parameter failed validation (null tag pointer, zero length, non-static
    /// `tag_ref`).
    #[error("invalid argument")]
    InvalidArgument,
    /// The store has not been initialized, or initialization failed.
    #[error("invalid state")]
    InvalidState,
    /// Not enough free space under the configured overflow policy.
    #[error("out of memory")]
    OutOfMemory,
    /// Non-blocking lock acquisition failed (non-critical stream only).
    #[error("lock contended")]
    WouldBlock,
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidArgument => AgentError::InvalidArgument,
            StoreError::InvalidState => AgentError::InvalidState,
            StoreError::OutOfMemory => AgentError::OutOfMemory,
            StoreError::WouldBlock => AgentError::InvalidState,
        }
    }
}

/// Errors from [`crate::registry::Registry`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// `tag`/`key`/`label`/`path` was empty, or the declared type did not
    /// match the registered type.
    #[error("invalid argument")]
    InvalidArgument,
    /// `(tag, key)` already registered.
    #[error("already exists")]
    AlreadyExists,
    /// `(tag, key)` not found (unregister / set_unit / report on unknown
    /// descriptor).
    #[error("not found")]
    NotFound,
    /// Descriptor table is at its build-time capacity.
    #[error("out of capacity")]
    OutOfCapacity,
}

impl From<RegistryError> for AgentError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidArgument => AgentError::InvalidArgument,
            RegistryError::AlreadyExists => AgentError::InvalidArgument,
            RegistryError::NotFound => AgentError::NotFound,
            RegistryError::OutOfCapacity => AgentError::OutOfCapacity,
        }
    }
}

/// Errors from [`crate::command::CommandDispatcher`] parsing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Top-level sanity check failed (`ver`/`sha256` not text, `config` not
    /// an array, or the document did not decode as CBOR at all).
    #[error("payload error")]
    PayloadError,
    /// A registered command handler failed.
    #[error("internal error")]
    InternalError,
}
