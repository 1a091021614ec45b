//! On-device diagnostics agent.
//!
//! Gathers three classes of telemetry (critical log records, periodic
//! metrics, and named variables), batches them into compact binary
//! documents, and ships them to a cloud collector over a pluggable
//! transport. A small command channel lets the collector toggle reporting
//! at runtime. See [`agent::Agent`] for the entry point.

pub mod agent;
pub mod command;
pub mod config;
pub mod encode;
pub mod error;
pub mod loghook;
pub mod platform_kv;
pub mod registry;
pub mod reporter;
pub mod samplers;
pub mod store;

pub use agent::{Agent, AgentDeps};
pub use error::AgentError;
