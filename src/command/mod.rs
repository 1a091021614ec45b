//! Inbound command-document parsing and dispatch (spec.md §4.G).
//!
//! Accepts `{ver, ts, sha256, config:[ {n:[path…], v: value}, … ]}`, walks
//! each entry's dotted path into a command table, and replies with
//! `{status: success | payload_error | internal_error}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use minicbor::data::Type;
use minicbor::Decoder;
use parking_lot::RwLock;

use crate::encode::encode_to_vec;
use crate::error::CommandError;
use crate::registry::Registry;

/// Deferred reboot, injected since actually resetting the device is a
/// platform operation outside this crate's scope (mirrors `Transport`,
/// `Clock`, `NvKv`: the seam is the contract, not the mechanism).
pub trait RebootControl: Send + Sync {
    fn schedule_reboot(&self, delay: Duration);
}

/// Test/host double recording the requested delay.
#[derive(Default)]
pub struct RecordingRebootControl {
    requested: parking_lot::Mutex<Vec<Duration>>,
}

impl RecordingRebootControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<Duration> {
        self.requested.lock().clone()
    }
}

impl RebootControl for RecordingRebootControl {
    fn schedule_reboot(&self, delay: Duration) {
        self.requested.lock().push(delay);
    }
}

/// A decoded value from a command entry's `v` field.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    Str(String),
    Null,
}

struct CommandEntry {
    path: Vec<String>,
    value: CommandValue,
}

struct CommandDoc {
    entries: Vec<CommandEntry>,
}

fn decode_value(dec: &mut Decoder) -> Result<CommandValue, CommandError> {
    let ty = dec.datatype().map_err(|_| CommandError::PayloadError)?;
    match ty {
        Type::Bool => Ok(CommandValue::Bool(dec.bool().map_err(|_| CommandError::PayloadError)?)),
        Type::U8 | Type::U16 | Type::U32 | Type::U64 => {
            Ok(CommandValue::U32(dec.u32().map_err(|_| CommandError::PayloadError)?))
        }
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => {
            Ok(CommandValue::I32(dec.i32().map_err(|_| CommandError::PayloadError)?))
        }
        Type::F16 | Type::F32 | Type::F64 => Ok(CommandValue::F32(dec.f32().map_err(|_| CommandError::PayloadError)?)),
        Type::String => Ok(CommandValue::Str(dec.str().map_err(|_| CommandError::PayloadError)?.to_string())),
        Type::Null | Type::Undefined => {
            dec.skip().map_err(|_| CommandError::PayloadError)?;
            Ok(CommandValue::Null)
        }
        _ => Err(CommandError::PayloadError),
    }
}

fn decode_path(dec: &mut Decoder) -> Result<Vec<String>, CommandError> {
    let n = dec.array().map_err(|_| CommandError::PayloadError)?.ok_or(CommandError::PayloadError)?;
    let mut path = Vec::with_capacity(n as usize);
    for _ in 0..n {
        path.push(dec.str().map_err(|_| CommandError::PayloadError)?.to_string());
    }
    Ok(path)
}

fn decode_entry(dec: &mut Decoder) -> Result<CommandEntry, CommandError> {
    let n = dec.map().map_err(|_| CommandError::PayloadError)?.ok_or(CommandError::PayloadError)?;
    let mut path = None;
    let mut value = None;
    for _ in 0..n {
        let key = dec.str().map_err(|_| CommandError::PayloadError)?;
        match key {
            "n" => path = Some(decode_path(dec)?),
            "v" => value = Some(decode_value(dec)?),
            _ => dec.skip().map_err(|_| CommandError::PayloadError)?,
        }
    }
    Ok(CommandEntry {
        path: path.ok_or(CommandError::PayloadError)?,
        value: value.ok_or(CommandError::PayloadError)?,
    })
}

fn decode_command_doc(bytes: &[u8]) -> Result<CommandDoc, CommandError> {
    let mut dec = Decoder::new(bytes);
    let n = dec.map().map_err(|_| CommandError::PayloadError)?.ok_or(CommandError::PayloadError)?;
    let mut ver = None;
    let mut sha256 = None;
    let mut entries = None;
    for _ in 0..n {
        let key = dec.str().map_err(|_| CommandError::PayloadError)?;
        match key {
            "ver" => ver = Some(dec.str().map_err(|_| CommandError::PayloadError)?.to_string()),
            "ts" => {
                dec.u64().map_err(|_| CommandError::PayloadError)?;
            }
            "sha256" => sha256 = Some(dec.str().map_err(|_| CommandError::PayloadError)?.to_string()),
            "config" => {
                let n = dec.array().map_err(|_| CommandError::PayloadError)?.ok_or(CommandError::PayloadError)?;
                let mut v = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    v.push(decode_entry(&mut dec)?);
                }
                entries = Some(v);
            }
            _ => dec.skip().map_err(|_| CommandError::PayloadError)?,
        }
    }
    // Top-level sanity (spec.md §4.G): `ver`/`sha256` must be text strings,
    // `config` must be an array. Any missing field short-circuits.
    ver.ok_or(CommandError::PayloadError)?;
    sha256.ok_or(CommandError::PayloadError)?;
    Ok(CommandDoc {
        entries: entries.ok_or(CommandError::PayloadError)?,
    })
}

fn status_str(status: Result<(), CommandError>) -> &'static str {
    match status {
        Ok(()) => "success",
        Err(CommandError::PayloadError) => "payload_error",
        Err(CommandError::InternalError) => "internal_error",
    }
}

fn encode_status(status: Result<(), CommandError>) -> Vec<u8> {
    encode_to_vec(|enc| {
        enc.map(1)?.str("status")?.str(status_str(status))?;
        Ok(())
    })
}

pub(crate) type CommandHandler = Box<dyn Fn(&CommandDispatcher, &CommandValue) -> Result<(), CommandError> + Send + Sync>;

/// Parses inbound command documents and dispatches each entry by its full
/// dotted path (spec.md §4.G: "not the legacy by-key lookup"). Registered
/// handlers mutate Registry flags, schedule a reboot, or toggle whole-agent
/// reporting; a `["group", tag, "enabled"]` path is handled generically
/// since tags are interned at runtime, not known at construction time.
pub struct CommandDispatcher {
    registry: Arc<RwLock<Registry>>,
    reporting_enabled: Arc<AtomicBool>,
    reboot: Box<dyn RebootControl>,
    table: Vec<(Vec<String>, CommandHandler)>,
}

const REBOOT_DELAY: Duration = Duration::from_secs(5);

impl CommandDispatcher {
    pub fn new(registry: Arc<RwLock<Registry>>, reporting_enabled: Arc<AtomicBool>, reboot: Box<dyn RebootControl>) -> Self {
        let mut dispatcher = Self {
            registry,
            reporting_enabled,
            reboot,
            table: Vec::new(),
        };
        dispatcher.register_builtin_commands();
        dispatcher
    }

    fn register_builtin_commands(&mut self) {
        self.table.push((
            vec!["system".to_string(), "reboot".to_string()],
            Box::new(|d: &CommandDispatcher, _v: &CommandValue| -> Result<(), CommandError> {
                d.reboot.schedule_reboot(REBOOT_DELAY);
                Ok(())
            }),
        ));
        self.table.push((
            vec!["system".to_string(), "reporting".to_string(), "enabled".to_string()],
            Box::new(|d: &CommandDispatcher, v: &CommandValue| -> Result<(), CommandError> {
                match v {
                    CommandValue::Bool(b) => {
                        d.reporting_enabled.store(*b, Ordering::Relaxed);
                        Ok(())
                    }
                    _ => Err(CommandError::PayloadError),
                }
            }),
        ));
    }

    /// Whether the Reporter's worker loop should currently run. Mutated by
    /// `["system", "reporting", "enabled"]`.
    pub fn reporting_enabled(&self) -> bool {
        self.reporting_enabled.load(Ordering::Relaxed)
    }

    /// Register an additional command handler at a fixed dotted path.
    pub(crate) fn register_command(&mut self, path: Vec<String>, handler: CommandHandler) {
        self.table.push((path, handler));
    }

    /// Decode and process one inbound command document, returning the
    /// CBOR-encoded `{status}` reply.
    pub fn dispatch(&self, doc_bytes: &[u8]) -> Vec<u8> {
        let result = self.process(doc_bytes);
        encode_status(result)
    }

    fn process(&self, doc_bytes: &[u8]) -> Result<(), CommandError> {
        let doc = decode_command_doc(doc_bytes)?;
        for entry in &doc.entries {
            self.dispatch_one(&entry.path, &entry.value)?;
        }
        Ok(())
    }

    fn dispatch_one(&self, path: &[String], value: &CommandValue) -> Result<(), CommandError> {
        if path.len() == 3 && path[0] == "group" && path[2] == "enabled" {
            let enabled = match value {
                CommandValue::Bool(b) => *b,
                _ => return Err(CommandError::PayloadError),
            };
            return if self.registry.write().set_group_enabled(&path[1], enabled) {
                Ok(())
            } else {
                Err(CommandError::PayloadError)
            };
        }
        for (registered_path, handler) in &self.table {
            if registered_path.as_slice() == path {
                return handler(self, value);
            }
        }
        Err(CommandError::PayloadError)
    }
}
