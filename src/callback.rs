//! The host-facing callback ABI: `ErrorFn` and `LogFn`, supplied once to
//! `Process::start` and invoked from inside the dispatcher.

use std::sync::Arc;

use crate::error::PrtErrorCode;
use crate::process::Process;
use crate::value::{EventIndex, MachineId, StateIndex, Value};

/// A point-in-time description of a machine instance, passed to both
/// callbacks so a host can render a diagnostic without reaching back into
/// the process' internals (which may already be torn down by the time the
/// callback runs, in the fatal-error case).
#[derive(Debug, Clone)]
pub struct MachineStateSnapshot {
    pub machine_id: Option<MachineId>,
    pub machine_name: String,
    pub state_id: StateIndex,
    pub state_name: String,
}

/// Distinguishes the occasions `LogFn` is invoked for. `Announce` and
/// `Halt` don't correspond to a queue dequeue but still need a durable
/// record distinct from the `tracing` side-channel (see module docs on
/// `dispatcher`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Send,
    Dequeue,
    Transition,
    Do,
    Halt,
    Announce,
}

/// One entry in the durable dispatch log a host's `LogFn` receives. Tests
/// that count dispatch-entry occurrences (a ping-pong exchange producing
/// twenty log entries, say) count these records, not the `tracing`
/// instrumentation, which is advisory and may be filtered independently.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub kind: LogKind,
    pub machine: MachineStateSnapshot,
    pub event: Option<EventIndex>,
    pub payload: Option<Arc<Value>>,
}

/// Invoked whenever the runtime reports an error to the host, whether
/// recoverable (halts the offending machine) or fatal (tears down the
/// process after this call returns).
pub type ErrorFn =
    Arc<dyn Fn(&Process, PrtErrorCode, MachineStateSnapshot, &str) + Send + Sync>;

/// Invoked for every entry in the durable dispatch log.
pub type LogFn = Arc<dyn Fn(LogRecord) + Send + Sync>;

/// Receives events passed to `Process::announce`. No implementation ships
/// in this crate; a host wires one in to connect a spec-monitor backend.
pub trait MonitorSink: Send + Sync {
    fn on_announce(&self, event: EventIndex, payload: &Value);
}
