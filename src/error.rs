//! The runtime's error taxonomy.

use crate::value::{EventIndex, MachineId, StateIndex};

/// Why a `Send` was rejected before the event ever reached a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalSendReason {
    /// The target machine has already halted.
    Halted,
    /// No machine with that id exists in this process.
    NotFound,
}

impl std::fmt::Display for IllegalSendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IllegalSendReason::Halted => write!(f, "machine has halted"),
            IllegalSendReason::NotFound => write!(f, "machine not found"),
        }
    }
}

/// Every fallible runtime-internal operation returns `Result<T, PrtError>`.
/// Recoverable variants (`QueueFull`, `IllegalSend`, `BadIndex`,
/// `TypeMismatch`, `AssertionFailed`, `ForeignError`) are reported to the
/// host through `ErrorFn` and, where raised from inside a handler, may be
/// caught by the dispatcher and turned into a halt of just that machine.
/// `InternalInvariant` indicates a runtime bug and is always fatal to the
/// process.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PrtError {
    #[error("queue full: event {event} exceeds max instances ({max})")]
    QueueFull { event: EventIndex, max: u32 },

    #[error("unhandled event {event} in state {state}")]
    UnhandledEvent { event: EventIndex, state: StateIndex },

    #[error("illegal send to machine {machine}: {reason}")]
    IllegalSend {
        machine: MachineId,
        reason: IllegalSendReason,
    },

    #[error("bad index: {what}")]
    BadIndex { what: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("assertion failed: {message}")]
    AssertionFailed { message: String },

    #[error("foreign callback failed: {message}")]
    ForeignError { message: String },

    #[error("internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl PrtError {
    /// The stable code surfaced to `ErrorFn`, independent of the
    /// variant's carried data.
    pub fn code(&self) -> PrtErrorCode {
        match self {
            PrtError::QueueFull { .. } => PrtErrorCode::QueueFull,
            PrtError::UnhandledEvent { .. } => PrtErrorCode::UnhandledEvent,
            PrtError::IllegalSend { .. } => PrtErrorCode::IllegalSend,
            PrtError::BadIndex { .. } => PrtErrorCode::BadIndex,
            PrtError::TypeMismatch { .. } => PrtErrorCode::TypeMismatch,
            PrtError::AssertionFailed { .. } => PrtErrorCode::AssertionFailed,
            PrtError::ForeignError { .. } => PrtErrorCode::ForeignError,
            PrtError::InternalInvariant { .. } => PrtErrorCode::InternalInvariant,
        }
    }

    /// How the dispatcher should propagate this error once `ErrorFn` has
    /// been called.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PrtError::AssertionFailed { .. } => ErrorSeverity::ProcessTerminating,
            PrtError::InternalInvariant { .. } => ErrorSeverity::Fatal,
            _ => ErrorSeverity::RecoverableInstanceHalt,
        }
    }
}

/// What the dispatcher does after reporting a [`PrtError`] to the host's
/// `ErrorFn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// `QueueFull`, `UnhandledEvent`, `IllegalSend`, `BadIndex`,
    /// `TypeMismatch`, `ForeignError` — halt the offending instance and
    /// continue the process.
    RecoverableInstanceHalt,
    /// `AssertionFailed` — halt the offending instance and begin
    /// terminating the whole process.
    ProcessTerminating,
    /// `InternalInvariant` — a runtime bug; abort.
    Fatal,
}

/// The code half of the `ErrorFn(process, code, snapshot, message)`
/// callback signature — a fixed-cardinality tag with no carried data, so
/// a host can match on it without string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrtErrorCode {
    QueueFull,
    UnhandledEvent,
    IllegalSend,
    BadIndex,
    TypeMismatch,
    AssertionFailed,
    ForeignError,
    InternalInvariant,
}
