//! Runtime core for the P language: loads a pre-built program declaration
//! tree, instantiates machines from it, and drives their event queues
//! through a dispatcher under either of two scheduling policies.
//!
//! This crate is the engine room only. Parsing and compiling P source,
//! implementing foreign types, wiring a host's own I/O, and any
//! spec-monitor backend all live outside it; a host embeds `p-runtime` by
//! building a [`program::Program`], starting a [`process::Process`] with
//! it, and calling [`process::Process::run_worker`] from as many threads
//! as its chosen [`config::SchedulingPolicy`] wants.

#![forbid(unsafe_code)]

pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod machine;
pub mod process;
pub mod program;
pub mod scheduler;
pub mod value;

pub use callback::{ErrorFn, LogFn, LogKind, LogRecord, MachineStateSnapshot, MonitorSink};
pub use config::{CrossProcessIdPolicy, RuntimeConfig, SchedulingPolicy};
pub use error::{ErrorSeverity, IllegalSendReason, PrtError, PrtErrorCode};
pub use handler::{HandlerCtx, HandlerFn, HandlerOutcome};
pub use machine::{LastOperation, MachineId, MachineInstance};
pub use process::Process;
pub use program::{
    DoDecl, EventDecl, EventSet, ForeignTypeDecl, FunDecl, MachineDecl, Program, ProgramBuilder,
    ReceiveCase, ReceiveDecl, StateDecl, TransDecl, VarDecl,
};
pub use dispatcher::StepOutcome;
pub use scheduler::{ProcessStepOutcome, SchedulerOutcome};
pub use value::{
    Arg, EventIndex, EventRef, FieldKey, ForeignOps, ForeignTypeIndex, ForeignValue, FunIndex,
    MachineDeclIndex, ParamStatus, StateIndex, Type, Value,
};
