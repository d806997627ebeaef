//! The shape of compiled handler bodies and the context they run with.
//!
//! A `FunDecl`'s `implementation` is an opaque callable rather than
//! bytecode this crate interprets — the compiler front end that would
//! produce bytecode is a separate concern this crate never touches. Each
//! invocation gets a [`HandlerCtx`] borrowing the owning instance's
//! variables and call-frame locals for the duration of the call, and
//! returns a [`HandlerOutcome`] telling the dispatcher what to do next.

use std::sync::Arc;

use crate::error::PrtError;
use crate::process::Process;
use crate::value::{Arg, EventIndex, ForeignOps, MachineId, StateIndex, Value};

/// What a handler invocation asks the dispatcher to do once it returns.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Ran to completion with no further control-flow request.
    Complete,
    /// `goto target, payload` — run current state's exit, transition to
    /// `target`, run its entry with `payload`.
    Goto { target: StateIndex, payload: Value },
    /// `raise event, payload` — processed before the next queue dequeue,
    /// re-entering handler resolution in the current state.
    Raise { event: EventIndex, payload: Value },
    /// `push target, payload` — suspends the current state on the
    /// instance's call stack and enters `target`; a later `pop` resumes
    /// the suspended state without re-running its entry.
    Push { target: StateIndex, payload: Value },
    /// `pop` — runs the current state's exit and resumes the state
    /// beneath it on the call stack. Fatal if the call stack is empty.
    Pop,
    /// `receive` — suspends the current function; the dispatcher records
    /// the case set and resumes by invoking the matching case's function
    /// once an admissible event arrives.
    Receive { receive_index: usize },
}

/// Borrowed execution context for one handler invocation (entry, exit,
/// transition function, do function, or receive-case continuation).
pub struct HandlerCtx<'a> {
    pub process: &'a Process,
    pub self_id: MachineId,
    payload: Value,
    vars: &'a mut Vec<Value>,
    locals: &'a mut Vec<Value>,
}

impl<'a> HandlerCtx<'a> {
    pub fn new(
        process: &'a Process,
        self_id: MachineId,
        payload: Value,
        vars: &'a mut Vec<Value>,
        locals: &'a mut Vec<Value>,
    ) -> Self {
        Self { process, self_id, payload, vars, locals }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn take_payload(&mut self) -> Value {
        std::mem::replace(&mut self.payload, Value::Null)
    }

    pub fn var(&self, index: usize) -> Result<&Value, PrtError> {
        self.vars
            .get(index)
            .ok_or_else(|| PrtError::BadIndex { what: format!("variable {index}") })
    }

    pub fn set_var(&mut self, index: usize, value: Value) -> Result<(), PrtError> {
        let slot = self
            .vars
            .get_mut(index)
            .ok_or_else(|| PrtError::BadIndex { what: format!("variable {index}") })?;
        *slot = value;
        Ok(())
    }

    pub fn local(&self, index: usize) -> Result<&Value, PrtError> {
        self.locals
            .get(index)
            .ok_or_else(|| PrtError::BadIndex { what: format!("local {index}") })
    }

    pub fn set_local(&mut self, index: usize, value: Value) -> Result<(), PrtError> {
        let slot = self
            .locals
            .get_mut(index)
            .ok_or_else(|| PrtError::BadIndex { what: format!("local {index}") })?;
        *slot = value;
        Ok(())
    }

    pub fn foreign_ops(&self) -> &dyn ForeignOps {
        self.process.program()
    }

    pub fn clone_value(&self, value: &Value) -> Value {
        value.clone_value(self.foreign_ops())
    }

    pub fn send(&self, target: &MachineId, event: EventIndex, payload: Value) -> Result<(), PrtError> {
        self.process.send_internal(self.self_id.clone(), target.clone(), event, payload)
    }

    pub fn mk_machine(
        &self,
        machine_def: &str,
        symbolic_name: Option<&str>,
        args: Vec<Arg>,
    ) -> Result<MachineId, PrtError> {
        self.process.mk_machine(machine_def, symbolic_name, args)
    }

    pub fn mk_symbolic_machine(
        &self,
        creator: crate::value::MachineDeclIndex,
        child_name: &str,
        args: Vec<Arg>,
    ) -> Result<MachineId, PrtError> {
        self.process.mk_symbolic_machine(creator, child_name, args)
    }

    pub fn assert(&self, cond: bool, message: impl Into<String>) -> Result<(), PrtError> {
        if cond {
            Ok(())
        } else {
            Err(PrtError::AssertionFailed { message: message.into() })
        }
    }

    pub fn announce(&self, event: EventIndex, payload: Value) {
        self.process.announce(event, payload);
    }
}

/// A compiled handler body: entry/exit/transition/do function, or a
/// receive-case continuation.
pub type HandlerFn = Arc<dyn Fn(&mut HandlerCtx<'_>) -> Result<HandlerOutcome, PrtError> + Send + Sync>;
