//! Executes one bounded unit of work — a dispatcher "step" — against a
//! single machine instance: dequeue one admissible event (or resume a
//! pending `receive`), resolve it against the current state's
//! transitions and do-handlers, and run any cascading `raise`/`goto`/
//! `push`/`pop` synchronously before the step returns.
//!
//! A step never spans more than one dequeued event: `raise` is always
//! processed before the next queue dequeue, so the cascade loop here
//! keeps re-resolving within the same step rather than yielding back to
//! the scheduler.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::callback::{LogKind, LogRecord, MachineStateSnapshot};
use crate::error::{ErrorSeverity, PrtError};
use crate::handler::{HandlerCtx, HandlerOutcome};
use crate::machine::{self, MachineInstance, MachineState};
use crate::process::Process;
use crate::program::MachineDecl;
use crate::value::{EventIndex, FunIndex, Value};

/// Whether a call to [`step`] did useful work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Progressed,
    Idle,
}

/// Attempts one step against `instance`. Returns `Idle` without side
/// effects if another worker is already stepping this instance, if it
/// has halted, or if no event in its queue is currently admissible.
///
/// `is_running`'s compare-exchange is the instance's actual single-writer
/// gate — not a side effect of holding `state`'s `Mutex`. The `MachineState`
/// itself is checked out of its `Mutex` for the whole step (`mem::take`,
/// restored on every return path) rather than left behind a held guard, so
/// a handler body invoked partway through — including one that `ctx.send`s
/// to this very instance — never re-enters `state`'s lock. Only `enqueue`'s
/// much narrower `mailbox` lock is ever touched from inside a handler.
pub fn step(process: &Process, instance: &Arc<MachineInstance>) -> StepOutcome {
    if instance.is_halted() {
        return StepOutcome::Idle;
    }
    if instance
        .is_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return StepOutcome::Idle;
    }

    let mut st = std::mem::take(&mut *instance.state.lock());

    let dequeued = {
        let mut mailbox = instance.mailbox.lock();
        machine::try_dequeue(&st, &mut mailbox)
    };
    let Some((event, payload)) = dequeued else {
        *instance.state.lock() = st;
        instance.is_running.store(false, Ordering::Release);
        return StepOutcome::Idle;
    };

    let snapshot = snapshot_of(process, instance, &st);
    process.log(LogRecord {
        kind: LogKind::Dequeue,
        machine: snapshot.clone(),
        event: Some(event),
        payload: Some(Arc::new(payload.clone_value(process.program()))),
    });
    tracing::trace!(target: "p_runtime::dispatcher", machine = %instance.id, event, "dequeue");

    let result = run_cascade(process, instance, &mut st, event, payload);

    if let Err(err) = &result {
        let snapshot = snapshot_of(process, instance, &st);
        tracing::error!(target: "p_runtime::dispatcher", machine = %instance.id, error = %err, "handler error");
        process.report_error(err, snapshot);

        if !matches!(err.severity(), ErrorSeverity::Fatal) {
            instance.mark_halted();
            process.log(LogRecord {
                kind: LogKind::Halt,
                machine: snapshot_of(process, instance, &st),
                event: None,
                payload: None,
            });
        }

        match err.severity() {
            ErrorSeverity::ProcessTerminating => {
                *instance.state.lock() = st;
                process.request_termination();
                instance.is_running.store(false, Ordering::Release);
                return StepOutcome::Progressed;
            }
            ErrorSeverity::Fatal => {
                *instance.state.lock() = st;
                instance.is_running.store(false, Ordering::Release);
                panic!("p-runtime internal invariant violated: {err}");
            }
            ErrorSeverity::RecoverableInstanceHalt => {}
        }
    }

    *instance.state.lock() = st;
    instance.is_running.store(false, Ordering::Release);
    StepOutcome::Progressed
}

fn snapshot_of(process: &Process, instance: &MachineInstance, st: &MachineState) -> MachineStateSnapshot {
    let decl = &process.program().machines[instance.instance_of as usize];
    let state_decl = &decl.states[st.state_id as usize];
    MachineStateSnapshot {
        machine_id: Some(instance.id.clone()),
        machine_name: instance.symbolic_name.clone(),
        state_id: st.state_id,
        state_name: state_decl.name.clone(),
    }
}

/// Resolves one event against the current state and then any events that
/// cascade from `raise`, looping until the instance settles (returns
/// `Ok(())`) or an error halts it.
fn run_cascade(
    process: &Process,
    instance: &Arc<MachineInstance>,
    st: &mut MachineState,
    mut event: EventIndex,
    mut payload: Value,
) -> Result<(), PrtError> {
    let decl = &process.program().machines[instance.instance_of as usize];

    loop {
        if let Some(recv) = st.receive.take() {
            if recv.case_set.contains(event) {
                let fun_idx = recv.issuing_fun;
                let case = decl.funs[fun_idx as usize]
                    .receives
                    .get(recv.receive_index)
                    .and_then(|r| r.cases.iter().find(|c| c.trigger_event == event))
                    .ok_or_else(|| PrtError::InternalInvariant {
                        message: "receive case set admitted an event with no matching case".into(),
                    })?
                    .clone();
                let outcome = invoke_fun(process, instance, st, case.fun, payload)?;
                match resolve_outcome(process, instance, st, decl, outcome)? {
                    Some((next_event, next_payload)) => {
                        event = next_event;
                        payload = next_payload;
                        continue;
                    }
                    None => return Ok(()),
                }
            } else {
                st.receive = Some(recv);
            }
        }

        let state_id = st.state_id;
        let state_decl = &decl.states[state_id as usize];

        if let Some(trans) = state_decl.transition_for(event).cloned() {
            tracing::debug!(target: "p_runtime::dispatcher", machine = %instance.id, from = state_id, to = trans.dest_state_index, "transition");
            if let Some(exit_fun) = state_decl.exit_fun {
                let outcome = invoke_fun(process, instance, st, exit_fun, Value::Null)?;
                if let Some((e, p)) = resolve_outcome(process, instance, st, decl, outcome)? {
                    event = e;
                    payload = p;
                    continue;
                }
            }
            if let Some(trans_fun) = trans.trans_fun {
                let outcome = invoke_fun(process, instance, st, trans_fun, payload.clone_value(process.program()))?;
                if let Some((e, p)) = resolve_outcome(process, instance, st, decl, outcome)? {
                    event = e;
                    payload = p;
                    continue;
                }
            }
            st.state_id = trans.dest_state_index;
            st.deferred_set = decl.states[trans.dest_state_index as usize].defers_set.clone();
            process.log(LogRecord {
                kind: LogKind::Transition,
                machine: snapshot_of(process, instance, st),
                event: Some(event),
                payload: None,
            });
            if let Some(entry_fun) = decl.states[trans.dest_state_index as usize].entry_fun {
                let outcome = invoke_fun(process, instance, st, entry_fun, payload)?;
                match resolve_outcome(process, instance, st, decl, outcome)? {
                    Some((e, p)) => {
                        event = e;
                        payload = p;
                        continue;
                    }
                    None => return Ok(()),
                }
            }
            return Ok(());
        }

        if let Some(do_decl) = state_decl.do_for(event).cloned() {
            process.log(LogRecord {
                kind: LogKind::Do,
                machine: snapshot_of(process, instance, st),
                event: Some(event),
                payload: None,
            });
            let outcome = invoke_fun(process, instance, st, do_decl.do_fun, payload)?;
            match resolve_outcome(process, instance, st, decl, outcome)? {
                Some((e, p)) => {
                    event = e;
                    payload = p;
                    continue;
                }
                None => return Ok(()),
            }
        }

        return Err(PrtError::UnhandledEvent { event, state: state_id });
    }
}

/// Interprets a single [`HandlerOutcome`], running whatever exit/entry
/// calls it implies and recursing for outcomes it itself produces
/// (an entry that immediately raises, a push whose entry gotos again,
/// and so on). Returns the next `(event, payload)` to resolve if the
/// outcome chain ends in a `raise`, or `None` once it settles.
fn resolve_outcome(
    process: &Process,
    instance: &Arc<MachineInstance>,
    st: &mut MachineState,
    decl: &MachineDecl,
    outcome: HandlerOutcome,
) -> Result<Option<(EventIndex, Value)>, PrtError> {
    match outcome {
        HandlerOutcome::Complete => Ok(None),
        HandlerOutcome::Raise { event, payload } => Ok(Some((event, payload))),
        HandlerOutcome::Goto { target, payload } => {
            let cur = st.state_id;
            if let Some(exit_fun) = decl.states[cur as usize].exit_fun {
                let outcome = invoke_fun(process, instance, st, exit_fun, Value::Null)?;
                if let Some(next) = resolve_outcome(process, instance, st, decl, outcome)? {
                    return Ok(Some(next));
                }
            }
            st.state_id = target;
            st.deferred_set = decl.states[target as usize].defers_set.clone();
            process.log(LogRecord {
                kind: LogKind::Transition,
                machine: snapshot_of(process, instance, st),
                event: None,
                payload: None,
            });
            if let Some(entry_fun) = decl.states[target as usize].entry_fun {
                let outcome = invoke_fun(process, instance, st, entry_fun, payload)?;
                resolve_outcome(process, instance, st, decl, outcome)
            } else {
                Ok(None)
            }
        }
        HandlerOutcome::Push { target, payload } => {
            let saved_locals = std::mem::take(&mut st.locals);
            st.call_stack.push(machine::CallFrame { return_state: st.state_id, locals: saved_locals });
            st.state_id = target;
            st.deferred_set = decl.states[target as usize].defers_set.clone();
            if let Some(entry_fun) = decl.states[target as usize].entry_fun {
                let outcome = invoke_fun(process, instance, st, entry_fun, payload)?;
                resolve_outcome(process, instance, st, decl, outcome)
            } else {
                Ok(None)
            }
        }
        HandlerOutcome::Pop => {
            let cur = st.state_id;
            if let Some(exit_fun) = decl.states[cur as usize].exit_fun {
                let outcome = invoke_fun(process, instance, st, exit_fun, Value::Null)?;
                if let Some(next) = resolve_outcome(process, instance, st, decl, outcome)? {
                    return Ok(Some(next));
                }
            }
            let frame = st.call_stack.pop().ok_or_else(|| PrtError::InternalInvariant {
                message: "pop with an empty call stack".into(),
            })?;
            st.state_id = frame.return_state;
            st.locals = frame.locals;
            st.deferred_set = decl.states[frame.return_state as usize].defers_set.clone();
            Ok(None)
        }
        HandlerOutcome::Receive { receive_index } => {
            let fun_idx = st.current_fun.ok_or_else(|| PrtError::InternalInvariant {
                message: "receive issued outside a function invocation".into(),
            })?;
            let case_set = decl.funs[fun_idx as usize]
                .receives
                .get(receive_index)
                .ok_or_else(|| PrtError::BadIndex { what: format!("receive {receive_index}") })?
                .case_set
                .clone();
            st.receive = Some(machine::ReceiveWait { case_set, receive_index, issuing_fun: fun_idx });
            Ok(None)
        }
    }
}

fn invoke_fun(
    process: &Process,
    instance: &Arc<MachineInstance>,
    st: &mut MachineState,
    fun_idx: FunIndex,
    payload: Value,
) -> Result<HandlerOutcome, PrtError> {
    let decl = &process.program().machines[instance.instance_of as usize];
    let fun = &decl.funs[fun_idx as usize];
    st.current_fun = Some(fun_idx);
    if st.locals.len() < fun.max_num_locals as usize {
        st.locals.resize_with(fun.max_num_locals as usize, || Value::Null);
    }
    let MachineState { variables, locals, .. } = st;
    let mut ctx = HandlerCtx::new(process, instance.id.clone(), payload, variables, locals);
    (fun.implementation)(&mut ctx)
}
