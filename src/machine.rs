//! A single machine instance: its variables, event queue, deferred set,
//! call stack, and the lifecycle flags the scheduler and dispatcher read.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{IllegalSendReason, PrtError};
use crate::program::{EventSet, MachineDecl};
use crate::value::{EventIndex, ForeignOps, FunIndex, StateIndex, Value};

pub use crate::value::MachineId;

/// What the instance's queue most recently did, surfaced in
/// `MachineStateSnapshot`-adjacent diagnostics and in the `Announce` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastOperation {
    None,
    Enqueued,
    Dequeued,
}

/// A state suspended by `push`, waiting for a matching `pop`.
#[derive(Debug)]
pub(crate) struct CallFrame {
    pub return_state: StateIndex,
    pub locals: Vec<Value>,
}

/// A pending `receive`: which cases are admissible, and which function
/// each admissible event resumes into.
///
/// `issuing_fun` is captured at the moment `receive` is issued rather than
/// read back from `MachineState::current_fun` when it resumes: a
/// non-matching event admissible under the ordinary deferred-set rules can
/// be dispatched to a different handler while this receive is still
/// pending, which would otherwise overwrite `current_fun` out from under
/// the suspended case set.
#[derive(Debug)]
pub(crate) struct ReceiveWait {
    pub case_set: EventSet,
    pub receive_index: usize,
    pub issuing_fun: FunIndex,
}

/// The event queue and its admission bookkeeping. Guarded by its own
/// `Mutex` so that a `Send` — including a handler sending to its own
/// machine id, or two machines sending to each other — only ever takes a
/// brief, independent lock and never contends with whichever worker is
/// currently stepping this instance's `MachineState`. This mirrors the
/// non-blocking mailbox in `neo-akka/src/actor_ref.rs`: a producer's send
/// never waits on the actor's own processing state.
pub(crate) struct Mailbox {
    pub queue: VecDeque<(EventIndex, Value)>,
    pub queue_counts: HashMap<EventIndex, u32>,
    pub last_operation: LastOperation,
}

/// The state a single stepping worker owns for the duration of one
/// dispatcher step: current state id, variables, deferred set, any
/// pending receive, and the call stack. Never touched by `enqueue` —
/// see [`Mailbox`].
#[derive(Default)]
pub(crate) struct MachineState {
    pub state_id: StateIndex,
    pub variables: Vec<Value>,
    pub deferred_set: EventSet,
    pub receive: Option<ReceiveWait>,
    pub current_fun: Option<FunIndex>,
    pub call_stack: Vec<CallFrame>,
    pub locals: Vec<Value>,
}

/// One instantiated copy of a `MachineDecl`. `mailbox` and `state` are two
/// separate locks precisely so that a handler body running against `state`
/// can freely call back into `enqueue` (a self-send, or a round trip
/// between two machines) without ever re-entering the same `Mutex` it is
/// already inside. `is_running` is the actual single-writer gate on
/// `state`: the stepping worker claims it with a compare-exchange before
/// touching `state` at all and checks the whole `MachineState` out of its
/// `Mutex` for the duration of the step, so no lock is held while a
/// handler body runs.
pub struct MachineInstance {
    pub id: MachineId,
    pub symbolic_name: String,
    pub instance_of: u32,
    /// `decl.max_queue_size` if positive, else the process' configured
    /// `default_max_queue_size` backstop. `0` means literally unbounded.
    effective_max_queue_size: u32,
    pub(crate) is_running: AtomicBool,
    is_halted: AtomicBool,
    pub(crate) mailbox: Mutex<Mailbox>,
    pub(crate) state: Mutex<MachineState>,
}

impl MachineInstance {
    pub(crate) fn new(
        id: MachineId,
        symbolic_name: String,
        instance_of: u32,
        decl: &MachineDecl,
        default_max_queue_size: u32,
        ops: &dyn ForeignOps,
    ) -> Self {
        let variables = decl.vars.iter().map(|v| Value::make_default(&v.ty, ops)).collect();
        let init_state = &decl.states[decl.init_state_index as usize];
        let effective_max_queue_size =
            if decl.max_queue_size > 0 { decl.max_queue_size } else { default_max_queue_size };
        Self {
            id,
            symbolic_name,
            instance_of,
            effective_max_queue_size,
            is_running: AtomicBool::new(false),
            is_halted: AtomicBool::new(false),
            mailbox: Mutex::new(Mailbox {
                queue: VecDeque::new(),
                queue_counts: HashMap::new(),
                last_operation: LastOperation::None,
            }),
            state: Mutex::new(MachineState {
                state_id: decl.init_state_index,
                variables,
                deferred_set: init_state.defers_set.clone(),
                receive: None,
                current_fun: None,
                call_stack: Vec::new(),
                locals: Vec::new(),
            }),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.is_halted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_halted(&self) {
        self.is_halted.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Admission-checks and appends one event. Returns whether the
    /// instance was idle before this enqueue, the signal the caller uses
    /// to decide whether to wake the scheduler.
    pub(crate) fn enqueue(
        &self,
        event: EventIndex,
        payload: Value,
        max_instances: u32,
    ) -> Result<bool, PrtError> {
        if self.is_halted() {
            return Err(PrtError::IllegalSend {
                machine: self.id.clone(),
                reason: IllegalSendReason::Halted,
            });
        }
        let mut mailbox = self.mailbox.lock();
        if max_instances > 0 {
            let count = mailbox.queue_counts.get(&event).copied().unwrap_or(0);
            if count >= max_instances {
                return Err(PrtError::QueueFull { event, max: max_instances });
            }
        }
        if self.effective_max_queue_size > 0
            && mailbox.queue.len() >= self.effective_max_queue_size as usize
        {
            return Err(PrtError::QueueFull { event, max: self.effective_max_queue_size });
        }
        *mailbox.queue_counts.entry(event).or_insert(0) += 1;
        mailbox.queue.push_back((event, payload));
        mailbox.last_operation = LastOperation::Enqueued;
        let was_idle = !self.is_running.load(Ordering::Acquire);
        Ok(was_idle)
    }

    pub fn queue_len(&self) -> usize {
        self.mailbox.lock().queue.len()
    }

    /// Best-effort: while this instance is mid-step, `state` briefly holds
    /// a default placeholder (see `dispatcher::step`), so a concurrent
    /// caller can observe state id `0` rather than the state the instance
    /// is actually about to resume in. Callers that need a guaranteed-fresh
    /// read should call this between steps, e.g. after `step_process`
    /// returns `Idle`.
    pub fn current_state(&self) -> StateIndex {
        self.state.lock().state_id
    }
}

/// Removes and returns the first admissible event: one not in the
/// deferred set, or one matching the pending receive's case set if a
/// receive is outstanding (a receive's case set takes priority over the
/// ordinary deferred set — it is searched first and can admit an event
/// the deferred set would otherwise block).
pub(crate) fn try_dequeue(st: &MachineState, mailbox: &mut Mailbox) -> Option<(EventIndex, Value)> {
    let pos = mailbox.queue.iter().position(|(ev, _)| {
        if let Some(recv) = &st.receive {
            recv.case_set.contains(*ev) || !st.deferred_set.contains(*ev)
        } else {
            !st.deferred_set.contains(*ev)
        }
    })?;
    let (ev, payload) = mailbox.queue.remove(pos).unwrap();
    if let Some(count) = mailbox.queue_counts.get_mut(&ev) {
        *count = count.saturating_sub(1);
    }
    mailbox.last_operation = LastOperation::Dequeued;
    Some((ev, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ForeignTypeDecl, MachineDecl, StateDecl, VarDecl};
    use crate::value::Type;

    struct NoForeign;
    impl ForeignOps for NoForeign {
        fn foreign_clone(&self, _: crate::value::ForeignTypeIndex, _: &dyn std::any::Any) -> Box<dyn std::any::Any + Send + Sync> {
            unreachable!()
        }
        fn foreign_free(&self, _: crate::value::ForeignTypeIndex, _: Box<dyn std::any::Any + Send + Sync>) {
            unreachable!()
        }
        fn foreign_equals(&self, _: crate::value::ForeignTypeIndex, _: &dyn std::any::Any, _: &dyn std::any::Any) -> bool {
            unreachable!()
        }
        fn foreign_default(&self, _: crate::value::ForeignTypeIndex) -> Box<dyn std::any::Any + Send + Sync> {
            unreachable!()
        }
    }

    fn basic_decl() -> MachineDecl {
        MachineDecl {
            decl_index: 0,
            name: "T".into(),
            vars: vec![VarDecl { name: "x".into(), ty: Type::Int }],
            states: vec![StateDecl {
                name: "Init".into(),
                entry_fun: None,
                exit_fun: None,
                defers_set: EventSet::new(),
                trans_set: EventSet::new(),
                do_set: EventSet::new(),
                transitions: vec![],
                dos: vec![],
            }],
            funs: vec![],
            init_state_index: 0,
            max_queue_size: 0,
        }
    }

    #[test]
    fn enqueue_respects_max_instances() {
        let decl = basic_decl();
        let inst = MachineInstance::new(
            MachineId { process_guid: uuid::Uuid::nil(), index: 1 },
            "T(1)".into(),
            0,
            &decl,
            0,
            &NoForeign,
        );
        assert!(inst.enqueue(7, Value::Null, 1).is_ok());
        let err = inst.enqueue(7, Value::Null, 1).unwrap_err();
        assert!(matches!(err, PrtError::QueueFull { event: 7, max: 1 }));
    }

    #[test]
    fn dequeue_skips_deferred_events() {
        let decl = basic_decl();
        let inst = MachineInstance::new(
            MachineId { process_guid: uuid::Uuid::nil(), index: 1 },
            "T(1)".into(),
            0,
            &decl,
            0,
            &NoForeign,
        );
        inst.enqueue(1, Value::Int(1), 0).unwrap();
        inst.enqueue(2, Value::Int(2), 0).unwrap();
        {
            let mut st = inst.state.lock();
            st.deferred_set.insert(1);
        }
        let st = inst.state.lock();
        let mut mailbox = inst.mailbox.lock();
        let (ev, _) = try_dequeue(&st, &mut mailbox).unwrap();
        assert_eq!(ev, 2);
    }

    #[test]
    fn halted_instance_rejects_enqueue() {
        let decl = basic_decl();
        let inst = MachineInstance::new(
            MachineId { process_guid: uuid::Uuid::nil(), index: 1 },
            "T(1)".into(),
            0,
            &decl,
            0,
            &NoForeign,
        );
        inst.mark_halted();
        let err = inst.enqueue(1, Value::Null, 0).unwrap_err();
        assert!(matches!(
            err,
            PrtError::IllegalSend { reason: IllegalSendReason::Halted, .. }
        ));
    }
}
