//! The process container: owns the program declaration tree, the machine
//! table, the host callbacks, and the scheduling state every worker
//! thread shares.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::callback::{ErrorFn, LogFn, LogKind, LogRecord, MachineStateSnapshot, MonitorSink};
use crate::config::{CrossProcessIdPolicy, RuntimeConfig, SchedulingPolicy};
use crate::dispatcher::{self, StepOutcome};
use crate::error::{IllegalSendReason, PrtError};
use crate::handler::{HandlerCtx, HandlerOutcome};
use crate::machine::{MachineInstance, MachineState};
use crate::program::Program;
use crate::scheduler::{ProcessStepOutcome, SchedulerOutcome, SchedulerState};
use crate::value::{resolve_args, Arg, EventIndex, MachineDeclIndex, MachineId, Value};

/// The running instance of a loaded `Program`. Cheap to share: created
/// once by `Process::start` and handed around as `Arc<Process>`.
pub struct Process {
    pub guid: Uuid,
    program: Arc<Program>,
    config: RuntimeConfig,
    machines: RwLock<Vec<Arc<MachineInstance>>>,
    machine_index_by_name: RwLock<HashMap<String, u32>>,
    next_index: AtomicU32,
    terminating: AtomicBool,
    error_fn: ErrorFn,
    log_fn: LogFn,
    scheduler: SchedulerState,
    monitor_sink: RwLock<Option<Arc<dyn MonitorSink>>>,
}

impl Process {
    /// The Rust-idiomatic form of `StartProcess`: loads `program` and
    /// returns a shared handle a host spawns workers against.
    pub fn start(
        guid: Uuid,
        program: Arc<Program>,
        config: RuntimeConfig,
        error_fn: ErrorFn,
        log_fn: LogFn,
    ) -> Arc<Process> {
        let scheduler = SchedulerState::new(config.scheduling_policy, config.worker_semaphore_capacity);
        Arc::new(Process {
            guid,
            program,
            config,
            machines: RwLock::new(Vec::new()),
            machine_index_by_name: RwLock::new(HashMap::new()),
            next_index: AtomicU32::new(1),
            terminating: AtomicBool::new(false),
            error_fn,
            log_fn,
            scheduler,
            monitor_sink: RwLock::new(None),
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn log(&self, record: LogRecord) {
        (self.log_fn)(record);
    }

    pub(crate) fn report_error(&self, err: &PrtError, snapshot: MachineStateSnapshot) {
        (self.error_fn)(self, err.code(), snapshot, &err.to_string());
    }

    /// `MkMachine`: instantiates a new instance of the named machine
    /// declaration, running its initial state's entry function with the
    /// resolved constructor payload.
    pub fn mk_machine(
        &self,
        machine_def: &str,
        symbolic_name: Option<&str>,
        args: Vec<Arg>,
    ) -> Result<MachineId, PrtError> {
        let decl_index = self
            .program
            .machine_by_name(machine_def)
            .ok_or_else(|| PrtError::BadIndex { what: format!("machine definition '{machine_def}'") })?;
        self.instantiate(decl_index, symbolic_name.map(|s| s.to_string()), args)
    }

    /// `MkSymbolicMachine`: like `mk_machine`, but the concrete machine
    /// definition is resolved through `creator`'s link map entry for
    /// `child_name` rather than named directly — the pattern a machine
    /// uses to create a child it only knows by a symbolic role name
    /// (`"Worker"`) whose concrete implementation the program's link/def
    /// maps pin down.
    pub fn mk_symbolic_machine(
        &self,
        creator: MachineDeclIndex,
        child_name: &str,
        args: Vec<Arg>,
    ) -> Result<MachineId, PrtError> {
        let decl_index = self
            .program
            .resolve_linked_machine(creator, child_name)
            .ok_or_else(|| PrtError::BadIndex {
                what: format!("no link-map entry for creator {creator} child '{child_name}'"),
            })?;
        self.instantiate(decl_index, Some(child_name.to_string()), args)
    }

    fn instantiate(
        &self,
        decl_index: MachineDeclIndex,
        symbolic_name: Option<String>,
        args: Vec<Arg>,
    ) -> Result<MachineId, PrtError> {
        let decl = &self.program.machines[decl_index as usize];

        let index = self.next_index.fetch_add(1, Ordering::AcqRel);
        let id = MachineId { process_guid: self.guid, index };
        let symbolic_name = symbolic_name.unwrap_or_else(|| format!("{}({})", decl.name, index));

        let instance = Arc::new(MachineInstance::new(
            id.clone(),
            symbolic_name.clone(),
            decl_index,
            decl,
            self.config.default_max_queue_size,
            self.program.as_ref(),
        ));

        // Claim `is_running` before this instance is visible to anyone else
        // (it isn't in `machines` yet, so no other thread can race this
        // store): a worker's round-robin scan must see the new instance as
        // already claimed the moment it appears in the table, the same
        // single-writer invariant `dispatcher::step`'s compare-exchange
        // maintains for every later step.
        instance.is_running.store(true, Ordering::Release);

        {
            let mut machines = self.machines.write();
            let mut by_name = self.machine_index_by_name.write();
            by_name.insert(symbolic_name, (machines.len()) as u32);
            machines.push(Arc::clone(&instance));
        }

        let payload = resolve_args(args, self.program.as_ref())?;
        let result = if let Some(entry_fun) = decl.states[decl.init_state_index as usize].entry_fun {
            // Take `MachineState` out of its `Mutex` before running the
            // entry function, so a constructor that sends to its own
            // freshly minted id doesn't re-enter this lock via `enqueue`.
            let mut st = std::mem::take(&mut *instance.state.lock());
            let fun = &decl.funs[entry_fun as usize];
            if st.locals.len() < fun.max_num_locals as usize {
                st.locals.resize_with(fun.max_num_locals as usize, || Value::Null);
            }
            st.current_fun = Some(entry_fun);
            let MachineState { variables, locals, .. } = &mut st;
            let mut ctx = HandlerCtx::new(self, id.clone(), payload, variables, locals);
            let outcome = (fun.implementation)(&mut ctx);
            *instance.state.lock() = st;
            outcome.and_then(|outcome| self.settle_construction_outcome(&instance, outcome))
        } else {
            Ok(())
        };
        instance.is_running.store(false, Ordering::Release);
        result?;

        self.wake_scheduler();
        Ok(id)
    }

    /// `GetMachineState`: snapshots `(machineId, machineName, stateId,
    /// stateName)` for a live instance.
    pub fn get_machine_state(&self, instance: &MachineInstance) -> MachineStateSnapshot {
        let st = instance.state.lock();
        let decl = &self.program.machines[instance.instance_of as usize];
        let state_decl = &decl.states[st.state_id as usize];
        MachineStateSnapshot {
            machine_id: Some(instance.id.clone()),
            machine_name: instance.symbolic_name.clone(),
            state_id: st.state_id,
            state_name: state_decl.name.clone(),
        }
    }

    fn settle_construction_outcome(
        &self,
        instance: &Arc<MachineInstance>,
        outcome: HandlerOutcome,
    ) -> Result<(), PrtError> {
        match outcome {
            HandlerOutcome::Complete => Ok(()),
            HandlerOutcome::Raise { event, payload } => {
                instance.enqueue(event, payload, 0)?;
                Ok(())
            }
            other => Err(PrtError::InternalInvariant {
                message: format!("unsupported constructor entry outcome: {other:?}"),
            }),
        }
    }

    /// `Send`: enqueues `event`/`payload` on `target`'s queue, reporting
    /// `IllegalSend` if the target has halted or does not exist. `sender`
    /// is optional because a host driving a machine directly (as the
    /// integration tests do) has no sender context of its own to report;
    /// when it is given, its snapshot is captured before the enqueue and
    /// logged in place of the receiver's, same as `send_internal` below.
    pub fn send(
        &self,
        sender: Option<MachineId>,
        target: MachineId,
        event: EventIndex,
        payload: Value,
    ) -> Result<(), PrtError> {
        let sender_snapshot = match sender {
            Some(id) => Some(self.get_machine_state(&self.get_machine_by_id(&id)?)),
            None => None,
        };
        self.dispatch_send(sender_snapshot, target, event, payload)
    }

    /// `SendInternal`: the path a running handler's `ctx.send` takes. A
    /// handler always knows its own machine id, so unlike `send` this
    /// always captures the sender's state snapshot before enqueueing
    /// rather than falling back to the receiver's.
    pub fn send_internal(
        &self,
        sender: MachineId,
        target: MachineId,
        event: EventIndex,
        payload: Value,
    ) -> Result<(), PrtError> {
        let sender_snapshot = self.get_machine_state(&self.get_machine_by_id(&sender)?);
        self.dispatch_send(Some(sender_snapshot), target, event, payload)
    }

    fn dispatch_send(
        &self,
        sender_snapshot: Option<MachineStateSnapshot>,
        target: MachineId,
        event: EventIndex,
        payload: Value,
    ) -> Result<(), PrtError> {
        let instance = self.get_machine_by_id(&target)?;
        let event_decl = self
            .program
            .events
            .get(event as usize)
            .ok_or_else(|| PrtError::BadIndex { what: format!("event {event}") })?;
        let was_idle = instance.enqueue(event, payload, event_decl.max_instances)?;
        let machine_snapshot = match sender_snapshot {
            Some(snapshot) => snapshot,
            None => self.get_machine_state(&instance),
        };
        self.log(LogRecord {
            kind: LogKind::Send,
            machine: machine_snapshot,
            event: Some(event),
            payload: None,
        });
        if was_idle {
            self.wake_scheduler();
        }
        Ok(())
    }

    /// `GetMachine`: resolves a `Value::Machine` into its live instance.
    pub fn get_machine(&self, id_value: &Value) -> Result<Arc<MachineInstance>, PrtError> {
        match id_value {
            Value::Machine(id) => self.get_machine_by_id(id),
            other => Err(PrtError::TypeMismatch {
                expected: "machine-id value".into(),
                found: format!("{other:?}"),
            }),
        }
    }

    /// Looks a machine up by the symbolic name it was created with: a name
    /// chosen at creation time, resolved back to a live handle on demand.
    pub fn get_machine_by_symbolic_name(&self, name: &str) -> Option<Arc<MachineInstance>> {
        let position = *self.machine_index_by_name.read().get(name)?;
        self.machines.read().get(position as usize).cloned()
    }

    pub fn get_machine_by_id(&self, id: &MachineId) -> Result<Arc<MachineInstance>, PrtError> {
        if id.process_guid != self.guid
            && matches!(self.config.cross_process_id_policy, CrossProcessIdPolicy::Reject)
        {
            return Err(PrtError::BadIndex {
                what: format!("machine id from a foreign process {}", id.process_guid),
            });
        }
        let machines = self.machines.read();
        machines
            .iter()
            .find(|m| m.id.index == id.index)
            .cloned()
            .ok_or(PrtError::IllegalSend { machine: id.clone(), reason: IllegalSendReason::NotFound })
    }

    /// `AnnounceStmt`: broadcasts an event to out-of-band observers
    /// without delivering it to any machine's queue.
    pub fn announce(&self, event: EventIndex, payload: Value) {
        if let Some(sink) = self.monitor_sink.read().as_ref() {
            sink.on_announce(event, &payload);
        }
        self.log(LogRecord {
            kind: LogKind::Announce,
            machine: MachineStateSnapshot {
                machine_id: None,
                machine_name: "<process>".into(),
                state_id: 0,
                state_name: String::new(),
            },
            event: Some(event),
            payload: Some(Arc::new(payload)),
        });
    }

    pub fn set_monitor_sink(&self, sink: Arc<dyn MonitorSink>) {
        *self.monitor_sink.write() = Some(sink);
    }

    pub fn set_scheduling_policy(&self, policy: SchedulingPolicy) {
        self.scheduler.set_policy(policy);
    }

    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        self.scheduler.policy()
    }

    fn wake_scheduler(&self) {
        self.scheduler.semaphore.signal();
    }

    /// `WaitForWork`: cooperative-only manual parking primitive for a host
    /// driving `step_process` itself instead of calling `run_worker`.
    /// Blocks until either new work is signaled or the process begins
    /// terminating, returning the now-current value of `terminating` so
    /// the caller knows whether to keep looping.
    pub fn wait_for_work(&self) -> bool {
        self.scheduler.threads_waiting.fetch_add(1, Ordering::AcqRel);
        self.scheduler.semaphore.wait();
        self.scheduler.threads_waiting.fetch_sub(1, Ordering::AcqRel);
        self.terminating.load(Ordering::Acquire)
    }

    /// Scans machine instances round-robin from the shared cursor,
    /// stepping the first one with admissible work.
    pub fn step_process(&self) -> ProcessStepOutcome {
        if self.terminating.load(Ordering::Acquire) {
            return ProcessStepOutcome::Terminating;
        }
        let machines = self.machines.read();
        let n = machines.len();
        if n == 0 {
            return ProcessStepOutcome::Idle;
        }
        let start = self.scheduler.cursor.load(Ordering::Acquire) % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let instance = &machines[idx];
            match dispatcher::step(self, instance) {
                StepOutcome::Progressed => {
                    self.scheduler.cursor.store((idx + 1) % n, Ordering::Release);
                    return ProcessStepOutcome::More;
                }
                StepOutcome::Idle => continue,
            }
        }
        ProcessStepOutcome::Idle
    }

    /// `RunProcess` from one worker thread's perspective: loops stepping
    /// the process until `StopProcess` flips `terminating`, parking
    /// itself between steps per the active scheduling policy.
    pub fn run_worker(&self) -> SchedulerOutcome {
        self.scheduler.lock_policy();
        self.scheduler.active_workers.fetch_add(1, Ordering::AcqRel);
        loop {
            match self.step_process() {
                ProcessStepOutcome::Terminating => break,
                ProcessStepOutcome::More => {
                    std::thread::yield_now();
                }
                ProcessStepOutcome::Idle => match self.scheduling_policy() {
                    SchedulingPolicy::TaskNeutral => {
                        self.scheduler.semaphore.wait();
                    }
                    SchedulingPolicy::Cooperative => {
                        self.wait_for_work();
                    }
                },
            }
        }
        if self.scheduler.active_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.scheduler.shutdown_mutex.lock();
            self.scheduler.shutdown_condvar.notify_all();
        }
        SchedulerOutcome::Terminated
    }

    /// Flips `terminating` and wakes every parked worker without blocking
    /// for them to return. Called from `stop` (the host-driven path) and
    /// also from inside a dispatcher step when an `AssertionFailed` error
    /// must terminate the whole process rather than just the offending
    /// instance — a worker cannot block on its own exit from within its
    /// own step, so this half of `stop`'s work is split out.
    pub(crate) fn request_termination(&self) {
        if self.terminating.swap(true, Ordering::AcqRel) {
            return;
        }
        let waiting = self.scheduler.threads_waiting.load(Ordering::Acquire).max(1) as u32;
        self.scheduler.semaphore.signal_n(waiting + 1);
    }

    /// `StopProcess`: flips `terminating`, wakes every parked worker, and
    /// blocks until all of them have returned from `run_worker` before
    /// halting every remaining instance and clearing the machine table.
    pub fn stop(&self) {
        self.request_termination();

        let mut guard = self.scheduler.shutdown_mutex.lock();
        while self.scheduler.active_workers.load(Ordering::Acquire) > 0 {
            self.scheduler.shutdown_condvar.wait(&mut guard);
        }
        drop(guard);

        let mut machines = self.machines.write();
        for m in machines.iter() {
            m.mark_halted();
        }
        machines.clear();
    }

    pub fn machine_count(&self) -> usize {
        self.machines.read().len()
    }
}
