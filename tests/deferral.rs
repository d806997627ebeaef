//! An event declared in a state's defer set stays in the queue behind a
//! later-arriving, non-deferred event; once a transition leaves for a
//! state that no longer defers it, the held-back event is finally
//! delivered.

mod common;

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use p_runtime::{
    DoDecl, EventSet, FunDecl, HandlerCtx, HandlerOutcome, MachineDecl, Process,
    ProcessStepOutcome, Program, ProgramBuilder, RuntimeConfig, StateDecl, Type, Value,
};

const DEFER: u32 = 0;
const PASS: u32 = 1;

fn build_program(deferred_seen: Arc<Mutex<i64>>) -> Arc<Program> {
    let mut builder = ProgramBuilder::new();
    builder.add_event("Defer", Type::Any, 0);
    builder.add_event("Pass", Type::Any, 0);

    let pass_fun = FunDecl {
        name: "on_pass".into(),
        implementation: Arc::new(|_ctx: &mut HandlerCtx<'_>| {
            Ok(HandlerOutcome::Goto { target: 1, payload: Value::Null })
        }),
        num_parameters: 0,
        max_num_locals: 0,
        payload_type: Type::Any,
        locals_type: vec![],
        receives: vec![],
    };
    let defer_fun = FunDecl {
        name: "on_defer".into(),
        implementation: Arc::new(move |_ctx: &mut HandlerCtx<'_>| {
            *deferred_seen.lock().unwrap() += 1;
            Ok(HandlerOutcome::Complete)
        }),
        num_parameters: 0,
        max_num_locals: 0,
        payload_type: Type::Any,
        locals_type: vec![],
        receives: vec![],
    };

    let closed = StateDecl {
        name: "Closed".into(),
        entry_fun: None,
        exit_fun: None,
        defers_set: EventSet::from_iter([DEFER]),
        trans_set: EventSet::new(),
        do_set: EventSet::from_iter([PASS]),
        transitions: vec![],
        dos: vec![DoDecl { owner_state_index: 0, trigger_event: PASS, do_fun: 0 }],
    };
    let open = StateDecl {
        name: "Open".into(),
        entry_fun: None,
        exit_fun: None,
        defers_set: EventSet::new(),
        trans_set: EventSet::new(),
        do_set: EventSet::from_iter([DEFER]),
        transitions: vec![],
        dos: vec![DoDecl { owner_state_index: 1, trigger_event: DEFER, do_fun: 1 }],
    };

    let decl = MachineDecl {
        decl_index: 0,
        name: "Gate".into(),
        vars: vec![],
        states: vec![closed, open],
        funs: vec![pass_fun, defer_fun],
        init_state_index: 0,
        max_queue_size: 0,
    };
    builder.add_machine(decl);
    Arc::new(builder.build())
}

#[test]
fn deferred_event_is_delivered_only_after_the_state_stops_deferring_it() {
    let deferred_seen = Arc::new(Mutex::new(0i64));
    let program = build_program(Arc::clone(&deferred_seen));
    let (log_fn, _log) = common::collecting_log();
    let (error_fn, errors) = common::collecting_errors();
    let process = Process::start(Uuid::new_v4(), program, RuntimeConfig::default(), error_fn, log_fn);

    let gate = process.mk_machine("Gate", None, vec![]).unwrap();
    process.send(None, gate.clone(), DEFER, Value::Null).unwrap();
    process.send(None, gate.clone(), PASS, Value::Null).unwrap();

    // First step: Pass is admissible even though Defer arrived first and
    // is still at the front of the queue.
    assert_eq!(process.step_process(), ProcessStepOutcome::More);
    let instance = process.get_machine_by_id(&gate).unwrap();
    assert_eq!(instance.current_state(), 1);
    assert_eq!(*deferred_seen.lock().unwrap(), 0);
    assert_eq!(instance.queue_len(), 1);

    // Second step: now in Open, Defer is no longer deferred and is
    // finally delivered.
    assert_eq!(process.step_process(), ProcessStepOutcome::More);
    assert_eq!(*deferred_seen.lock().unwrap(), 1);
    assert_eq!(instance.queue_len(), 0);
    assert!(errors.lock().unwrap().is_empty());
}
