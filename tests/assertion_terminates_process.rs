//! `ctx.assert` failing inside a handler reports `AssertionFailed` to the
//! host, halts the offending instance, and — unlike the other recoverable
//! error variants — also begins terminating the whole process: subsequent
//! `step_process` calls report `Terminating` without touching any other
//! instance.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use p_runtime::{
    DoDecl, EventSet, FunDecl, HandlerCtx, HandlerOutcome, MachineDecl, Process,
    ProcessStepOutcome, Program, ProgramBuilder, PrtErrorCode, RuntimeConfig, StateDecl, Type,
    Value,
};

const TRIP: u32 = 0;
const PING: u32 = 1;

fn build_program() -> Arc<Program> {
    let mut builder = ProgramBuilder::new();
    builder.add_event("Trip", Type::Any, 0);
    builder.add_event("Ping", Type::Any, 0);

    let trip_fun = FunDecl {
        name: "on_trip".into(),
        implementation: Arc::new(|ctx: &mut HandlerCtx<'_>| {
            ctx.assert(false, "invariant violated on purpose")?;
            Ok(HandlerOutcome::Complete)
        }),
        num_parameters: 0,
        max_num_locals: 0,
        payload_type: Type::Any,
        locals_type: vec![],
        receives: vec![],
    };
    let ping_fun = FunDecl {
        name: "on_ping".into(),
        implementation: Arc::new(|_ctx: &mut HandlerCtx<'_>| Ok(HandlerOutcome::Complete)),
        num_parameters: 0,
        max_num_locals: 0,
        payload_type: Type::Any,
        locals_type: vec![],
        receives: vec![],
    };

    let state = StateDecl {
        name: "Init".into(),
        entry_fun: None,
        exit_fun: None,
        defers_set: EventSet::new(),
        trans_set: EventSet::new(),
        do_set: EventSet::from_iter([TRIP, PING]),
        transitions: vec![],
        dos: vec![
            DoDecl { owner_state_index: 0, trigger_event: TRIP, do_fun: 0 },
            DoDecl { owner_state_index: 0, trigger_event: PING, do_fun: 1 },
        ],
    };
    let decl = MachineDecl {
        decl_index: 0,
        name: "Tripper".into(),
        vars: vec![],
        states: vec![state],
        funs: vec![trip_fun, ping_fun],
        init_state_index: 0,
        max_queue_size: 0,
    };
    builder.add_machine(decl);
    Arc::new(builder.build())
}

#[test]
fn assertion_failure_halts_the_instance_and_terminates_the_process() {
    let program = build_program();
    let (log_fn, _log) = common::collecting_log();
    let (error_fn, errors) = common::collecting_errors();
    let process = Process::start(Uuid::new_v4(), program, RuntimeConfig::default(), error_fn, log_fn);

    let tripper = process.mk_machine("Tripper", None, vec![]).unwrap();
    let bystander = process.mk_machine("Tripper", None, vec![]).unwrap();

    process.send(None, tripper.clone(), TRIP, Value::Null).unwrap();
    process.send(None, bystander.clone(), PING, Value::Null).unwrap();

    assert_eq!(process.step_process(), ProcessStepOutcome::More);

    let tripper_inst = process.get_machine_by_id(&tripper).unwrap();
    assert!(tripper_inst.is_halted());

    let recorded = errors.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, PrtErrorCode::AssertionFailed);
    drop(recorded);

    // The process is now terminating; the bystander's still-queued Ping
    // never gets a turn.
    assert_eq!(process.step_process(), ProcessStepOutcome::Terminating);
    let bystander_inst = process.get_machine_by_id(&bystander).unwrap();
    assert_eq!(bystander_inst.queue_len(), 1);
    assert!(!bystander_inst.is_halted());
}
