//! An event declared with a bounded `max_instances` rejects a `Send`
//! once that many copies are already queued, without touching the
//! handler at all.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use p_runtime::{
    EventSet, MachineDecl, Process, Program, ProgramBuilder, PrtError, RuntimeConfig, StateDecl,
    Type, Value,
};

const LOAD: u32 = 0;

fn build_program() -> Arc<Program> {
    let mut builder = ProgramBuilder::new();
    builder.add_event("Load", Type::Int, 1);

    let state = StateDecl {
        name: "Idle".into(),
        entry_fun: None,
        exit_fun: None,
        defers_set: EventSet::new(),
        trans_set: EventSet::new(),
        do_set: EventSet::new(),
        transitions: vec![],
        dos: vec![],
    };
    let decl = MachineDecl {
        decl_index: 0,
        name: "Sink".into(),
        vars: vec![],
        states: vec![state],
        funs: vec![],
        init_state_index: 0,
        max_queue_size: 0,
    };
    builder.add_machine(decl);
    Arc::new(builder.build())
}

#[test]
fn second_send_past_max_instances_is_rejected() {
    let program = build_program();
    let (log_fn, _log) = common::collecting_log();
    let (error_fn, _errors) = common::collecting_errors();
    let process = Process::start(Uuid::new_v4(), program, RuntimeConfig::default(), error_fn, log_fn);

    let sink = process.mk_machine("Sink", None, vec![]).unwrap();

    process.send(None, sink.clone(), LOAD, Value::Int(1)).unwrap();
    let err = process.send(None, sink.clone(), LOAD, Value::Int(2)).unwrap_err();
    assert!(matches!(err, PrtError::QueueFull { event: LOAD, max: 1 }));

    let instance = process.get_machine_by_id(&sink).unwrap();
    assert_eq!(instance.queue_len(), 1);
}
