//! Shared scaffolding for the end-to-end scenario tests: a no-op foreign
//! registry (none of these scenarios use foreign types) and a `LogFn`
//! that appends every record to a shared, lockable `Vec` so assertions
//! can inspect the durable dispatch log after a scenario settles.

use std::sync::{Arc, Mutex};

use p_runtime::{ErrorFn, LogFn, LogRecord, PrtErrorCode};

/// Wires the `tracing` side-channel (see `dispatcher` module docs) up to
/// stderr for a scenario run under `RUST_LOG`. `try_init` rather than
/// `init` since several scenario binaries may call this within the same
/// process under some test runners.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn collecting_log() -> (LogFn, Arc<Mutex<Vec<LogRecord>>>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let log_fn: LogFn = Arc::new(move |record| {
        sink.lock().unwrap().push(record);
    });
    (log_fn, records)
}

pub fn collecting_errors() -> (ErrorFn, Arc<Mutex<Vec<(PrtErrorCode, String)>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let error_fn: ErrorFn = Arc::new(move |_process, code, _snapshot, message| {
        sink.lock().unwrap().push((code, message.to_string()));
    });
    (error_fn, errors)
}
