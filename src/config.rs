//! Runtime configuration, `serde`-derived the way the rest of this
//! ecosystem's config crates are.

use serde::{Deserialize, Serialize};

/// How a dequeued instance is selected for stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPolicy {
    /// A single caller drives the process by repeatedly calling
    /// `Process::run_worker`; at most one logical worker exists.
    TaskNeutral,
    /// Any number of OS threads call `Process::run_worker` concurrently;
    /// idle workers block on a counting semaphore until work or
    /// termination wakes them.
    Cooperative,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy::TaskNeutral
    }
}

/// Resolves whether `GetMachine` accepts a `MachineId` minted by a
/// different process guid than the one it is called on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossProcessIdPolicy {
    /// Reject with `PrtError::BadIndex` (conformant default).
    Reject,
    /// Accept the lookup against this process' table regardless of the
    /// id's origin. Non-conformant; available for hosts that multiplex
    /// several processes over one shared id space.
    Tolerate,
}

impl Default for CrossProcessIdPolicy {
    fn default() -> Self {
        CrossProcessIdPolicy::Reject
    }
}

/// Knobs accepted by `Process::start`. Every field has a default matching
/// the distilled specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Used for a machine declaration whose own `max_queue_size` is `0`
    /// (meaning unbounded); `0` here means literally unbounded.
    pub default_max_queue_size: u32,
    pub scheduling_policy: SchedulingPolicy,
    pub cross_process_id_policy: CrossProcessIdPolicy,
    /// Upper bound on the cooperative scheduler's counting semaphore.
    pub worker_semaphore_capacity: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_max_queue_size: 0,
            scheduling_policy: SchedulingPolicy::default(),
            cross_process_id_policy: CrossProcessIdPolicy::default(),
            worker_semaphore_capacity: 32767,
        }
    }
}
