//! The two scheduling policies a `Process` can run under, and the
//! counting semaphore the cooperative policy parks idle workers on.
//!
//! Workers in this runtime are real OS threads that block synchronously
//! between steps rather than async tasks — a `tokio::sync::Semaphore`
//! would force every handler invocation through a task boundary the
//! concurrency model never asks for, so this is a small `parking_lot`-
//! based counting semaphore local to the crate.

pub use crate::config::SchedulingPolicy;

use parking_lot::{Condvar, Mutex};

/// A counting semaphore capped at `capacity`, used to park cooperative
/// workers between steps and to wake exactly the number that can usefully
/// resume.
pub(crate) struct WorkSemaphore {
    count: Mutex<u32>,
    condvar: Condvar,
    capacity: u32,
}

impl WorkSemaphore {
    pub fn new(capacity: u32) -> Self {
        Self { count: Mutex::new(0), condvar: Condvar::new(), capacity }
    }

    pub fn signal(&self) {
        let mut count = self.count.lock();
        if *count < self.capacity {
            *count += 1;
        }
        self.condvar.notify_one();
    }

    pub fn signal_n(&self, times: u32) {
        let mut count = self.count.lock();
        *count = (*count + times).min(self.capacity);
        drop(count);
        self.condvar.notify_all();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.condvar.wait(&mut count);
        }
        *count -= 1;
    }
}

/// What `Process::run_worker`'s internal loop should do after a round of
/// `step_process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStepOutcome {
    /// A step ran against some instance; the caller should immediately
    /// try again rather than wait.
    More,
    /// No instance currently has admissible work; the caller should wait
    /// for a wakeup or, in `TaskNeutral` mode, poll again later.
    Idle,
    /// `StopProcess` has been called; the caller should exit its loop.
    Terminating,
}

/// The terminal result of a `Process::run_worker` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOutcome {
    Terminated,
}

/// Scheduling state owned by a `Process`: the round-robin cursor shared
/// by every worker, the policy (settable once, before the first step),
/// and the cooperative semaphore plus the bookkeeping `StopProcess` needs
/// to know every worker has actually returned before teardown proceeds.
pub(crate) struct SchedulerState {
    pub policy: Mutex<SchedulingPolicy>,
    pub policy_locked: std::sync::atomic::AtomicBool,
    pub cursor: std::sync::atomic::AtomicUsize,
    pub semaphore: WorkSemaphore,
    pub threads_waiting: std::sync::atomic::AtomicUsize,
    pub active_workers: std::sync::atomic::AtomicUsize,
    pub shutdown_mutex: Mutex<()>,
    pub shutdown_condvar: Condvar,
}

impl SchedulerState {
    pub fn new(policy: SchedulingPolicy, semaphore_capacity: u16) -> Self {
        Self {
            policy: Mutex::new(policy),
            policy_locked: std::sync::atomic::AtomicBool::new(false),
            cursor: std::sync::atomic::AtomicUsize::new(0),
            semaphore: WorkSemaphore::new(semaphore_capacity as u32),
            threads_waiting: std::sync::atomic::AtomicUsize::new(0),
            active_workers: std::sync::atomic::AtomicUsize::new(0),
            shutdown_mutex: Mutex::new(()),
            shutdown_condvar: Condvar::new(),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        *self.policy.lock()
    }

    /// Sets the scheduling policy. A no-op once any worker has taken its
    /// first step, matching `SetSchedulingPolicy`'s documented behavior.
    pub fn set_policy(&self, policy: SchedulingPolicy) {
        if !self.policy_locked.load(std::sync::atomic::Ordering::Acquire) {
            *self.policy.lock() = policy;
        }
    }

    pub fn lock_policy(&self) {
        self.policy_locked.store(true, std::sync::atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn semaphore_wakes_a_waiter() {
        let sem = Arc::new(WorkSemaphore::new(4));
        let waiter = {
            let sem = Arc::clone(&sem);
            std::thread::spawn(move || {
                sem.wait();
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        sem.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn semaphore_never_exceeds_capacity() {
        let sem = WorkSemaphore::new(2);
        sem.signal_n(10);
        assert_eq!(*sem.count.lock(), 2);
    }
}
