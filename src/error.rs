//! Error taxonomy.
//!
//! Split into the same two tiers a syscall-facing kernel error module
//! usually draws between recoverable, per-request errors and conditions the
//! whole engine cannot survive, but built on `thiserror` rather than a
//! hand-written `Display` impl: this crate is `std`, so the usual ecosystem
//! derive applies directly.

use thiserror::Error;

/// A structural failure severe enough that the engine cannot continue.
///
/// In this crate the only such condition is exhausting memory while growing
/// a core data structure. `std`'s allocator essentially never reports this,
/// but the `try_reserve` calls that produce it keep the contract honest
/// instead of asserting it away.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Allocation failed while growing the named structure.
    #[error("allocation failure while growing {0}")]
    Allocation(&'static str),
}

/// A non-fatal failure processing a single event.
///
/// The tick engine collects these per event; a failure here skips the
/// offending event but never aborts the batch or withholds the tick's
/// decision record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event referenced a task id with no matching record.
    #[error("unknown task `{0}`")]
    UnknownTask(String),

    /// The event referenced a cgroup id with no matching record.
    #[error("unknown cgroup `{0}`")]
    UnknownCgroup(String),

    /// An operation that requires a specific task state was attempted
    /// against a task in some other state (e.g. unblocking a task that was
    /// never blocked).
    #[error("task `{task}` is not in the required state: {reason}")]
    InvalidTaskState {
        /// The task in question.
        task: String,
        /// Human-readable description of the mismatch.
        reason: &'static str,
    },
}

/// Internal plumbing for [`crate::scheduler::Scheduler::dispatch_event`]:
/// most handlers only ever fail at event granularity, but a couple grow the
/// run queue and can hit the same allocation failure the tick engine itself
/// guards against with `try_reserve` (spec §7, §4.5 "Failure semantics").
#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    /// Non-fatal: skip the offending event, keep processing the batch.
    #[error(transparent)]
    Event(#[from] EventError),
    /// Fatal: abort the tick.
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Error constructing a [`crate::config::SchedulerConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `cpu_count` was zero or exceeded [`crate::cpumask::MAX_CPUS`].
    #[error("cpu_count must be in 1..={max}, got {got}")]
    CpuCountOutOfRange {
        /// The offending value.
        got: u32,
        /// The maximum allowed value.
        max: u32,
    },

    /// `quantum` was zero.
    #[error("quantum must be positive")]
    ZeroQuantum,
}
