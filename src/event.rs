//! Event batch input and decision record output (spec §6), plus the event
//! dispatcher (component C6, spec §4.4).

use serde::{Deserialize, Serialize};

use crate::cgroup::CgroupId;
use crate::error::EventError;
use crate::task::TaskId;

/// One scheduling event. Unknown/invalid events are reported as
/// [`EventError`] and skipped; they never abort the batch (spec §4.4, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Create a new task. Idempotent: if `task_id` already exists, this is
    /// a no-op rather than a failure.
    TaskCreate {
        /// Id of the task to create.
        task_id: TaskId,
        /// Niceness; defaults to 0.
        nice: Option<i32>,
        /// Owning cgroup; defaults to the implicit default cgroup.
        cgroup_id: Option<CgroupId>,
        /// Allowed CPUs; empty/absent means "any".
        cpu_mask: Option<Vec<u32>>,
    },
    /// Remove a task entirely.
    TaskExit {
        /// Id of the task to remove.
        task_id: TaskId,
    },
    /// Move a task to `Blocked`.
    TaskBlock {
        /// Id of the task to block.
        task_id: TaskId,
    },
    /// Move a `Blocked` task back to `Runnable` with a latency bonus.
    TaskUnblock {
        /// Id of the task to unblock.
        task_id: TaskId,
    },
    /// Reset a task's vruntime to the current maximum (voluntary yield).
    TaskYield {
        /// Id of the yielding task.
        task_id: TaskId,
    },
    /// Change a task's niceness (and therefore weight).
    TaskSetNice {
        /// Id of the task to modify.
        task_id: TaskId,
        /// New niceness; clamped to `[-20, 19]`.
        nice: i32,
    },
    /// Replace a task's CPU affinity.
    TaskSetAffinity {
        /// Id of the task to modify.
        task_id: TaskId,
        /// New allowed CPUs; empty means "any".
        cpu_mask: Vec<u32>,
    },
    /// Create a new cgroup. Idempotent: if `cgroup_id` already exists, this
    /// is a no-op rather than a failure.
    CgroupCreate {
        /// Id of the cgroup to create.
        cgroup_id: CgroupId,
        /// Relative CPU shares; defaults to 1024.
        cpu_shares: Option<u32>,
        /// Bandwidth quota in microseconds; `None` = unlimited, absent =
        /// unlimited.
        cpu_quota_us: Option<Option<u64>>,
        /// Period in microseconds; defaults to 100000.
        cpu_period_us: Option<u64>,
        /// Allowed CPUs; empty/absent means "any".
        cpu_mask: Option<Vec<u32>>,
    },
    /// Replace any provided fields on an existing cgroup; unspecified
    /// fields are retained. A period change resets accounting.
    CgroupModify {
        /// Id of the cgroup to modify.
        cgroup_id: CgroupId,
        /// New shares, if provided.
        cpu_shares: Option<u32>,
        /// New quota, if provided (`Some(None)` means "now unlimited").
        cpu_quota_us: Option<Option<u64>>,
        /// New period, if provided.
        cpu_period_us: Option<u64>,
        /// New mask, if provided.
        cpu_mask: Option<Vec<u32>>,
    },
    /// Delete a cgroup, reassigning its member tasks to the default group.
    CgroupDelete {
        /// Id of the cgroup to delete.
        cgroup_id: CgroupId,
    },
    /// Move a task to a different cgroup.
    TaskMoveCgroup {
        /// Id of the task to move.
        task_id: TaskId,
        /// Id of the destination cgroup.
        new_cgroup_id: CgroupId,
    },
    /// Start a burst window for a task, freezing vruntime accounting.
    CpuBurst {
        /// Id of the task to burst.
        task_id: TaskId,
        /// Number of ticks the burst lasts.
        duration: u32,
    },
}

/// The action tag of an event, for error reporting.
impl Event {
    pub(crate) fn action_name(&self) -> &'static str {
        match self {
            Event::TaskCreate { .. } => "TaskCreate",
            Event::TaskExit { .. } => "TaskExit",
            Event::TaskBlock { .. } => "TaskBlock",
            Event::TaskUnblock { .. } => "TaskUnblock",
            Event::TaskYield { .. } => "TaskYield",
            Event::TaskSetNice { .. } => "TaskSetNice",
            Event::TaskSetAffinity { .. } => "TaskSetAffinity",
            Event::CgroupCreate { .. } => "CgroupCreate",
            Event::CgroupModify { .. } => "CgroupModify",
            Event::CgroupDelete { .. } => "CgroupDelete",
            Event::TaskMoveCgroup { .. } => "TaskMoveCgroup",
            Event::CpuBurst { .. } => "CpuBurst",
        }
    }
}

/// One tick's worth of events, tagged with the virtual time they apply to
/// (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// The virtual time this batch (and the tick it drives) applies to.
    pub vtime: u64,
    /// Events, applied in array order (spec §5 ordering guarantees).
    pub events: Vec<Event>,
}

/// Either a task id or the literal "idle" slot for one CPU (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CpuAssignment {
    /// The CPU is running this task.
    Task(TaskId),
    /// The CPU has nothing to run.
    Idle,
}

impl CpuAssignment {
    /// The assigned task, if any.
    pub fn task(&self) -> Option<&TaskId> {
        match self {
            CpuAssignment::Task(id) => Some(id),
            CpuAssignment::Idle => None,
        }
    }

    /// Whether the CPU is idle this tick.
    pub fn is_idle(&self) -> bool {
        matches!(self, CpuAssignment::Idle)
    }
}

/// Optional per-tick metadata (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionMeta {
    /// CPUs that switched to running a different task than the previous
    /// tick.
    pub preemptions: u64,
    /// Tasks that moved from one CPU to another between consecutive ticks.
    pub migrations: u64,
    /// Ids of every `Runnable` or `Running` task at the end of the tick.
    pub runnable_tasks: Vec<TaskId>,
    /// Ids of every `Blocked` task at the end of the tick.
    pub blocked_tasks: Vec<TaskId>,
}

/// One tick's scheduling decision (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// The virtual time this decision corresponds to (echoed from the
    /// driving [`EventBatch`]).
    pub vtime: u64,
    /// Per-CPU assignment, `schedule[c]` for CPU `c`.
    pub schedule: Vec<CpuAssignment>,
    /// Populated when [`crate::config::SchedulerConfig::emit_metadata`] is
    /// set.
    pub meta: Option<DecisionMeta>,
}

/// A single event's outcome: either applied successfully, or rejected with
/// the reason (spec §4.4 "Unknown/invalid events are reported as failures
/// and skipped").
pub type EventOutcome = Result<(), EventError>;
