//! Per-task state (spec §3 "Task", §4.6 state machine).
//!
//! Field layout follows the teacher's `task::cfs_scheduler::SchedEntity` /
//! `task::state_machine::ProcessState` split — scheduling fields and
//! life-cycle state kept as plain, independently testable data rather than
//! bundled into one kernel-wide task control block — generalized to the
//! vruntime-as-`f64` model this spec requires and to a dynamic task id
//! instead of a kernel PID.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cpumask::CpuMask;
use crate::weight::{clamp_nice, weight_for_nice};

/// Opaque task identifier. Cheap to clone (`Arc<str>` under the hood), used
/// as both the hash-map key into the task registry and the id echoed in
/// decision records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Build a task id from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Task life-cycle state (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// In the priority queue, waiting to be selected.
    Runnable,
    /// Currently occupying a CPU slot.
    Running,
    /// Waiting on an external event; not in the queue, not on a CPU.
    Blocked,
    /// Terminal; the task record is about to be dropped.
    Exited,
}

impl TaskState {
    /// Whether a task in this state belongs in the priority queue
    /// (spec §3 invariant: "a task is in the priority queue iff its state
    /// is Runnable").
    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Runnable)
    }
}

/// A single task's scheduling state.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    nice: i32,
    weight: u32,
    vruntime: f64,
    state: TaskState,
    cgroup: crate::cgroup::CgroupId,
    affinity: CpuMask,
    current_cpu: Option<u32>,
    burst: bool,
    burst_remaining: u32,
    /// Back-pointer into the run queue's heap array, or `None` if not
    /// enqueued (spec §4.2's "queue position handle").
    pub(crate) queue_index: Option<usize>,
    /// Monotonic creation order, used only to break vruntime ties
    /// deterministically (spec §4.2 Tie-breaking, §9 Tie-breaks).
    pub(crate) seq: u64,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        nice: i32,
        vruntime: f64,
        cgroup: crate::cgroup::CgroupId,
        affinity: CpuMask,
        seq: u64,
    ) -> Self {
        let nice = clamp_nice(nice);
        Self {
            id,
            nice,
            weight: weight_for_nice(nice),
            vruntime,
            state: TaskState::Runnable,
            cgroup,
            affinity,
            current_cpu: None,
            burst: false,
            burst_remaining: 0,
            queue_index: None,
            seq,
        }
    }

    /// The task's id.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Current niceness, already clamped to `[-20, 19]`.
    pub fn nice(&self) -> i32 {
        self.nice
    }

    /// Cached weight derived from niceness.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Current vruntime.
    pub fn vruntime(&self) -> f64 {
        self.vruntime
    }

    pub(crate) fn set_vruntime(&mut self, v: f64) {
        self.vruntime = v;
    }

    pub(crate) fn add_vruntime(&mut self, delta: f64) {
        self.vruntime += delta;
    }

    /// Current life-cycle state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    /// Cgroup this task belongs to.
    pub fn cgroup(&self) -> &crate::cgroup::CgroupId {
        &self.cgroup
    }

    pub(crate) fn set_cgroup(&mut self, cgroup: crate::cgroup::CgroupId) {
        self.cgroup = cgroup;
    }

    /// CPU affinity mask.
    pub fn affinity(&self) -> CpuMask {
        self.affinity
    }

    pub(crate) fn set_affinity(&mut self, mask: CpuMask) {
        self.affinity = mask;
    }

    /// CPU the task currently occupies, if `Running`.
    pub fn current_cpu(&self) -> Option<u32> {
        self.current_cpu
    }

    pub(crate) fn set_current_cpu(&mut self, cpu: Option<u32>) {
        self.current_cpu = cpu;
    }

    /// Whether vruntime accounting is currently frozen by a burst.
    pub fn is_bursting(&self) -> bool {
        self.burst
    }

    /// Remaining burst ticks.
    pub fn burst_remaining(&self) -> u32 {
        self.burst_remaining
    }

    pub(crate) fn set_nice(&mut self, nice: i32) {
        self.nice = clamp_nice(nice);
        self.weight = weight_for_nice(self.nice);
    }

    pub(crate) fn start_burst(&mut self, duration: u32) {
        self.burst = true;
        self.burst_remaining = duration;
    }

    /// Decrement the burst countdown, clearing the flag once it reaches
    /// zero (spec §4.5 step 2).
    pub(crate) fn tick_burst(&mut self) {
        if self.burst {
            self.burst_remaining = self.burst_remaining.saturating_sub(1);
            if self.burst_remaining == 0 {
                self.burst = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::CgroupId;

    fn make(id: &str) -> Task {
        Task::new(TaskId::new(id), 0, 0.0, CgroupId::default(), CpuMask::any(), 0)
    }

    #[test]
    fn new_task_is_runnable_and_not_enqueued_marker_unset() {
        let t = make("t1");
        assert_eq!(t.state(), TaskState::Runnable);
        assert!(t.queue_index.is_none());
    }

    #[test]
    fn set_nice_reclamps_and_updates_weight() {
        let mut t = make("t1");
        t.set_nice(-100);
        assert_eq!(t.nice(), -20);
        assert_eq!(t.weight(), weight_for_nice(-20));
    }

    #[test]
    fn burst_countdown_clears_flag_at_zero() {
        let mut t = make("t1");
        t.start_burst(2);
        assert!(t.is_bursting());
        t.tick_burst();
        assert!(t.is_bursting());
        assert_eq!(t.burst_remaining(), 1);
        t.tick_burst();
        assert!(!t.is_bursting());
        assert_eq!(t.burst_remaining(), 0);
    }
}
