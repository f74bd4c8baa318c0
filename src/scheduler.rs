//! Scheduler state (component C5, spec §3 "Scheduler") and the event
//! dispatcher (component C6, spec §4.4).
//!
//! Registries are plain `HashMap`s rather than the teacher's
//! `lazy_static!`-backed kernel-wide globals (`task::manager::TASK_MANAGER`
//! et al. behind a `spin::Mutex`): spec §5 is explicit that exactly one
//! `Scheduler` instance owns all state and nothing else touches it
//! concurrently, so there is nothing to lock and no global to initialize
//! lazily.

use std::collections::HashMap;

use log::{debug, warn};

use crate::cgroup::{Cgroup, CgroupId};
use crate::config::SchedulerConfig;
use crate::cpumask::CpuMask;
use crate::error::{DispatchError, EventError};
use crate::event::Event;
use crate::queue::RunQueue;
use crate::task::{Task, TaskId, TaskState};

/// Per-tick counters, reset at the start of every tick (spec §3, §4.5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// CPUs that switched to a different non-idle task this tick.
    pub preemptions: u64,
    /// Tasks that moved CPUs between consecutive ticks.
    pub migrations: u64,
}

/// The scheduler's full state: task and cgroup registries, the run queue,
/// per-CPU assignment slots, virtual time, and per-tick statistics.
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) tasks: HashMap<TaskId, Task>,
    pub(crate) cgroups: HashMap<CgroupId, Cgroup>,
    pub(crate) queue: RunQueue,
    pub(crate) cpu_slots: Vec<Option<TaskId>>,
    pub(crate) vtime: u64,
    pub(crate) stats: TickStats,
    next_seq: u64,
}

impl Scheduler {
    /// Build a new scheduler. The implicit default cgroup ("0") is created
    /// automatically.
    pub fn new(config: SchedulerConfig) -> Self {
        let mut cgroups = HashMap::new();
        cgroups.insert(
            CgroupId::default_group(),
            Cgroup::new(CgroupId::default_group(), None, None, None, None, 0),
        );
        Self {
            config,
            tasks: HashMap::new(),
            cgroups,
            queue: RunQueue::new(),
            cpu_slots: vec![None; config.cpu_count() as usize],
            vtime: 0,
            stats: TickStats::default(),
            next_seq: 0,
        }
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current virtual time (the vtime of the most recently processed
    /// tick).
    pub fn vtime(&self) -> u64 {
        self.vtime
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Look up a cgroup by id.
    pub fn cgroup(&self, id: &CgroupId) -> Option<&Cgroup> {
        self.cgroups.get(id)
    }

    /// What's currently assigned to a CPU, if any.
    pub fn cpu_slot(&self, cpu: u32) -> Option<&TaskId> {
        self.cpu_slots.get(cpu as usize).and_then(|s| s.as_ref())
    }

    /// Per-tick statistics as of the most recently completed tick.
    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Iterate every task currently known to the scheduler.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Maximum vruntime over all `Runnable` or `Running` tasks, or 0 if
    /// none (spec §4.4 `TaskCreate`/`TaskYield`).
    pub(crate) fn max_vruntime_active(&self) -> f64 {
        self.tasks
            .values()
            .filter(|t| matches!(t.state(), TaskState::Runnable | TaskState::Running))
            .map(Task::vruntime)
            .fold(0.0, f64::max)
    }

    /// Minimum vruntime over `Runnable` tasks, or 0 if none (spec §4.4
    /// `TaskUnblock`).
    pub(crate) fn min_vruntime_runnable(&self) -> f64 {
        let min = self
            .tasks
            .values()
            .filter(|t| t.state().is_runnable())
            .map(Task::vruntime)
            .fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            min
        } else {
            0.0
        }
    }

    /// Clear a task's CPU slot, if it currently occupies one.
    fn clear_cpu_slot(&mut self, id: &TaskId) {
        for slot in self.cpu_slots.iter_mut() {
            if slot.as_ref() == Some(id) {
                *slot = None;
            }
        }
    }

    /// Apply one event to scheduler state (spec §4.4). Unknown/invalid
    /// events are reported and skipped; a [`DispatchError::Fatal`] aborts
    /// the whole tick instead (spec §7 "Failure semantics").
    pub(crate) fn dispatch_event(&mut self, event: &Event) -> Result<(), DispatchError> {
        match event {
            Event::TaskCreate {
                task_id,
                nice,
                cgroup_id,
                cpu_mask,
            } => self.handle_task_create(task_id, *nice, cgroup_id.clone(), cpu_mask.as_deref()),
            Event::TaskExit { task_id } => {
                self.handle_task_exit(task_id).map_err(DispatchError::Event)
            }
            Event::TaskBlock { task_id } => {
                self.handle_task_block(task_id).map_err(DispatchError::Event)
            }
            Event::TaskUnblock { task_id } => self.handle_task_unblock(task_id),
            Event::TaskYield { task_id } => {
                self.handle_task_yield(task_id).map_err(DispatchError::Event)
            }
            Event::TaskSetNice { task_id, nice } => self
                .handle_task_set_nice(task_id, *nice)
                .map_err(DispatchError::Event),
            Event::TaskSetAffinity { task_id, cpu_mask } => self
                .handle_task_set_affinity(task_id, cpu_mask)
                .map_err(DispatchError::Event),
            Event::CgroupCreate {
                cgroup_id,
                cpu_shares,
                cpu_quota_us,
                cpu_period_us,
                cpu_mask,
            } => self
                .handle_cgroup_create(
                    cgroup_id,
                    *cpu_shares,
                    *cpu_quota_us,
                    *cpu_period_us,
                    cpu_mask.as_deref(),
                )
                .map_err(DispatchError::Event),
            Event::CgroupModify {
                cgroup_id,
                cpu_shares,
                cpu_quota_us,
                cpu_period_us,
                cpu_mask,
            } => self
                .handle_cgroup_modify(
                    cgroup_id,
                    *cpu_shares,
                    *cpu_quota_us,
                    *cpu_period_us,
                    cpu_mask.as_deref(),
                )
                .map_err(DispatchError::Event),
            Event::CgroupDelete { cgroup_id } => self
                .handle_cgroup_delete(cgroup_id)
                .map_err(DispatchError::Event),
            Event::TaskMoveCgroup {
                task_id,
                new_cgroup_id,
            } => self
                .handle_task_move_cgroup(task_id, new_cgroup_id)
                .map_err(DispatchError::Event),
            Event::CpuBurst { task_id, duration } => self
                .handle_cpu_burst(task_id, *duration)
                .map_err(DispatchError::Event),
        }
    }

    fn handle_task_create(
        &mut self,
        task_id: &TaskId,
        nice: Option<i32>,
        cgroup_id: Option<CgroupId>,
        cpu_mask: Option<&[u32]>,
    ) -> Result<(), DispatchError> {
        if self.tasks.contains_key(task_id) {
            debug!("TaskCreate: task `{task_id}` already exists, ignoring");
            return Ok(());
        }
        let cgroup_id = cgroup_id.unwrap_or_else(CgroupId::default_group);
        if !self.cgroups.contains_key(&cgroup_id) {
            return Err(EventError::UnknownCgroup(cgroup_id.as_str().to_string()).into());
        }
        let vruntime = self.max_vruntime_active();
        let mask = cpu_mask.map(CpuMask::from_indices).unwrap_or_default();
        let seq = self.alloc_seq();
        let task = Task::new(task_id.clone(), nice.unwrap_or(0), vruntime, cgroup_id, mask, seq);
        self.tasks.insert(task_id.clone(), task);
        self.queue.insert(task_id.clone(), &mut self.tasks)?;
        Ok(())
    }

    fn handle_task_exit(&mut self, task_id: &TaskId) -> Result<(), EventError> {
        if !self.tasks.contains_key(task_id) {
            return Err(EventError::UnknownTask(task_id.as_str().to_string()));
        }
        self.queue.remove(task_id, &mut self.tasks);
        self.clear_cpu_slot(task_id);
        self.tasks.remove(task_id);
        Ok(())
    }

    fn handle_task_block(&mut self, task_id: &TaskId) -> Result<(), EventError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EventError::UnknownTask(task_id.as_str().to_string()))?;
        task.set_state(TaskState::Blocked);
        task.set_current_cpu(None);
        self.queue.remove(task_id, &mut self.tasks);
        self.clear_cpu_slot(task_id);
        Ok(())
    }

    fn handle_task_unblock(&mut self, task_id: &TaskId) -> Result<(), DispatchError> {
        let state = self
            .tasks
            .get(task_id)
            .ok_or_else(|| EventError::UnknownTask(task_id.as_str().to_string()))?
            .state();
        if state != TaskState::Blocked {
            return Err(EventError::InvalidTaskState {
                task: task_id.as_str().to_string(),
                reason: "TaskUnblock requires the task to be Blocked",
            }
            .into());
        }
        let bonus_floor = self.min_vruntime_runnable() - 1.0;
        let task = self.tasks.get_mut(task_id).expect("checked above");
        task.set_state(TaskState::Runnable);
        task.set_vruntime(task.vruntime().max(bonus_floor));
        self.queue.insert(task_id.clone(), &mut self.tasks)?;
        Ok(())
    }

    fn handle_task_yield(&mut self, task_id: &TaskId) -> Result<(), EventError> {
        if !self.tasks.contains_key(task_id) {
            return Err(EventError::UnknownTask(task_id.as_str().to_string()));
        }
        let new_vruntime = self.max_vruntime_active();
        let task = self.tasks.get_mut(task_id).expect("checked above");
        task.set_vruntime(new_vruntime);
        if task.queue_index.is_some() {
            self.queue.update(task_id, &mut self.tasks);
        }
        Ok(())
    }

    fn handle_task_set_nice(&mut self, task_id: &TaskId, nice: i32) -> Result<(), EventError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EventError::UnknownTask(task_id.as_str().to_string()))?;
        task.set_nice(nice);
        Ok(())
    }

    fn handle_task_set_affinity(
        &mut self,
        task_id: &TaskId,
        cpu_mask: &[u32],
    ) -> Result<(), EventError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EventError::UnknownTask(task_id.as_str().to_string()))?;
        task.set_affinity(CpuMask::from_indices(cpu_mask));
        Ok(())
    }

    fn handle_cgroup_create(
        &mut self,
        cgroup_id: &CgroupId,
        shares: Option<u32>,
        quota_us: Option<Option<u64>>,
        period_us: Option<u64>,
        mask: Option<&[u32]>,
    ) -> Result<(), EventError> {
        if self.cgroups.contains_key(cgroup_id) {
            debug!("CgroupCreate: cgroup `{cgroup_id}` already exists, ignoring");
            return Ok(());
        }
        let mask = mask.map(CpuMask::from_indices);
        self.cgroups.insert(
            cgroup_id.clone(),
            Cgroup::new(cgroup_id.clone(), shares, quota_us, period_us, mask, self.vtime),
        );
        Ok(())
    }

    fn handle_cgroup_modify(
        &mut self,
        cgroup_id: &CgroupId,
        shares: Option<u32>,
        quota_us: Option<Option<u64>>,
        period_us: Option<u64>,
        mask: Option<&[u32]>,
    ) -> Result<(), EventError> {
        let vtime = self.vtime;
        let cgroup = self
            .cgroups
            .get_mut(cgroup_id)
            .ok_or_else(|| EventError::UnknownCgroup(cgroup_id.as_str().to_string()))?;
        cgroup.modify(shares, quota_us, period_us, mask.map(CpuMask::from_indices), vtime);
        Ok(())
    }

    fn handle_cgroup_delete(&mut self, cgroup_id: &CgroupId) -> Result<(), EventError> {
        if cgroup_id.is_default() {
            warn!("CgroupDelete: refusing to delete the default cgroup");
            return Ok(());
        }
        if self.cgroups.remove(cgroup_id).is_none() {
            return Err(EventError::UnknownCgroup(cgroup_id.as_str().to_string()));
        }
        for task in self.tasks.values_mut() {
            if task.cgroup() == cgroup_id {
                task.set_cgroup(CgroupId::default_group());
            }
        }
        Ok(())
    }

    fn handle_task_move_cgroup(
        &mut self,
        task_id: &TaskId,
        new_cgroup_id: &CgroupId,
    ) -> Result<(), EventError> {
        if !self.cgroups.contains_key(new_cgroup_id) {
            return Err(EventError::UnknownCgroup(new_cgroup_id.as_str().to_string()));
        }
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EventError::UnknownTask(task_id.as_str().to_string()))?;
        task.set_cgroup(new_cgroup_id.clone());
        Ok(())
    }

    fn handle_cpu_burst(&mut self, task_id: &TaskId, duration: u32) -> Result<(), EventError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EventError::UnknownTask(task_id.as_str().to_string()))?;
        task.start_burst(duration);
        Ok(())
    }
}
