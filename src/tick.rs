//! The per-tick algorithm (component C7, spec §4.5).
//!
//! Five steps run atomically for every [`crate::event::EventBatch`]:
//! prologue, advance accounting, rebuild the run queue, per-CPU selection,
//! epilogue. This mirrors the shape of the teacher's own per-schedule flow
//! (`task::manager::TaskManager::fetch` picking RT, then CFS, then idle)
//! but folds cgroup quota and multi-CPU atomicity in, which the teacher's
//! single-core-at-a-time kernel scheduler never had to do.

use std::collections::HashMap;

use log::{trace, warn};

use crate::cgroup::CgroupId;
use crate::error::{DispatchError, FatalError};
use crate::event::{CpuAssignment, Decision, DecisionMeta, EventBatch};
use crate::scheduler::{Scheduler, TickStats};
use crate::task::{Task, TaskId, TaskState};
use crate::weight::{effective_weight, vruntime_delta};

impl Scheduler {
    /// Run one tick: apply `batch`'s events, then advance accounting,
    /// rebuild the queue, select a task per CPU, and emit the decision.
    ///
    /// Returns [`FatalError`] only if a structural allocation failed
    /// growing the run queue (spec §4.5 "Failure semantics"); event-level
    /// failures are logged and do not interrupt the tick.
    pub fn tick(&mut self, batch: EventBatch) -> Result<Decision, FatalError> {
        // C6 applies each event in order before C7 runs (spec §2 data flow).
        // `vtime` is set first since event handlers that create/modify
        // cgroups stamp `period_start_tick` with the current tick.
        self.vtime = batch.vtime;
        for event in &batch.events {
            match self.dispatch_event(event) {
                Ok(()) => {}
                Err(DispatchError::Event(err)) => {
                    warn!("event `{}` rejected: {err}", event.action_name());
                }
                Err(DispatchError::Fatal(err)) => return Err(err),
            }
        }

        self.prologue();
        // Snapshot what each CPU was running before step 2 clears
        // `cpu_slots` for the next selection pass — step 4 needs this to
        // tell whether a CPU's assignment actually changed (spec §4.5 step
        // 4: "If the previous task on CPU c was different and non-null,
        // increment preemptions"). Reading `cpu_slots` *after*
        // `advance_accounting` would always see `None`, since that step
        // unconditionally empties every slot.
        let previous_slots: Vec<Option<TaskId>> = self.cpu_slots.clone();
        self.advance_accounting();
        self.rebuild_queue()?;
        let schedule = self.select_per_cpu(&previous_slots)?;
        self.epilogue();

        Ok(self.build_decision(schedule))
    }

    /// Step 1: reset per-tick counters, refresh cgroup periods (spec §4.3,
    /// §4.5 step 1). `vtime` itself is stored before events are dispatched
    /// (see [`Scheduler::tick`]).
    fn prologue(&mut self) {
        self.stats = TickStats::default();
        let vtime = self.vtime;
        let quantum_us = self.config.quantum_us();
        for cgroup in self.cgroups.values_mut() {
            cgroup.refresh_period(vtime, quantum_us);
        }
    }

    /// Step 2: charge vruntime and quota to every CPU's currently-Running
    /// task, tick burst countdowns, and move every Running task back to
    /// Runnable (spec §4.5 step 2).
    fn advance_accounting(&mut self) {
        let quantum = self.config.quantum() as u64;
        let quantum_us = self.config.quantum_us();

        let running_ids: Vec<TaskId> = self.cpu_slots.iter().flatten().cloned().collect();
        for task_id in running_ids {
            let (was_bursting, cgroup_id) = {
                let task = self.tasks.get(&task_id).expect("cpu slot task must exist");
                (task.is_bursting(), task.cgroup().clone())
            };

            if !was_bursting {
                let shares = self
                    .cgroups
                    .get(&cgroup_id)
                    .map(|cg| cg.shares())
                    .unwrap_or(crate::cgroup::DEFAULT_SHARES);
                let task = self.tasks.get_mut(&task_id).expect("cpu slot task must exist");
                let w = effective_weight(task.weight(), shares);
                task.add_vruntime(vruntime_delta(quantum, w));
            }

            if let Some(cgroup) = self.cgroups.get_mut(&cgroup_id) {
                if cgroup.quota_us().is_some() {
                    cgroup.account(quantum_us);
                }
            }

            let task = self.tasks.get_mut(&task_id).expect("cpu slot task must exist");
            task.tick_burst();
            task.set_state(TaskState::Runnable);
        }

        for slot in self.cpu_slots.iter_mut() {
            *slot = None;
        }
    }

    /// Step 3: empty the run queue and re-insert every `Runnable` task
    /// (spec §4.5 step 3).
    fn rebuild_queue(&mut self) -> Result<(), FatalError> {
        self.queue.clear(&mut self.tasks);
        let runnable: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state().is_runnable())
            .map(Task::id)
            .cloned()
            .collect();
        for id in runnable {
            self.queue.insert(id, &mut self.tasks)?;
        }
        Ok(())
    }

    /// Step 4: for each CPU in ascending index, repeatedly extract the
    /// minimum candidate and test it against affinity, cgroup mask, and
    /// cgroup quota (including runtime already committed to earlier CPUs
    /// this tick); set rejected candidates aside and reinsert them once a
    /// winner is chosen or the queue is exhausted (spec §4.5 step 4).
    fn select_per_cpu(
        &mut self,
        previous_slots: &[Option<TaskId>],
    ) -> Result<Vec<CpuAssignment>, FatalError> {
        let quantum_us = self.config.quantum_us();
        let mut planned_us: HashMap<CgroupId, u64> = HashMap::new();
        let mut schedule = Vec::with_capacity(self.cpu_slots.len());

        for cpu in 0..self.cpu_slots.len() as u32 {
            let previous = previous_slots[cpu as usize].clone();
            let mut set_aside = Vec::new();
            let mut chosen = None;

            while let Some(candidate) = self.queue.extract_min(&mut self.tasks) {
                if self.candidate_fits(&candidate, cpu, &planned_us, quantum_us) {
                    chosen = Some(candidate);
                    break;
                }
                set_aside.push(candidate);
            }

            for id in set_aside {
                self.queue.insert(id, &mut self.tasks)?;
            }

            match chosen {
                Some(task_id) => {
                    if let Some(cgroup_id) = self.tasks.get(&task_id).map(|t| t.cgroup().clone()) {
                        if self
                            .cgroups
                            .get(&cgroup_id)
                            .map(|cg| cg.quota_us().is_some())
                            .unwrap_or(false)
                        {
                            *planned_us.entry(cgroup_id).or_insert(0) += quantum_us;
                        }
                    }

                    if let Some(prev_id) = &previous {
                        if prev_id != &task_id {
                            self.stats.preemptions += 1;
                        }
                    }
                    let prior_cpu = self.tasks.get(&task_id).and_then(Task::current_cpu);
                    if let Some(prior_cpu) = prior_cpu {
                        if prior_cpu != cpu {
                            self.stats.migrations += 1;
                        }
                    }

                    let task = self.tasks.get_mut(&task_id).expect("selected task must exist");
                    task.set_state(TaskState::Running);
                    task.set_current_cpu(Some(cpu));
                    self.cpu_slots[cpu as usize] = Some(task_id.clone());
                    trace!("cpu {cpu}: scheduled `{task_id}`");
                    schedule.push(CpuAssignment::Task(task_id));
                }
                None => {
                    self.cpu_slots[cpu as usize] = None;
                    schedule.push(CpuAssignment::Idle);
                }
            }
        }

        Ok(schedule)
    }

    /// Whether `candidate` may run on `cpu` this tick: affinity, cgroup
    /// mask, and cgroup quota (accounting for runtime already planned for
    /// the same cgroup on earlier CPUs this tick) must all pass.
    fn candidate_fits(
        &self,
        candidate: &TaskId,
        cpu: u32,
        planned_us: &HashMap<CgroupId, u64>,
        quantum_us: u64,
    ) -> bool {
        let Some(task) = self.tasks.get(candidate) else {
            return false;
        };
        if !task.affinity().contains(cpu) {
            return false;
        }
        let Some(cgroup) = self.cgroups.get(task.cgroup()) else {
            return false;
        };
        if !cgroup.allows_cpu(cpu) {
            return false;
        }
        match cgroup.quota_us() {
            None => true,
            Some(quota) => {
                let already_planned = planned_us.get(task.cgroup()).copied().unwrap_or(0);
                cgroup.used_us() + already_planned + quantum_us <= quota
            }
        }
    }

    /// Step 5: clear the CPU of any `Runnable` task that was not selected
    /// (spec §4.5 step 5).
    fn epilogue(&mut self) {
        for task in self.tasks.values_mut() {
            if task.state() == TaskState::Runnable {
                task.set_current_cpu(None);
            }
        }
    }

    fn build_decision(&self, schedule: Vec<CpuAssignment>) -> Decision {
        let meta = self.config.emit_metadata().then(|| {
            let mut runnable_tasks: Vec<TaskId> = self
                .tasks
                .values()
                .filter(|t| matches!(t.state(), TaskState::Runnable | TaskState::Running))
                .map(Task::id)
                .cloned()
                .collect();
            runnable_tasks.sort();
            let mut blocked_tasks: Vec<TaskId> = self
                .tasks
                .values()
                .filter(|t| t.state() == TaskState::Blocked)
                .map(Task::id)
                .cloned()
                .collect();
            blocked_tasks.sort();
            DecisionMeta {
                preemptions: self.stats.preemptions,
                migrations: self.stats.migrations,
                runnable_tasks,
                blocked_tasks,
            }
        });

        Decision {
            vtime: self.vtime,
            schedule,
            meta,
        }
    }
}
