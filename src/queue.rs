//! Indexed min-priority-queue over runnable tasks (spec §4.2, component C4).
//!
//! A binary min-heap of [`TaskId`]s ordered by `(vruntime, seq)` ascending.
//! Every task carries its own position back into `task.queue_index`
//! (spec's "queue position handle"), kept in sync on every swap, which is
//! what gives `update`/`remove` O(log n) cost instead of requiring a linear
//! scan to find the element first.
//!
//! The teacher's own CFS run queue (`task::cfs_scheduler::CfsRunQueue`)
//! reaches for a `BTreeMap<RunQueueKey, Arc<TaskControlBlock>>` keyed on
//! `(vruntime, tid)` instead of an explicit indexed heap — a fine choice
//! when the language runtime already gives you an ordered map, but this
//! spec calls out the back-pointer/index invariant explicitly (§4.2, and
//! the queue-membership property in §8), so the heap is built directly
//! against that contract rather than borrowed wholesale from the teacher.

use std::collections::HashMap;

use crate::error::FatalError;
use crate::task::{Task, TaskId};

/// Ordering key: vruntime first (via `f64::total_cmp`, valid since
/// vruntime is always finite and nonnegative by construction), `seq` as a
/// deterministic tie-break (spec §4.2 Tie-breaking, §9 Tie-breaks).
#[inline]
fn key(task: &Task) -> (f64, u64) {
    (task.vruntime(), task.seq)
}

#[inline]
fn less(a: &Task, b: &Task) -> bool {
    let (av, aseq) = key(a);
    let (bv, bseq) = key(b);
    match av.total_cmp(&bv) {
        std::cmp::Ordering::Equal => aseq < bseq,
        other => other.is_lt(),
    }
}

/// The indexed min-priority-queue itself.
#[derive(Debug, Default)]
pub struct RunQueue {
    heap: Vec<TaskId>,
}

impl RunQueue {
    /// A fresh, empty queue.
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue has no tasks.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Root of the heap, without removing it.
    pub fn peek(&self) -> Option<&TaskId> {
        self.heap.first()
    }

    /// Drop every queued task, resetting each one's `queue_index` to `None`
    /// (used by the tick engine's full-rebuild step, spec §4.5 step 3).
    pub fn clear(&mut self, tasks: &mut HashMap<TaskId, Task>) {
        for id in self.heap.drain(..) {
            if let Some(task) = tasks.get_mut(&id) {
                task.queue_index = None;
            }
        }
    }

    /// Insert a task, sifting it up into position.
    ///
    /// Precondition: `id` is present in `tasks` and not already enqueued.
    pub fn insert(
        &mut self,
        id: TaskId,
        tasks: &mut HashMap<TaskId, Task>,
    ) -> Result<(), FatalError> {
        self.heap
            .try_reserve(1)
            .map_err(|_| FatalError::Allocation("run queue"))?;
        let idx = self.heap.len();
        self.heap.push(id.clone());
        if let Some(task) = tasks.get_mut(&id) {
            task.queue_index = Some(idx);
        }
        self.sift_up(idx, tasks);
        Ok(())
    }

    /// Remove and return the minimum element.
    pub fn extract_min(&mut self, tasks: &mut HashMap<TaskId, Task>) -> Option<TaskId> {
        if self.heap.is_empty() {
            return None;
        }
        let min = self.heap.swap_remove(0);
        if let Some(task) = tasks.get_mut(&min) {
            task.queue_index = None;
        }
        if !self.heap.is_empty() {
            if let Some(task) = tasks.get_mut(&self.heap[0]) {
                task.queue_index = Some(0);
            }
            self.sift_down(0, tasks);
        }
        Some(min)
    }

    /// Re-establish heap order for a task whose key changed in place
    /// (e.g. after a vruntime update). Precondition: the task's
    /// `queue_index` is `Some`.
    pub fn update(&mut self, id: &TaskId, tasks: &mut HashMap<TaskId, Task>) {
        let Some(idx) = tasks.get(id).and_then(|t| t.queue_index) else {
            return;
        };
        if self.sift_up(idx, tasks) == idx {
            self.sift_down(idx, tasks);
        }
    }

    /// Remove an arbitrary task from the queue by id (like `extract_min`
    /// but targeting an arbitrary position).
    pub fn remove(&mut self, id: &TaskId, tasks: &mut HashMap<TaskId, Task>) {
        let Some(idx) = tasks.get(id).and_then(|t| t.queue_index) else {
            return;
        };
        if let Some(task) = tasks.get_mut(id) {
            task.queue_index = None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        self.heap.pop();
        if idx < self.heap.len() {
            if let Some(task) = tasks.get_mut(&self.heap[idx]) {
                task.queue_index = Some(idx);
            }
            if self.sift_up(idx, tasks) == idx {
                self.sift_down(idx, tasks);
            }
        }
    }

    /// Swap two heap slots, keeping both tasks' back-pointers in sync.
    fn swap(&mut self, a: usize, b: usize, tasks: &mut HashMap<TaskId, Task>) {
        self.heap.swap(a, b);
        if let Some(task) = tasks.get_mut(&self.heap[a]) {
            task.queue_index = Some(a);
        }
        if let Some(task) = tasks.get_mut(&self.heap[b]) {
            task.queue_index = Some(b);
        }
    }

    /// Sift the element at `idx` up towards the root; returns its final
    /// index.
    fn sift_up(&mut self, mut idx: usize, tasks: &mut HashMap<TaskId, Task>) -> usize {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            let child_lt_parent = {
                let child = tasks.get(&self.heap[idx]).expect("heap entry must exist");
                let parent_task = tasks.get(&self.heap[parent]).expect("heap entry must exist");
                less(child, parent_task)
            };
            if child_lt_parent {
                self.swap(idx, parent, tasks);
                idx = parent;
            } else {
                break;
            }
        }
        idx
    }

    /// Sift the element at `idx` down towards the leaves; returns its final
    /// index.
    fn sift_down(&mut self, mut idx: usize, tasks: &mut HashMap<TaskId, Task>) -> usize {
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;

            if left < self.heap.len()
                && less(
                    tasks.get(&self.heap[left]).expect("heap entry must exist"),
                    tasks.get(&self.heap[smallest]).expect("heap entry must exist"),
                )
            {
                smallest = left;
            }
            if right < self.heap.len()
                && less(
                    tasks.get(&self.heap[right]).expect("heap entry must exist"),
                    tasks.get(&self.heap[smallest]).expect("heap entry must exist"),
                )
            {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest, tasks);
            idx = smallest;
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::CgroupId;
    use crate::cpumask::CpuMask;

    fn task(id: &str, vruntime: f64, seq: u64) -> Task {
        Task::new(
            TaskId::new(id),
            0,
            vruntime,
            CgroupId::default(),
            CpuMask::any(),
            seq,
        )
    }

    fn insert_all(q: &mut RunQueue, tasks: &mut HashMap<TaskId, Task>, entries: &[(&str, f64)]) {
        for (i, (id, v)) in entries.iter().enumerate() {
            tasks.insert(TaskId::new(*id), task(id, *v, i as u64));
            q.insert(TaskId::new(*id), tasks).unwrap();
        }
    }

    #[test]
    fn extracts_in_ascending_vruntime_order() {
        let mut tasks = HashMap::new();
        let mut q = RunQueue::new();
        insert_all(&mut q, &mut tasks, &[("a", 5.0), ("b", 1.0), ("c", 3.0)]);

        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "b");
        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "c");
        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "a");
        assert!(q.extract_min(&mut tasks).is_none());
    }

    #[test]
    fn ties_break_by_insertion_sequence() {
        let mut tasks = HashMap::new();
        let mut q = RunQueue::new();
        insert_all(&mut q, &mut tasks, &[("a", 1.0), ("b", 1.0), ("c", 1.0)]);

        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "a");
        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "b");
        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "c");
    }

    #[test]
    fn queue_index_matches_position_after_every_op() {
        let mut tasks = HashMap::new();
        let mut q = RunQueue::new();
        insert_all(
            &mut q,
            &mut tasks,
            &[("a", 5.0), ("b", 1.0), ("c", 3.0), ("d", 2.0), ("e", 4.0)],
        );
        for (i, id) in q.heap.iter().enumerate() {
            assert_eq!(tasks[id].queue_index, Some(i));
        }
        q.extract_min(&mut tasks);
        for (i, id) in q.heap.iter().enumerate() {
            assert_eq!(tasks[id].queue_index, Some(i));
        }
    }

    #[test]
    fn remove_arbitrary_element_preserves_heap_order() {
        let mut tasks = HashMap::new();
        let mut q = RunQueue::new();
        insert_all(
            &mut q,
            &mut tasks,
            &[("a", 5.0), ("b", 1.0), ("c", 3.0), ("d", 2.0)],
        );
        q.remove(&TaskId::new("c"), &mut tasks);
        assert!(tasks[&TaskId::new("c")].queue_index.is_none());

        let mut order = Vec::new();
        while let Some(id) = q.extract_min(&mut tasks) {
            order.push(id.as_str().to_string());
        }
        assert_eq!(order, vec!["b", "d", "a"]);
    }

    #[test]
    fn update_after_vruntime_change_restores_order() {
        let mut tasks = HashMap::new();
        let mut q = RunQueue::new();
        insert_all(&mut q, &mut tasks, &[("a", 1.0), ("b", 2.0), ("c", 3.0)]);

        tasks.get_mut(&TaskId::new("c")).unwrap().set_vruntime(0.0);
        q.update(&TaskId::new("c"), &mut tasks);

        assert_eq!(q.extract_min(&mut tasks).unwrap().as_str(), "c");
    }

    #[test]
    fn clear_resets_all_queue_indices() {
        let mut tasks = HashMap::new();
        let mut q = RunQueue::new();
        insert_all(&mut q, &mut tasks, &[("a", 1.0), ("b", 2.0)]);
        q.clear(&mut tasks);
        assert!(q.is_empty());
        assert!(tasks.values().all(|t| t.queue_index.is_none()));
    }
}
