/*
 * Priority Aging Policy
 *
 * The ready queue is sorted ascending by current priority, so the head is
 * always the most urgent task and is the candidate. Every other ready
 * task then ages one step toward the most urgent priority (floored at
 * -20), while the candidate is reset to its base priority with a full
 * quantum. Any task therefore reaches the head in a bounded number of
 * scheduling decisions regardless of its base priority.
 */

use super::super::queue::TaskQueue;
use super::super::task::{TaskId, TaskTable};
use super::super::{PRIO_HIGHEST, QUANTUM_TICKS};
use super::SchedPolicy;

pub(crate) struct PriorityAging;

impl SchedPolicy for PriorityAging {
    fn pick_next(&mut self, tasks: &mut TaskTable, ready: &TaskQueue) -> Option<TaskId> {
        let chosen = ready.front()?;

        // Aging decrements every non-chosen ready task uniformly, so the
        // queue stays sorted without re-insertion.
        for id in ready.iter() {
            if id == chosen {
                continue;
            }
            let task = tasks.get_mut(id).expect("queued id has a table entry");
            task.current_priority = (task.current_priority - 1).max(PRIO_HIGHEST);
        }

        let task = tasks.get_mut(chosen).expect("queued id has a table entry");
        task.current_priority = task.base_priority;
        task.quantum_left = QUANTUM_TICKS;
        Some(chosen)
    }

    fn name(&self) -> &'static str {
        "priority-aging"
    }
}
