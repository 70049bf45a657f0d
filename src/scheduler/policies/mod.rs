/*
 * Scheduling Policies
 *
 * Separates "which task runs next" (policy) from "how control moves
 * between tasks" (the dispatcher mechanism). The dispatcher holds a
 * `Box<dyn SchedPolicy>` and consults it once per cycle; policies only
 * see the task table and the ready queue.
 */

mod priority_aging;

pub(crate) use priority_aging::PriorityAging;

use super::queue::TaskQueue;
use super::task::{TaskId, TaskTable};

pub(crate) trait SchedPolicy: Send {
    /// Choose the next task to run, updating any per-decision bookkeeping
    /// (aging, quantum reset). The candidate is left in the ready queue;
    /// the directed switch removes it.
    fn pick_next(&mut self, tasks: &mut TaskTable, ready: &TaskQueue) -> Option<TaskId>;

    /// Policy name for logs.
    fn name(&self) -> &'static str;
}
