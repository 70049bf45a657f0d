/*
 * Task Queues
 *
 * Ordered containers of task ids over the task table. A queue is created
 * with a discipline: plain FIFO (waiter lists) or ascending by an integer
 * key with FIFO among equal keys (ready queue by current priority, sleep
 * queue by wake deadline). Insertion walks from the head to the first
 * element whose key exceeds the new element's and inserts before it,
 * appending otherwise, so equal keys preserve arrival order.
 *
 * Queues store ids, never task records. Membership is mirrored in each
 * task's residence tag, which upholds the rule that a task is linked into
 * at most one queue at any moment; inserting a task that resides
 * elsewhere, or removing one that is absent, is a container violation and
 * treated as fatal by the callers during normal operation.
 *
 * All operations are O(n); the runtime handles tens of tasks, not
 * thousands.
 */

use core::fmt;
use std::collections::VecDeque;

use super::task::{Residence, Task, TaskId, TaskTable};

/// Ordering discipline fixed at queue construction.
#[derive(Clone, Copy)]
pub(crate) enum QueueDiscipline {
    /// Append at the tail; pure arrival order.
    Fifo,
    /// Ascending by the given key, FIFO among equal keys.
    Ascending(fn(&Task) -> i64),
}

/// Container violations. During normal operation these indicate runtime
/// corruption and abort the process at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueError {
    /// The task already resides in some queue.
    AlreadyQueued,
    /// The task is not an element of this queue.
    NotQueued,
    /// The id has no entry in the task table.
    UnknownTask,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::AlreadyQueued => write!(f, "task already resides in a queue"),
            QueueError::NotQueued => write!(f, "task not in this queue"),
            QueueError::UnknownTask => write!(f, "task not in table"),
        }
    }
}

pub(crate) struct TaskQueue {
    name: &'static str,
    /// Residence tag stamped on members of this queue.
    tag: Residence,
    discipline: QueueDiscipline,
    ids: VecDeque<TaskId>,
}

impl TaskQueue {
    pub(crate) fn new(name: &'static str, tag: Residence, discipline: QueueDiscipline) -> Self {
        Self {
            name,
            tag,
            discipline,
            ids: VecDeque::new(),
        }
    }

    /// Insert `id` according to the queue discipline.
    pub(crate) fn insert(&mut self, id: TaskId, table: &mut TaskTable) -> Result<(), QueueError> {
        let task = table.get_mut(id).ok_or(QueueError::UnknownTask)?;
        if task.residence != Residence::Detached {
            return Err(QueueError::AlreadyQueued);
        }
        task.residence = self.tag;

        match self.discipline {
            QueueDiscipline::Fifo => self.ids.push_back(id),
            QueueDiscipline::Ascending(key) => {
                let new_key = key(table.get(id).expect("just looked up"));
                let pos = self
                    .ids
                    .iter()
                    .position(|&other| {
                        let other_task = table.get(other).expect("queued id has a table entry");
                        new_key < key(other_task)
                    });
                match pos {
                    Some(index) => self.ids.insert(index, id),
                    None => self.ids.push_back(id),
                }
            }
        }
        Ok(())
    }

    /// Remove `id`, resetting its residence tag.
    pub(crate) fn remove(&mut self, id: TaskId, table: &mut TaskTable) -> Result<(), QueueError> {
        let pos = self
            .ids
            .iter()
            .position(|&other| other == id)
            .ok_or(QueueError::NotQueued)?;
        self.ids.remove(pos);
        let task = table.get_mut(id).ok_or(QueueError::UnknownTask)?;
        debug_assert_eq!(task.residence, self.tag);
        task.residence = Residence::Detached;
        Ok(())
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.ids.iter().any(|&other| other == id)
    }

    pub(crate) fn front(&self) -> Option<TaskId> {
        self.ids.front().copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ids.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for id in &self.ids {
            write!(f, " {}", id.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{TaskKind, TaskTable};

    fn table_with(prios: &[i32]) -> TaskTable {
        let mut table = TaskTable::new();
        for (i, &prio) in prios.iter().enumerate() {
            table.insert(Task::new(TaskId(i), "t", TaskKind::User, prio));
        }
        table
    }

    fn prio_queue() -> TaskQueue {
        TaskQueue::new(
            "ready",
            Residence::Ready,
            QueueDiscipline::Ascending(|t| t.current_priority as i64),
        )
    }

    #[test]
    fn insert_then_remove_leaves_empty() {
        let mut table = table_with(&[0]);
        let mut queue = prio_queue();
        queue.insert(TaskId(0), &mut table).unwrap();
        assert_eq!(queue.len(), 1);
        queue.remove(TaskId(0), &mut table).unwrap();
        assert!(queue.is_empty());
        assert_eq!(table.get(TaskId(0)).unwrap().residence, Residence::Detached);
    }

    #[test]
    fn keeps_ascending_priority_order() {
        let mut table = table_with(&[5, -5, 0, 20, -20]);
        let mut queue = prio_queue();
        for i in 0..5 {
            queue.insert(TaskId(i), &mut table).unwrap();
        }
        let order: Vec<usize> = queue.iter().map(|id| id.0).collect();
        assert_eq!(order, vec![4, 1, 2, 0, 3]);
    }

    #[test]
    fn equal_keys_preserve_arrival_order() {
        let mut table = table_with(&[3, 3, 3]);
        let mut queue = prio_queue();
        for i in [1usize, 0, 2] {
            queue.insert(TaskId(i), &mut table).unwrap();
        }
        let order: Vec<usize> = queue.iter().map(|id| id.0).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn double_insert_is_a_violation() {
        let mut table = table_with(&[0]);
        let mut queue = prio_queue();
        queue.insert(TaskId(0), &mut table).unwrap();
        assert_eq!(
            queue.insert(TaskId(0), &mut table),
            Err(QueueError::AlreadyQueued)
        );
    }

    #[test]
    fn residence_blocks_cross_queue_membership() {
        let mut table = table_with(&[0]);
        let mut ready = prio_queue();
        let mut waiters = TaskQueue::new("waiters", Residence::SyncWait, QueueDiscipline::Fifo);
        ready.insert(TaskId(0), &mut table).unwrap();
        assert_eq!(
            waiters.insert(TaskId(0), &mut table),
            Err(QueueError::AlreadyQueued)
        );
    }

    #[test]
    fn removing_absent_task_fails() {
        let mut table = table_with(&[0]);
        let mut queue = prio_queue();
        assert_eq!(queue.remove(TaskId(0), &mut table), Err(QueueError::NotQueued));
    }

    #[test]
    fn fifo_discipline_appends() {
        let mut table = table_with(&[7, 1, 4]);
        let mut queue = TaskQueue::new("waiters", Residence::SyncWait, QueueDiscipline::Fifo);
        for i in 0..3 {
            queue.insert(TaskId(i), &mut table).unwrap();
        }
        let order: Vec<usize> = queue.iter().map(|id| id.0).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
