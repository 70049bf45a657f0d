/*
 * Bounded Message Queue
 *
 * Fixed-size messages in a flat buffer of max_msgs slots, with two
 * internal semaphores carrying the flow-control credits: the producer
 * semaphore counts empty slots (send blocks when the queue is full), the
 * consumer semaphore counts stored messages (recv blocks when it is
 * empty).
 *
 * A single shared write index serves both directions: send fills the
 * slot at the index and advances it, recv steps the index back and reads
 * the slot it now points at. Under interleaved traffic receives therefore
 * return the most recently stored message first.
 *
 * destroy() tears down both semaphores, so blocked producers and
 * consumers resume with `Destroyed`.
 */

use spin::Mutex as SpinMutex;

use super::Semaphore;
use crate::scheduler::{KernelError, PreemptGuard, Result};

/// Handle to a registry-backed message queue. Copy it freely between
/// tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQueue(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MqState {
    Active,
    Finished,
}

struct MqEntry {
    state: MqState,
    buffer: Box<[u8]>,
    msg_size: usize,
    max_msgs: usize,
    write_index: usize,
    pending: usize,
    /// Credits for empty slots; send blocks on it.
    producer: Semaphore,
    /// Credits for stored messages; recv blocks on it.
    consumer: Semaphore,
}

static MQUEUES: SpinMutex<Vec<MqEntry>> = SpinMutex::new(Vec::new());

impl MessageQueue {
    /// Create a queue of `max_msgs` slots of `msg_size` bytes each.
    pub fn create(max_msgs: usize, msg_size: usize) -> Result<MessageQueue> {
        if max_msgs == 0 || msg_size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let total = max_msgs
            .checked_mul(msg_size)
            .ok_or(KernelError::InvalidArgument)?;
        let mut buffer: Vec<u8> = Vec::new();
        if buffer.try_reserve_exact(total).is_err() {
            return Err(KernelError::OutOfMemory);
        }
        buffer.resize(total, 0);

        let producer = Semaphore::create(max_msgs as i64)?;
        let consumer = Semaphore::create(0)?;

        let _guard = PreemptGuard::new();
        let mut registry = MQUEUES.lock();
        let id = registry.len();
        registry.push(MqEntry {
            state: MqState::Active,
            buffer: buffer.into_boxed_slice(),
            msg_size,
            max_msgs,
            write_index: 0,
            pending: 0,
            producer,
            consumer,
        });
        log::debug!("mqueue {id} created: {max_msgs} x {msg_size} B");
        Ok(MessageQueue(id))
    }

    /// Store one message, blocking while the queue is full. `msg` must be
    /// exactly one slot long.
    pub fn send(self, msg: &[u8]) -> Result<()> {
        let producer = {
            let _guard = PreemptGuard::new();
            let registry = MQUEUES.lock();
            let queue = registry.get(self.0).ok_or(KernelError::NotFound)?;
            if queue.state == MqState::Finished {
                return Err(KernelError::Destroyed);
            }
            if msg.len() != queue.msg_size {
                return Err(KernelError::InvalidArgument);
            }
            queue.producer
        };

        producer.down()?;

        let consumer = {
            let _guard = PreemptGuard::new();
            let mut registry = MQUEUES.lock();
            let queue = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if queue.state == MqState::Finished {
                return Err(KernelError::Destroyed);
            }
            let offset = queue.write_index * queue.msg_size;
            queue.buffer[offset..offset + queue.msg_size].copy_from_slice(msg);
            queue.write_index = (queue.write_index + 1) % queue.max_msgs;
            queue.pending += 1;
            queue.consumer
        };
        consumer.up()
    }

    /// Take one message, blocking while the queue is empty. `out` must be
    /// exactly one slot long.
    pub fn recv(self, out: &mut [u8]) -> Result<()> {
        let consumer = {
            let _guard = PreemptGuard::new();
            let registry = MQUEUES.lock();
            let queue = registry.get(self.0).ok_or(KernelError::NotFound)?;
            if queue.state == MqState::Finished {
                return Err(KernelError::Destroyed);
            }
            if out.len() != queue.msg_size {
                return Err(KernelError::InvalidArgument);
            }
            queue.consumer
        };

        consumer.down()?;

        let producer = {
            let _guard = PreemptGuard::new();
            let mut registry = MQUEUES.lock();
            let queue = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if queue.state == MqState::Finished {
                return Err(KernelError::Destroyed);
            }
            // Shared index: step back to the most recently filled slot.
            queue.write_index = (queue.write_index + queue.max_msgs - 1) % queue.max_msgs;
            let offset = queue.write_index * queue.msg_size;
            out.copy_from_slice(&queue.buffer[offset..offset + queue.msg_size]);
            queue.pending -= 1;
            queue.producer
        };
        producer.up()
    }

    /// Number of messages currently stored.
    pub fn len(self) -> Result<usize> {
        let _guard = PreemptGuard::new();
        let registry = MQUEUES.lock();
        let queue = registry.get(self.0).ok_or(KernelError::NotFound)?;
        if queue.state == MqState::Finished {
            return Err(KernelError::Destroyed);
        }
        Ok(queue.pending)
    }

    pub fn is_empty(self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Destroy the queue: free the buffer and tear down both internal
    /// semaphores, waking every blocked producer and consumer into
    /// `Destroyed`.
    pub fn destroy(self) -> Result<()> {
        let (producer, consumer) = {
            let _guard = PreemptGuard::new();
            let mut registry = MQUEUES.lock();
            let queue = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if queue.state == MqState::Finished {
                return Err(KernelError::Destroyed);
            }
            queue.state = MqState::Finished;
            queue.buffer = Box::default();
            (queue.producer, queue.consumer)
        };
        producer.destroy()?;
        consumer.destroy()?;
        log::debug!("mqueue {} destroyed", self.0);
        Ok(())
    }
}
