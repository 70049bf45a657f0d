// Bounded message queue: the shared write index makes receives return
// the most recently stored message first; producers block when the
// queue is full and resume as slots free up; destroy wakes every
// blocked producer into an error.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use fibros::KernelError;
use fibros::sync::MessageQueue;
use fibros::task;

static RECEIVED: AtomicUsize = AtomicUsize::new(0);
static PRODUCERS_STOPPED: AtomicUsize = AtomicUsize::new(0);

#[test]
fn mqueue_blocks_and_unblocks_under_pressure() {
    fibros::init().unwrap();

    // Shared-index ordering: after three sends, receives come back
    // newest-first.
    let q = MessageQueue::create(5, 4).unwrap();
    for v in [1i32, 2, 3] {
        q.send(&v.to_ne_bytes()).unwrap();
    }
    assert_eq!(q.len(), Ok(3));
    let mut buf = [0u8; 4];
    for expected in [3i32, 2, 1] {
        q.recv(&mut buf).unwrap();
        assert_eq!(i32::from_ne_bytes(buf), expected);
    }
    assert_eq!(q.is_empty(), Ok(true));

    // Wrong message length is rejected up front.
    assert_eq!(q.send(&[0u8; 3]), Err(KernelError::InvalidArgument));
    q.destroy().unwrap();

    // Pressure: capacity 5, three producers sending forever, one
    // consumer taking exactly 45. Producers fill the queue, block, and
    // only destroy() releases them.
    let q2 = MessageQueue::create(5, 4).unwrap();
    for p in 0..3 {
        task::spawn(&format!("prod{p}"), move || {
            let mut v: i32 = p;
            loop {
                match q2.send(&v.to_ne_bytes()) {
                    Ok(()) => v += 3,
                    Err(KernelError::Destroyed) => break,
                    Err(e) => panic!("send failed: {e}"),
                }
            }
            PRODUCERS_STOPPED.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    task::spawn("cons", move || {
        let mut buf = [0u8; 4];
        for _ in 0..45 {
            q2.recv(&mut buf).unwrap();
            RECEIVED.fetch_add(1, Ordering::SeqCst);
        }
    })
    .unwrap();

    common::wait_until(|| RECEIVED.load(Ordering::SeqCst) == 45, 10_000);

    // With the consumer gone the producers top the queue up and block.
    task::sleep_ms(20);
    assert_eq!(q2.len(), Ok(5));

    q2.destroy().unwrap();
    common::wait_until(|| PRODUCERS_STOPPED.load(Ordering::SeqCst) == 3, 2_000);

    assert_eq!(q2.send(&0i32.to_ne_bytes()), Err(KernelError::Destroyed));
    let mut buf = [0u8; 4];
    assert_eq!(q2.recv(&mut buf), Err(KernelError::Destroyed));
    assert_eq!(q2.len(), Err(KernelError::Destroyed));
}
