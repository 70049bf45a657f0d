// Starvation freedom through aging: a task spawned at the least urgent
// priority (+20) must still be dispatched while a priority-0 task keeps
// yielding, because every scheduling decision ages the tasks that were
// not chosen. 40 yields of the busy task give aging more than enough
// decisions to drag the +20 task to the head.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static LOW_RAN: AtomicBool = AtomicBool::new(false);
static LOW_SEEN_BY_BUSY: AtomicBool = AtomicBool::new(false);
static DONE: AtomicUsize = AtomicUsize::new(0);

#[test]
fn aging_prevents_starvation() {
    fibros::init().unwrap();

    fibros::task::spawn_with_priority("busy", 0, || {
        for _ in 0..40 {
            fibros::task::yield_now();
        }
        LOW_SEEN_BY_BUSY.store(LOW_RAN.load(Ordering::SeqCst), Ordering::SeqCst);
        DONE.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    fibros::task::spawn_with_priority("low", 20, || {
        LOW_RAN.store(true, Ordering::SeqCst);
        DONE.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    common::yield_until(|| DONE.load(Ordering::SeqCst) == 2, 500);

    assert!(LOW_RAN.load(Ordering::SeqCst));
    assert!(
        LOW_SEEN_BY_BUSY.load(Ordering::SeqCst),
        "the +20 task should have run before the busy task finished its 40 yields"
    );
}
