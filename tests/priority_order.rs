// Dispatch order follows current priority: with three freshly spawned
// tasks at priorities 0, -5 and +5, the -5 task runs first, then 0,
// then +5. Main only yields, so it contributes no marker.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

static SEQ: AtomicUsize = AtomicUsize::new(0);
static SLOTS: [AtomicUsize; 3] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

fn record(marker: usize) {
    let pos = SEQ.fetch_add(1, Ordering::SeqCst);
    SLOTS[pos].store(marker, Ordering::SeqCst);
}

#[test]
fn most_urgent_priority_dispatches_first() {
    fibros::init().unwrap();

    fibros::task::spawn_with_priority("t1", 0, || record(1)).unwrap();
    fibros::task::spawn_with_priority("t2", -5, || record(2)).unwrap();
    fibros::task::spawn_with_priority("t3", 5, || record(3)).unwrap();

    common::yield_until(|| SEQ.load(Ordering::SeqCst) == 3, 200);

    let order: Vec<usize> = SLOTS.iter().map(|s| s.load(Ordering::SeqCst)).collect();
    assert_eq!(order, vec![2, 1, 3]);
}
