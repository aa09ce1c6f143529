//! Mutual-exclusion property tests
//!
//! For any schedule of reads and writes across several threads, a write
//! hold never overlaps any other hold on the same arbiter.

use arbiter_lock::{LockArbiter, LockConfig, TransactionLock};
use proptest::prelude::*;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Op {
    Read,
    Write,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Read), Just(Op::Write)]
}

/// Counters observed inside lock windows. Readers count up while holding
/// shared access, the writer flips the writer count; any overlap of a
/// writer with anything else is a violation.
#[derive(Default)]
struct Observed {
    readers: AtomicIsize,
    writers: AtomicIsize,
}

fn run_schedule(per_thread: Vec<Vec<Op>>) {
    let arbiter = LockArbiter::new(
        "prop",
        LockConfig::default().acquire_retry_ms(10).warn_after_ms(None),
    );
    let observed = Arc::new(Observed::default());
    let barrier = Arc::new(Barrier::new(per_thread.len()));

    let handles: Vec<_> = per_thread
        .into_iter()
        .map(|ops| {
            let arbiter = Arc::clone(&arbiter);
            let observed = Arc::clone(&observed);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                let lock = TransactionLock::new(arbiter);
                barrier.wait();

                for op in ops {
                    match op {
                        Op::Read => {
                            let _guard = lock.open_reader().unwrap();
                            observed.readers.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(observed.writers.load(Ordering::SeqCst), 0);
                            thread::sleep(Duration::from_micros(200));
                            observed.readers.fetch_sub(1, Ordering::SeqCst);
                        }
                        Op::Write => {
                            let _guard = lock.open_writer().unwrap();
                            let writers = observed.writers.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(writers, 0, "two writers active at once");
                            assert_eq!(observed.readers.load(Ordering::SeqCst), 0);
                            thread::sleep(Duration::from_micros(200));
                            observed.writers.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(arbiter.outstanding_holds(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn writes_never_overlap_other_holds(
        schedules in prop::collection::vec(
            prop::collection::vec(op_strategy(), 1..12),
            2..4,
        )
    ) {
        run_schedule(schedules);
    }
}
