//! Concurrency behavior: writer exclusion, pool growth bounds, queue
//! draining on stop, and re-entrant submission, exercised with real
//! threads against the scripted engine.

mod common;

use arbiterdb::prelude::*;
use common::{sorted_rows, TraceFactory, TraceState};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

fn open_db(state: &Arc<TraceState>, pool: PoolConfig) -> Arc<Database<TraceFactory>> {
    common::init_tracing();
    Arc::new(
        Database::builder("conc.db", TraceFactory::new(Arc::clone(state)))
            .pool_config(pool.busy_backoff_ms(1))
            .lock_config(LockConfig::default().acquire_retry_ms(50).warn_after_ms(None))
            .warn_after_ms(None)
            .open(),
    )
}

#[test]
fn writes_never_overlap_reads_or_writes() {
    let state = TraceState::new();
    let db = open_db(
        &state,
        PoolConfig::default().multithreaded(true).max_threads(4),
    );

    let start = Arc::new(Barrier::new(8));
    let mut callers = Vec::new();
    for t in 0..8 {
        let db = Arc::clone(&db);
        let start = Arc::clone(&start);
        callers.push(thread::spawn(move || {
            start.wait();
            for i in 0..20 {
                if (t + i) % 3 == 0 {
                    let n = (t * 100 + i) as i64;
                    db.write_sync("mixed-write", move |conn| {
                        conn.execute(&format!("INSERT {n}"))
                    })
                    .unwrap();
                } else {
                    db.read_sync("mixed-read", |conn| conn.query("SELECT")).unwrap();
                }
            }
        }));
    }
    for caller in callers {
        caller.join().unwrap();
    }

    assert!(
        !state.overlap_seen.load(Ordering::Acquire),
        "a write statement overlapped another statement"
    );
    db.stop().unwrap();
}

#[test]
fn hundred_writes_from_eight_threads_all_land() {
    let state = TraceState::new();
    let db = open_db(
        &state,
        PoolConfig::default().multithreaded(true).max_threads(4),
    );

    let mut callers = Vec::new();
    for chunk in 0..8 {
        let db = Arc::clone(&db);
        callers.push(thread::spawn(move || {
            let lo = chunk * 100 / 8;
            let hi = (chunk + 1) * 100 / 8;
            for n in lo..hi {
                db.write_sync("bulk-write", move |conn| conn.execute(&format!("INSERT {n}")))
                    .unwrap();
            }
        }));
    }
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(sorted_rows(&state), (0..100).collect::<Vec<i64>>());
    db.stop().unwrap();
}

#[test]
fn read_growth_stops_at_max_threads() {
    let state = TraceState::new();
    let db = open_db(
        &state,
        PoolConfig::default().multithreaded(true).max_threads(4),
    );

    // Three reads that refuse to finish until all three are running
    // concurrently: forces growth to exactly three workers.
    let rendezvous = Arc::new(Barrier::new(3));
    let jobs: Vec<_> = (0..3)
        .map(|_| {
            let rendezvous = Arc::clone(&rendezvous);
            db.read_async("held-read", move |conn| {
                rendezvous.wait();
                conn.query("SELECT")
            })
            .unwrap()
        })
        .collect();
    for job in jobs {
        job.join().unwrap();
    }
    assert_eq!(db.stats().spawned_total, 3);

    // A flood of further reads reuses idle workers; never past the cap.
    let mut callers = Vec::new();
    for _ in 0..8 {
        let db = Arc::clone(&db);
        callers.push(thread::spawn(move || {
            for _ in 0..10 {
                db.read_sync("flood-read", |conn| conn.query("SELECT")).unwrap();
            }
        }));
    }
    for caller in callers {
        caller.join().unwrap();
    }

    let stats = db.stats();
    assert!(
        stats.spawned_total <= 4,
        "spawned {} workers with max_threads 4",
        stats.spawned_total
    );
    assert!(stats.live <= 4);
    db.stop().unwrap();
}

#[test]
fn writes_never_grow_the_pool() {
    let state = TraceState::new();
    let db = open_db(
        &state,
        PoolConfig::default().multithreaded(true).max_threads(4),
    );

    let mut callers = Vec::new();
    for t in 0..6 {
        let db = Arc::clone(&db);
        callers.push(thread::spawn(move || {
            for i in 0..10 {
                let n = (t * 10 + i) as i64;
                db.write_sync("write-only", move |conn| conn.execute(&format!("INSERT {n}")))
                    .unwrap();
            }
        }));
    }
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(db.stats().spawned_total, 1);
    assert_eq!(sorted_rows(&state).len(), 60);
    db.stop().unwrap();
}

#[test]
fn stop_drains_already_queued_jobs() {
    let state = TraceState::new();
    let db = open_db(&state, PoolConfig::default());

    // Queue well ahead of the single worker, then stop immediately.
    let jobs: Vec<_> = (0..50)
        .map(|n: i64| {
            db.write_async("queued-write", move |conn| conn.execute(&format!("INSERT {n}")))
                .unwrap()
        })
        .collect();
    db.stop().unwrap();

    // Every accepted job ran to completion before the workers exited.
    for job in jobs {
        job.join().unwrap();
    }
    assert_eq!(sorted_rows(&state), (0..50).collect::<Vec<i64>>());

    assert!(db
        .write_async("late", |conn| conn.execute("INSERT 99"))
        .unwrap_err()
        .is_stopped());
}

#[test]
fn reentrant_submission_does_not_deadlock() {
    let state = TraceState::new();
    let db = open_db(&state, PoolConfig::default());

    let inner_db = Arc::clone(&db);
    let total = db
        .write_sync("outer", move |conn| {
            conn.execute("INSERT 1")?;
            // Submitting to our own single-worker pool and waiting would
            // deadlock if this were queued; it must run inline.
            let rows = inner_db
                .read_sync("inner", |conn| conn.query("SELECT"))
                .map_err(|e| arbiterdb::CoreError::Engine(e.to_string()))?;
            conn.execute("INSERT 2")?;
            Ok(rows.len())
        })
        .unwrap();

    assert_eq!(total, 1);
    assert_eq!(sorted_rows(&state), vec![1, 2]);
    assert_eq!(db.stats().spawned_total, 1);
    db.stop().unwrap();
}

#[test]
fn mode_switch_drains_before_relaunch() {
    let state = TraceState::new();
    let db = open_db(&state, PoolConfig::default());

    for n in 0..10i64 {
        db.write_async("pre-switch", move |conn| conn.execute(&format!("INSERT {n}")))
            .unwrap();
    }
    db.set_multithreaded(true).unwrap();

    // Everything queued before the switch survived it.
    assert_eq!(sorted_rows(&state), (0..10).collect::<Vec<i64>>());
    assert!(db.stats().multithreaded);

    db.execute("INSERT 10").unwrap();
    assert_eq!(sorted_rows(&state).len(), 11);
    db.stop().unwrap();
}
