//! Shared test harness: a scripted in-memory engine.
//!
//! `TraceConn` emulates the engine's constraints closely enough to catch
//! locking bugs: all connections of one factory share a backing store
//! (like connections onto one file), every statement records how many
//! readers and writers were inside the engine at once, and contention
//! can be injected on demand.

use arbiterdb::{Connection, ConnectionFactory, CoreError, CoreResult, Row, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// State shared by every connection the factory hands out.
pub struct TraceState {
    /// The "file": a bag of integers.
    pub rows: Mutex<Vec<i64>>,
    /// Statements currently executing with write intent.
    pub writers_inside: AtomicIsize,
    /// Statements currently executing with read intent.
    pub readers_inside: AtomicIsize,
    /// Set if a write statement ever overlapped any other statement.
    pub overlap_seen: AtomicBool,
    /// Next N statements report the engine-busy condition.
    pub busy_next: AtomicU32,
    /// Times the factory's cache clear hook ran.
    pub cache_clears: AtomicUsize,
    /// Connections opened over the factory's lifetime.
    pub connects: AtomicUsize,
}

impl TraceState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(Vec::new()),
            writers_inside: AtomicIsize::new(0),
            readers_inside: AtomicIsize::new(0),
            overlap_seen: AtomicBool::new(false),
            busy_next: AtomicU32::new(0),
            cache_clears: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        })
    }

    fn take_busy(&self) -> bool {
        self.busy_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Bracket a statement, flagging any overlap a write takes part in.
    fn enter(&self, write: bool) {
        if write {
            let writers = self.writers_inside.fetch_add(1, Ordering::AcqRel) + 1;
            let readers = self.readers_inside.load(Ordering::Acquire);
            if writers > 1 || readers > 0 {
                self.overlap_seen.store(true, Ordering::Release);
            }
        } else {
            self.readers_inside.fetch_add(1, Ordering::AcqRel);
            if self.writers_inside.load(Ordering::Acquire) > 0 {
                self.overlap_seen.store(true, Ordering::Release);
            }
        }
        // Widen the window so overlaps actually collide.
        std::thread::sleep(Duration::from_millis(1));
    }

    fn exit(&self, write: bool) {
        if write {
            self.writers_inside.fetch_sub(1, Ordering::AcqRel);
        } else {
            self.readers_inside.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// One scripted connection. Understands `INSERT <n>`, `SELECT`, and
/// `FAIL <msg>` (always errors, for failure-path tests).
pub struct TraceConn {
    state: Arc<TraceState>,
}

impl Connection for TraceConn {
    fn execute(&mut self, sql: &str) -> CoreResult<u64> {
        if self.state.take_busy() {
            return Err(CoreError::EngineBusy("database is locked".into()));
        }
        if let Some(msg) = sql.strip_prefix("FAIL ") {
            return Err(CoreError::Engine(msg.to_string()));
        }
        self.state.enter(true);
        let result = match sql.strip_prefix("INSERT ") {
            Some(n) => match n.trim().parse::<i64>() {
                Ok(value) => {
                    self.state.rows.lock().push(value);
                    Ok(1)
                }
                Err(e) => Err(CoreError::Engine(format!("bad INSERT operand: {e}"))),
            },
            None => Err(CoreError::Engine(format!("unknown statement: {sql}"))),
        };
        self.state.exit(true);
        result
    }

    fn query(&mut self, sql: &str) -> CoreResult<Vec<Row>> {
        if self.state.take_busy() {
            return Err(CoreError::EngineBusy("database is locked".into()));
        }
        if !sql.starts_with("SELECT") {
            return Err(CoreError::Engine(format!("unknown query: {sql}")));
        }
        self.state.enter(false);
        let rows = self
            .state
            .rows
            .lock()
            .iter()
            .map(|n| vec![Value::Int(*n)])
            .collect();
        self.state.exit(false);
        Ok(rows)
    }

    fn begin(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

/// Factory sharing one [`TraceState`] across every connection.
pub struct TraceFactory {
    state: Arc<TraceState>,
}

impl TraceFactory {
    pub fn new(state: Arc<TraceState>) -> Self {
        Self { state }
    }
}

impl ConnectionFactory for TraceFactory {
    type Conn = TraceConn;

    fn connect(&self) -> CoreResult<TraceConn> {
        self.state.connects.fetch_add(1, Ordering::AcqRel);
        Ok(TraceConn {
            state: Arc::clone(&self.state),
        })
    }

    fn clear_cache(&self) {
        self.state.cache_clears.fetch_add(1, Ordering::AcqRel);
    }
}

/// Read the backing store as plain integers, sorted.
pub fn sorted_rows(state: &TraceState) -> Vec<i64> {
    let mut rows = state.rows.lock().clone();
    rows.sort_unstable();
    rows
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
