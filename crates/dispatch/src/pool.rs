//! The worker pool / dispatcher
//!
//! The pool owns a concurrent FIFO job queue and a dynamically sized set
//! of worker threads. Each worker opens one connection through the
//! caller's factory when it starts and keeps it for its whole life; jobs
//! are executed against whichever worker picks them up, under the
//! transaction lock in the mode the job declared.
//!
//! # Worker loop
//!
//! Each worker is a small state machine:
//! - **waiting**: blocked on the work condvar until a job is queued or a
//!   stop is signalled
//! - **draining**: dequeueing jobs until the queue is empty; a stop
//!   request takes effect only once the queue is empty, so a job that was
//!   accepted is never dropped
//! - **stopped**: connection dropped, counters decremented; the last
//!   worker out fires the pool-drained signal
//!
//! # Growth policy
//!
//! The first submitted job always spawns a worker if none exist. After
//! that a new worker is spawned only when the pool is multithreaded, the
//! job is a read, no worker is idle, and the live count is still below
//! `max_threads`. Writes never trigger growth: there is only ever one
//! writer slot of value.
//!
//! # Re-entrancy
//!
//! A job that submits to its own pool and waits would deadlock a worker
//! against itself. Submissions from a worker thread of this pool are
//! therefore detected (thread-local worker context) and executed inline
//! on the calling thread, never enqueued.

use arbiter_core::{Connection, ConnectionFactory, Error, Result};
use arbiter_lock::LockArbiter;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::handle::ConnectionHandle;
use crate::job::JobHandle;

/// Pool identity counter, for matching worker threads back to pools.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Set while the current thread is a pool worker, so re-entrant
    /// submissions can find their own connection and run inline.
    static ACTIVE_WORKER: RefCell<Option<ActiveWorker>> = RefCell::new(None);
}

struct ActiveWorker {
    pool_id: u64,
    handle: Rc<dyn Any>,
}

/// Clears the worker context when the worker loop exits.
struct WorkerContextGuard;

impl WorkerContextGuard {
    fn register(pool_id: u64, handle: Rc<dyn Any>) -> Self {
        ACTIVE_WORKER.with(|tls| {
            *tls.borrow_mut() = Some(ActiveWorker { pool_id, handle });
        });
        WorkerContextGuard
    }
}

impl Drop for WorkerContextGuard {
    fn drop(&mut self) {
        ACTIVE_WORKER.with(|tls| tls.borrow_mut().take());
    }
}

type JobFn<C> = Box<dyn FnOnce(std::result::Result<&ConnectionHandle<C>, Error>) + Send>;

struct QueuedJob<C: Connection> {
    run: JobFn<C>,
    name: String,
    enqueued: Instant,
}

struct PoolState<C: Connection> {
    queue: VecDeque<QueuedJob<C>>,
    /// Workers exit once this is set and the queue is empty.
    stopping: bool,
    /// New submissions are rejected once this clears.
    accepting: bool,
    live: usize,
    idle: usize,
    config: PoolConfig,
}

struct PoolInner<F: ConnectionFactory> {
    id: u64,
    name: String,
    factory: F,
    arbiter: Arc<LockArbiter>,
    state: Mutex<PoolState<F::Conn>>,
    /// Workers wait here for "job available or stop requested".
    work_cv: Condvar,
    /// `stop`/reconfig waits here for the last worker to exit.
    drained_cv: Condvar,
    /// Coarse lock serializing stop / resize / restart.
    reconfig: Mutex<()>,
    /// Workers ever spawned (monotonic, for diagnostics and tests).
    spawned_total: AtomicUsize,
}

/// A snapshot of pool counters.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Workers ever spawned over the pool's lifetime.
    pub spawned_total: usize,
    /// Workers currently running their loop.
    pub live: usize,
    /// Workers currently blocked waiting for work.
    pub idle: usize,
    /// Jobs queued and not yet picked up.
    pub queued: usize,
    /// Whether submissions are currently accepted.
    pub accepting: bool,
    /// Whether the pool may grow beyond one worker.
    pub multithreaded: bool,
}

/// The dispatcher: job queue plus worker threads for one database.
pub struct WorkerPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> WorkerPool<F> {
    /// Create a pool for the named database.
    ///
    /// No workers start until the first job is submitted.
    pub fn new(name: impl Into<String>, factory: F, config: PoolConfig, arbiter: Arc<LockArbiter>) -> Self {
        let name = name.into();
        let config = config.normalized();
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                name,
                factory,
                arbiter,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    stopping: false,
                    accepting: true,
                    live: 0,
                    idle: 0,
                    config,
                }),
                work_cv: Condvar::new(),
                drained_cv: Condvar::new(),
                reconfig: Mutex::new(()),
                spawned_total: AtomicUsize::new(0),
            }),
        }
    }

    /// Submit a read job and block until it completes.
    pub fn read_sync<T, J>(&self, name: &str, warn_threshold_ms: Option<u64>, f: J) -> Result<T>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> Result<T> + Send + 'static,
    {
        self.submit(false, name, f)?.join(warn_threshold_ms)
    }

    /// Submit a write job and block until it completes.
    pub fn write_sync<T, J>(&self, name: &str, warn_threshold_ms: Option<u64>, f: J) -> Result<T>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> Result<T> + Send + 'static,
    {
        self.submit(true, name, f)?.join(warn_threshold_ms)
    }

    /// Submit a read job without blocking; await it via
    /// [`JobHandle::join`].
    pub fn read_async<T, J>(&self, name: &str, f: J) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> Result<T> + Send + 'static,
    {
        self.submit(false, name, f)
    }

    /// Submit a write job without blocking; await it via
    /// [`JobHandle::join`].
    pub fn write_async<T, J>(&self, name: &str, f: J) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> Result<T> + Send + 'static,
    {
        self.submit(true, name, f)
    }

    fn submit<T, J>(&self, write: bool, name: &str, f: J) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        J: FnOnce(&ConnectionHandle<F::Conn>) -> Result<T> + Send + 'static,
    {
        // Re-entrant submission from one of our own workers: run inline
        // on this thread. Enqueueing would deadlock a worker against
        // itself the moment it waited on the result.
        if let Some(worker_handle) = self.current_worker_handle() {
            debug!(pool = %self.inner.name, job = %name, "re-entrant submission, executing inline");
            let (handle, slot) = JobHandle::new(name);
            let started = Instant::now();
            let result = run_under_lock(&worker_handle, write, name, f);
            slot.complete(result, started.elapsed());
            return Ok(handle);
        }

        let (handle, slot) = JobHandle::new(name);
        let job_name = name.to_string();
        let erased: JobFn<F::Conn> = Box::new(move |input| match input {
            Ok(conn) => {
                let started = Instant::now();
                let result = run_under_lock(conn, write, &job_name, f);
                slot.complete(result, started.elapsed());
            }
            Err(e) => slot.complete(Err(e), Duration::ZERO),
        });

        let mut state = self.inner.state.lock();
        if !state.accepting {
            return Err(Error::PoolStopped);
        }
        state.queue.push_back(QueuedJob {
            run: erased,
            name: name.to_string(),
            enqueued: Instant::now(),
        });

        let grow = state.live == 0
            || (state.config.multithreaded
                && !write
                && state.idle == 0
                && state.live < state.config.max_threads);
        if grow {
            self.inner.spawn_worker(&mut state);
        }
        self.inner.work_cv.notify_one();
        Ok(handle)
    }

    /// Reconfigure the pool's thread mode.
    ///
    /// Blocking: existing workers fully stop (queue drained first)
    /// before the pool relaunches at the new size.
    pub fn set_multithreaded(&self, on: bool) -> Result<()> {
        let _reconfig = self.inner.reconfig.lock();
        {
            let state = self.inner.state.lock();
            if state.config.multithreaded == on {
                return Ok(());
            }
        }
        info!(pool = %self.inner.name, multithreaded = on, "reconfiguring pool");
        self.inner.halt_workers(true);
        self.inner.state.lock().config.multithreaded = on;
        self.inner.relaunch();
        Ok(())
    }

    /// Stop the pool: reject new submissions immediately, finish the
    /// queue, wait for the last worker, release the engine's connection
    /// cache.
    pub fn stop(&self) -> Result<()> {
        let _reconfig = self.inner.reconfig.lock();
        info!(pool = %self.inner.name, "stopping pool");
        self.inner.halt_workers(false);
        self.inner.factory.clear_cache();
        Ok(())
    }

    /// Stop everything, clear cached engine state, and relaunch the
    /// minimum thread set.
    ///
    /// Required after a schema change: the engine does not tolerate
    /// continuing to use a connection opened before the reorg.
    pub fn clear_down_restart(&self) -> Result<()> {
        let _reconfig = self.inner.reconfig.lock();
        info!(pool = %self.inner.name, "clear-down restart");
        self.inner.halt_workers(true);
        self.inner.factory.clear_cache();
        self.inner.relaunch();
        Ok(())
    }

    /// Snapshot the pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            spawned_total: self.inner.spawned_total.load(Ordering::Acquire),
            live: state.live,
            idle: state.idle,
            queued: state.queue.len(),
            accepting: state.accepting,
            multithreaded: state.config.multithreaded,
        }
    }

    /// The arbiter governing this pool's database.
    pub fn arbiter(&self) -> &Arc<LockArbiter> {
        &self.inner.arbiter
    }

    fn current_worker_handle(&self) -> Option<Rc<ConnectionHandle<F::Conn>>> {
        ACTIVE_WORKER.with(|tls| {
            let tls = tls.borrow();
            let active = tls.as_ref()?;
            if active.pool_id != self.inner.id {
                return None;
            }
            Rc::clone(&active.handle)
                .downcast::<ConnectionHandle<F::Conn>>()
                .ok()
        })
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// Spawn one worker. Caller holds the state lock; `live` is bumped
    /// here so the `idle <= live` invariant never lapses.
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState<F::Conn>) {
        state.live += 1;
        let seq = self.spawned_total.fetch_add(1, Ordering::AcqRel) + 1;
        let inner = Arc::clone(self);
        let spawn_result = thread::Builder::new()
            .name(format!("{}-worker-{}", self.name, seq))
            .spawn(move || worker_loop(inner));
        if let Err(e) = spawn_result {
            state.live -= 1;
            error!(pool = %self.name, error = %e, "failed to spawn worker thread");
            if state.live == 0 {
                // No worker will ever pick these up; fail them now so
                // their callers are not left blocking in join.
                fail_queued(state, &format!("worker spawn failed: {e}"));
            }
        }
    }

    /// Signal workers to exit once the queue is drained and wait for the
    /// last one. The drained signal fires exactly once, from the final
    /// worker out.
    fn halt_workers(&self, keep_accepting: bool) {
        let mut state = self.state.lock();
        if !keep_accepting {
            state.accepting = false;
        }
        state.stopping = true;
        self.work_cv.notify_all();
        while state.live > 0 {
            self.drained_cv.wait(&mut state);
        }
        state.stopping = false;
    }

    /// Bring the pool back up at its floor size.
    fn relaunch(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.accepting = true;
        state.stopping = false;
        let floor = if state.config.multithreaded {
            state.config.min_threads
        } else {
            1
        };
        while state.live < floor {
            self.spawn_worker(&mut state);
        }
    }
}

/// Acquire the transaction lock in the job's mode, run the closure, and
/// convert a panic into a stored failure so the worker survives.
fn run_under_lock<C, T, J>(handle: &ConnectionHandle<C>, write: bool, name: &str, f: J) -> Result<T>
where
    C: Connection,
    J: FnOnce(&ConnectionHandle<C>) -> Result<T>,
{
    if write {
        let _guard = handle.lock().open_writer()?;
        catch_job(name, || f(handle))
    } else {
        let _guard = handle.lock().open_reader()?;
        catch_job(name, || f(handle))
    }
}

fn catch_job<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(job = %name, message = %message, "job panicked on worker");
            Err(Error::JobPanicked {
                job: name.to_string(),
                message,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Fail everything queued rather than leave callers hanging in `join`.
fn fail_queued<C: Connection>(state: &mut PoolState<C>, reason: &str) {
    while let Some(job) = state.queue.pop_front() {
        (job.run)(Err(Error::Engine(reason.to_string())));
    }
}

fn worker_loop<F: ConnectionFactory>(inner: Arc<PoolInner<F>>) {
    let conn = match inner.factory.connect() {
        Ok(conn) => conn,
        Err(e) => {
            error!(pool = %inner.name, error = %e, "worker failed to open a connection");
            let mut state = inner.state.lock();
            // A broken factory will break every future worker too.
            fail_queued(&mut state, &format!("connection open failed: {e}"));
            state.live -= 1;
            if state.live == 0 {
                inner.drained_cv.notify_all();
            }
            return;
        }
    };

    let config = inner.state.lock().config.clone();
    let handle = Rc::new(ConnectionHandle::new(conn, Arc::clone(&inner.arbiter), &config));
    let _context = WorkerContextGuard::register(inner.id, Rc::clone(&handle) as Rc<dyn Any>);
    debug!(pool = %inner.name, "worker started");

    loop {
        let job = {
            let mut state = inner.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break Some(job);
                }
                if state.stopping {
                    break None;
                }
                state.idle += 1;
                inner.work_cv.wait(&mut state);
                state.idle -= 1;
            }
        };

        match job {
            Some(job) => {
                debug!(
                    pool = %inner.name,
                    job = %job.name,
                    queued_ms = job.enqueued.elapsed().as_millis() as u64,
                    "executing job"
                );
                (job.run)(Ok(&handle));
            }
            None => break,
        }
    }

    let mut state = inner.state.lock();
    state.live -= 1;
    debug!(pool = %inner.name, remaining = state.live, "worker stopped");
    if state.live == 0 {
        inner.drained_cv.notify_all();
    }
}
