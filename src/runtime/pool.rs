//! Dynamically sized worker pools with session-carrying threads.
//!
//! Hand-off is a rendezvous: a submission either reaches an idle worker,
//! spawns a new one (up to `max_size`), or is rejected. Idle workers past
//! `keep_alive` shrink the pool back to `core_size`.
//!
//! Pools never receive raw tasks from callers; submission goes through
//! `Service::fork` or the runtime's `run` gateway so the caller's session
//! is always captured.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::runtime::task::{self, TaskHandle, TaskWrapper};
use crate::runtime::RuntimeError;
use crate::session::SessionContext;

thread_local! {
    static IS_WORKER: Cell<bool> = const { Cell::new(false) };
    static BOUND_SESSION: RefCell<Option<SessionContext>> = const { RefCell::new(None) };
}

/// Thread-of-execution state for pool workers. The task wrapper owns slot
/// installation; user code only reads it.
pub struct WorkerThread;

impl WorkerThread {
    pub fn is_worker() -> bool {
        IS_WORKER.with(|flag| flag.get())
    }

    /// The session bound to this worker, if any. `None` on non-worker
    /// threads and on workers between tasks.
    pub fn session() -> Option<SessionContext> {
        BOUND_SESSION.with(|slot| slot.borrow().clone())
    }

    fn enter() {
        IS_WORKER.with(|flag| flag.set(true));
    }

    pub(crate) fn bind_session(session: SessionContext) {
        BOUND_SESSION.with(|slot| *slot.borrow_mut() = Some(session));
    }

    pub(crate) fn clear_session() {
        BOUND_SESSION.with(|slot| *slot.borrow_mut() = None);
    }
}

struct PoolShared {
    name: String,
    config: PoolConfig,
    live: AtomicUsize,
    shutdown: AtomicBool,
}

/// Dynamically sized pool of worker threads. Clones share the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    tx: Arc<Mutex<Option<Sender<TaskWrapper>>>>,
    rx: Receiver<TaskWrapper>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        let mut config = config;
        // A pool that can never run anything is a configuration mistake.
        config.max_size = config.max_size.max(config.core_size).max(1);
        let (tx, rx) = channel::bounded(0);
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                config,
                live: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Refuse new work and let in-flight tasks drain. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.tx.lock().expect("pool sender lock").take();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// True once shutdown started and every worker has exited.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.live.load(Ordering::Acquire) == 0
    }

    pub(crate) fn submit<T, F>(
        &self,
        task: F,
        session: SessionContext,
        snapshot: HashMap<String, String>,
    ) -> Result<TaskHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let wrapper = TaskWrapper::new(task::deliver_into(task, tx), session, snapshot);
        self.dispatch(wrapper)?;
        Ok(TaskHandle::new(rx))
    }

    pub(crate) fn execute<F>(
        &self,
        task: F,
        session: SessionContext,
        snapshot: HashMap<String, String>,
    ) -> Result<(), RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(TaskWrapper::new(
            task::deliver_detached(task),
            session,
            snapshot,
        ))
    }

    fn dispatch(&self, wrapper: TaskWrapper) -> Result<(), RuntimeError> {
        if self.is_shutdown() {
            return Err(RuntimeError::ShutdownInProgress);
        }

        // The sender lock also serializes sizing decisions.
        let guard = self.tx.lock().expect("pool sender lock");
        let sender = match guard.as_ref() {
            Some(sender) => sender,
            None => return Err(RuntimeError::ShutdownInProgress),
        };

        match sender.try_send(wrapper) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(wrapper)) => self.spawn_worker(wrapper),
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::ShutdownInProgress),
        }
    }

    /// No idle worker took the hand-off: grow the pool, or reject at max.
    fn spawn_worker(&self, first: TaskWrapper) -> Result<(), RuntimeError> {
        let live = self.shared.live.load(Ordering::Acquire);
        if live >= self.shared.config.max_size {
            return Err(RuntimeError::PoolSaturated {
                pool: self.shared.name.clone(),
            });
        }

        self.shared.live.fetch_add(1, Ordering::AcqRel);
        let shared = Arc::clone(&self.shared);
        let rx = self.rx.clone();
        let name = format!("{}-{}", self.shared.name, Uuid::new_v4());
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(shared, rx, first));

        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                Err(RuntimeError::Io(err))
            }
        }
    }
}

impl PartialEq for WorkerPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for WorkerPool {}

fn worker_loop(shared: Arc<PoolShared>, rx: Receiver<TaskWrapper>, first: TaskWrapper) {
    WorkerThread::enter();
    run_wrapper(first);

    loop {
        match rx.recv_timeout(shared.config.keep_alive()) {
            Ok(wrapper) => run_wrapper(wrapper),
            Err(RecvTimeoutError::Timeout) => {
                let live = shared.live.load(Ordering::Acquire);
                // The exit decision and the decrement must be one step, or
                // two idle workers could both shrink past core.
                if live > shared.config.core_size
                    && shared
                        .live
                        .compare_exchange(live, live - 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.live.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        }
    }
}

fn run_wrapper(wrapper: TaskWrapper) {
    tracing::trace!(task_seq = wrapper.order().seq(), "task starting");
    if let Err(err) = wrapper.run() {
        tracing::error!(error = %err, "task wrapper refused to run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn small_config() -> PoolConfig {
        PoolConfig {
            core_size: 0,
            max_size: 2,
            keep_alive_secs: 1,
        }
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn submit_runs_task_and_returns_value() {
        let pool = WorkerPool::new("test", small_config());
        let handle = pool
            .submit(|| 41 + 1, SessionContext::guest(), HashMap::new())
            .expect("submit");
        assert_eq!(handle.join().expect("join"), 42);
    }

    #[test]
    fn workers_carry_pool_derived_names() {
        let pool = WorkerPool::new("billing", small_config());
        let handle = pool
            .submit(
                || thread::current().name().map(str::to_string),
                SessionContext::guest(),
                HashMap::new(),
            )
            .expect("submit");
        let name = handle.join().expect("join").expect("thread name");
        assert!(name.starts_with("billing-"), "unexpected name {name}");
    }

    #[test]
    fn workers_observe_the_submitted_session() {
        let pool = WorkerPool::new("test", small_config());
        let session = SessionContext::new();
        let expected = session.clone();
        let handle = pool
            .submit(
                move || SessionContext::current() == expected,
                session,
                HashMap::new(),
            )
            .expect("submit");
        assert!(handle.join().expect("join"));
    }

    #[test]
    fn saturated_pool_rejects_submission() {
        let config = PoolConfig {
            core_size: 0,
            max_size: 1,
            keep_alive_secs: 1,
        };
        let pool = WorkerPool::new("tiny", config);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded::<()>(0);
        let busy = pool
            .submit(
                move || {
                    let _ = started_tx.send(());
                    let _ = release_rx.recv();
                },
                SessionContext::guest(),
                HashMap::new(),
            )
            .expect("first submit");
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker started");

        let rejected = pool.submit(|| (), SessionContext::guest(), HashMap::new());
        assert!(matches!(
            rejected,
            Err(RuntimeError::PoolSaturated { .. })
        ));

        release_tx.send(()).expect("release worker");
        busy.join().expect("join busy task");
    }

    #[test]
    fn shutdown_drains_and_terminates() {
        let pool = WorkerPool::new("test", small_config());
        let handle = pool
            .submit(
                || thread::sleep(Duration::from_millis(50)),
                SessionContext::guest(),
                HashMap::new(),
            )
            .expect("submit");
        pool.shutdown();
        handle.join().expect("in-flight task finishes");
        assert!(wait_until(Duration::from_secs(5), || pool.is_terminated()));

        let refused = pool.submit(|| (), SessionContext::guest(), HashMap::new());
        assert!(matches!(refused, Err(RuntimeError::ShutdownInProgress)));
    }

    #[test]
    fn idle_workers_shrink_to_core() {
        let config = PoolConfig {
            core_size: 0,
            max_size: 2,
            keep_alive_secs: 0,
        };
        let pool = WorkerPool::new("test", config);
        pool.submit(|| (), SessionContext::guest(), HashMap::new())
            .expect("submit")
            .join()
            .expect("join");
        assert!(wait_until(Duration::from_secs(5), || {
            pool.live_workers() == 0
        }));
    }

    #[test]
    fn handle_reports_finished_after_completion() {
        let pool = WorkerPool::new("test", small_config());
        let handle = pool
            .submit(|| 1, SessionContext::guest(), HashMap::new())
            .expect("submit");
        assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
        assert_eq!(handle.join().expect("join"), 1);
    }

    #[test]
    fn panicking_task_surfaces_through_the_handle() {
        let pool = WorkerPool::new("test", small_config());
        let handle = pool
            .submit(
                || -> i32 { panic!("boom") },
                SessionContext::guest(),
                HashMap::new(),
            )
            .expect("submit");
        match handle.join() {
            Err(RuntimeError::TaskFailed(message)) => assert!(message.contains("boom")),
            other => panic!("expected TaskFailed, got {other:?}"),
        }

        // The worker survives the panic.
        let next = pool
            .submit(|| 7, SessionContext::guest(), HashMap::new())
            .expect("submit after panic");
        assert_eq!(next.join().expect("join"), 7);
    }
}
