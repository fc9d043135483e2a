//! Task wrappers carrying the submitter's session across the pool hand-off.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

use crossbeam::channel::Receiver;

use crate::runtime::pool::WorkerThread;
use crate::runtime::RuntimeError;
use crate::session::SessionContext;

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Ordering key for priority-queue backed pools.
///
/// The comparator inverts the creation timestamp so newer tasks order
/// first; the sequence keeps equal timestamps stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOrder {
    created: Instant,
    seq: u64,
}

impl TaskOrder {
    fn next() -> Self {
        Self {
            created: Instant::now(),
            seq: TASK_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for TaskOrder {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .created
            .cmp(&self.created)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TaskOrder {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Owns the user task plus the session captured at submission.
///
/// Running the wrapper binds the captured session into the worker's slot,
/// merges the property snapshot, runs the task, and clears the slot on
/// every exit path. The merge is deliberately left in place afterwards.
pub(crate) struct TaskWrapper {
    task: Box<dyn FnOnce() + Send + 'static>,
    session: SessionContext,
    snapshot: HashMap<String, String>,
    order: TaskOrder,
}

impl TaskWrapper {
    pub(crate) fn new(
        task: Box<dyn FnOnce() + Send + 'static>,
        session: SessionContext,
        snapshot: HashMap<String, String>,
    ) -> Self {
        Self {
            task,
            session,
            snapshot,
            order: TaskOrder::next(),
        }
    }

    pub(crate) fn order(&self) -> TaskOrder {
        self.order
    }

    /// Execute on the current thread, which must be a pool worker.
    pub(crate) fn run(self) -> Result<(), RuntimeError> {
        if !WorkerThread::is_worker() {
            return Err(RuntimeError::NotAWorkerThread);
        }

        WorkerThread::bind_session(self.session.clone());
        let _slot = SlotGuard;
        self.session.put_all(&self.snapshot);
        (self.task)();
        Ok(())
    }
}

struct SlotGuard;

impl Drop for SlotGuard {
    fn drop(&mut self) {
        WorkerThread::clear_session();
    }
}

/// One-shot future for a value-returning task.
pub struct TaskHandle<T> {
    rx: Receiver<std::thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: Receiver<std::thread::Result<T>>) -> Self {
        Self { rx }
    }

    /// Block until the task finishes. A panic inside the task surfaces as
    /// `RuntimeError::TaskFailed`.
    pub fn join(self) -> Result<T, RuntimeError> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(RuntimeError::TaskFailed(panic_message(&panic))),
            Err(_) => Err(RuntimeError::TaskFailed(
                "task dropped before completion".to_string(),
            )),
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Wrap a value-returning task so its outcome, panic included, lands in the
/// handle channel.
pub(crate) fn deliver_into<T, F>(
    task: F,
    tx: crossbeam::channel::Sender<std::thread::Result<T>>,
) -> Box<dyn FnOnce() + Send + 'static>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(task));
        let _ = tx.send(result);
    })
}

/// Wrap a fire-and-forget task; panics are logged and swallowed.
pub(crate) fn deliver_detached<F>(task: F) -> Box<dyn FnOnce() + Send + 'static>
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        if let Err(panicked) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::warn!(error = %panic_message(&panicked), "detached task panicked");
        }
    })
}
