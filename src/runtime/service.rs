//! Services: named, priority-ranked owners of worker pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::runtime::pool::{WorkerPool, WorkerThread};
use crate::runtime::shutdown::ShutdownStage;
use crate::runtime::task::TaskHandle;
use crate::runtime::RuntimeError;
use crate::session::SessionContext;

/// Lifecycle capability a service implementation provides at registration.
///
/// `Consumer` is whatever the implementation lets callers attach - an HTTP
/// context, an ingress binding. The shutdown coordinator calls `shutdown`
/// once per stage and `shutdown_aux_pool` once per pool the service forked
/// to; errors are counted into the shutdown report, never propagated.
pub trait ServiceHooks: Send + Sync + 'static {
    type Consumer;

    /// Called once, right after the service is constructed.
    fn init(&self, _service: &Arc<ServiceCore>) {}

    fn register_consumer(&self, consumer: Self::Consumer) -> Result<(), RuntimeError>;

    fn unregister_consumer(&self, consumer: Self::Consumer) -> Result<(), RuntimeError>;

    fn shutdown(&self, _stage: ShutdownStage) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn shutdown_aux_pool(&self, pool: &WorkerPool) -> Result<(), RuntimeError> {
        pool.shutdown();
        Ok(())
    }
}

/// Name, priority and pools of a registered service.
pub struct ServiceCore {
    name: String,
    priority: i32,
    primary: WorkerPool,
    aux: Mutex<Vec<WorkerPool>>,
    terminated: AtomicBool,
}

impl ServiceCore {
    pub(crate) fn new(name: String, priority: i32, primary: WorkerPool) -> Self {
        Self {
            name,
            priority,
            primary,
            aux: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn primary_pool(&self) -> &WorkerPool {
        &self.primary
    }

    /// Submit work on the primary pool, capturing the caller's session.
    ///
    /// This is the only sanctioned submission path: it must run on a worker
    /// thread so there is a session to capture.
    pub fn fork<T, F>(&self, task: F) -> Result<TaskHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let primary = self.primary.clone();
        self.fork_on(task, &primary)
    }

    /// Submit work on an arbitrary pool. A pool other than the primary is
    /// recorded as auxiliary and drained between the shutdown stages.
    pub fn fork_on<T, F>(&self, task: F, pool: &WorkerPool) -> Result<TaskHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.terminated.load(Ordering::Acquire) {
            return Err(RuntimeError::ShutdownInProgress);
        }
        if !WorkerThread::is_worker() {
            return Err(RuntimeError::NotAWorkerThread);
        }

        if pool != &self.primary {
            let mut aux = self.aux.lock().expect("aux pool lock");
            if !aux.iter().any(|known| known == pool) {
                aux.push(pool.clone());
            }
        }

        let session = SessionContext::current();
        let snapshot = session.properties();
        pool.submit(task, session, snapshot)
    }

    pub(crate) fn aux_pools(&self) -> Vec<WorkerPool> {
        self.aux.lock().expect("aux pool lock").clone()
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}

/// A registered service: core plus its typed hooks.
pub struct Service<H: ServiceHooks> {
    core: Arc<ServiceCore>,
    hooks: Arc<H>,
}

impl<H: ServiceHooks> Service<H> {
    pub(crate) fn new(core: Arc<ServiceCore>, hooks: Arc<H>) -> Self {
        Self { core, hooks }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn priority(&self) -> i32 {
        self.core.priority()
    }

    pub fn core(&self) -> &Arc<ServiceCore> {
        &self.core
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn register_consumer(&self, consumer: H::Consumer) -> Result<(), RuntimeError> {
        self.hooks.register_consumer(consumer)
    }

    pub fn unregister_consumer(&self, consumer: H::Consumer) -> Result<(), RuntimeError> {
        self.hooks.unregister_consumer(consumer)
    }

    pub fn fork<T, F>(&self, task: F) -> Result<TaskHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.core.fork(task)
    }

    pub fn fork_on<T, F>(&self, task: F, pool: &WorkerPool) -> Result<TaskHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.core.fork_on(task, pool)
    }
}

impl<H: ServiceHooks> Clone for Service<H> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

/// Object-safe view of the hooks, stored by the registry for shutdown.
pub(crate) trait ErasedHooks: Send + Sync {
    fn shutdown(&self, stage: ShutdownStage) -> Result<(), RuntimeError>;
    fn shutdown_aux_pool(&self, pool: &WorkerPool) -> Result<(), RuntimeError>;
}

impl<H: ServiceHooks> ErasedHooks for H {
    fn shutdown(&self, stage: ShutdownStage) -> Result<(), RuntimeError> {
        ServiceHooks::shutdown(self, stage)
    }

    fn shutdown_aux_pool(&self, pool: &WorkerPool) -> Result<(), RuntimeError> {
        ServiceHooks::shutdown_aux_pool(self, pool)
    }
}
