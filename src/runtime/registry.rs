//! The runtime value: service registry, static gateway pool, shutdown entry.
//!
//! There is no process singleton; embedders construct a `Runtime` at program
//! entry and tests construct fresh ones.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::RuntimeConfig;
use crate::runtime::pool::WorkerPool;
use crate::runtime::service::{ErasedHooks, Service, ServiceCore, ServiceHooks};
use crate::runtime::shutdown::{self, ShutdownReport};
use crate::runtime::RuntimeError;
use crate::session::SessionContext;

pub(crate) struct RegisteredService {
    pub(crate) core: Arc<ServiceCore>,
    pub(crate) hooks: Arc<dyn ErasedHooks>,
    pub(crate) seq: u64,
}

impl Clone for RegisteredService {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            hooks: Arc::clone(&self.hooks),
            seq: self.seq,
        }
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    services: Mutex<HashMap<String, RegisteredService>>,
    log_service: Mutex<Option<RegisteredService>>,
    static_pool: WorkerPool,
    next_seq: AtomicU64,
    shutting_down: AtomicBool,
    signal_flag: Arc<AtomicBool>,
}

/// Handle to the runtime; clones share the same registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let static_pool = WorkerPool::new("static", config.static_pool);
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                services: Mutex::new(HashMap::new()),
                log_service: Mutex::new(None),
                static_pool,
                next_seq: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                signal_flag: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RuntimeConfig::default())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Register a service under a unique name. The primary pool is built
    /// from the runtime config and `hooks.init` runs before the service
    /// becomes visible.
    pub fn register<H: ServiceHooks>(
        &self,
        name: &str,
        priority: i32,
        hooks: H,
    ) -> Result<Service<H>, RuntimeError> {
        let mut services = self.inner.services.lock().expect("service registry lock");
        if services.contains_key(name) {
            return Err(RuntimeError::NameConflict(name.to_string()));
        }

        let (core, hooks) = self.construct(name, priority, hooks)?;
        services.insert(
            name.to_string(),
            RegisteredService {
                core: Arc::clone(&core),
                hooks: hooks.clone(),
                seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        tracing::info!(service = name, priority, "service registered");
        Ok(Service::new(core, hooks))
    }

    /// Register the logging service in its own slot. It bootstraps before
    /// general services can log, so its registration is not logged and it
    /// is shut down last.
    pub fn register_log_service<H: ServiceHooks>(
        &self,
        name: &str,
        priority: i32,
        hooks: H,
    ) -> Result<Service<H>, RuntimeError> {
        let mut slot = self.inner.log_service.lock().expect("log service lock");
        if slot.is_some() {
            return Err(RuntimeError::NameConflict(name.to_string()));
        }

        let (core, hooks) = self.construct(name, priority, hooks)?;
        *slot = Some(RegisteredService {
            core: Arc::clone(&core),
            hooks: hooks.clone(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        });
        Ok(Service::new(core, hooks))
    }

    fn construct<H: ServiceHooks>(
        &self,
        name: &str,
        priority: i32,
        hooks: H,
    ) -> Result<(Arc<ServiceCore>, Arc<H>), RuntimeError> {
        if name.trim().is_empty() {
            return Err(RuntimeError::BadArgument {
                field: "name".to_string(),
                reason: "service name cannot be empty".to_string(),
            });
        }
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(RuntimeError::ShutdownInProgress);
        }

        let primary = WorkerPool::new(name, self.inner.config.service_pool);
        let core = Arc::new(ServiceCore::new(name.to_string(), priority, primary));
        let hooks = Arc::new(hooks);
        hooks.init(&core);
        Ok((core, hooks))
    }

    /// Gateway for callers outside the service fabric: fire-and-forget on
    /// the static pool, with the supplied session (guest when `None`).
    pub fn run<F>(&self, task: F, session: Option<SessionContext>) -> Result<(), RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let session = session.unwrap_or_else(SessionContext::guest);
        self.inner.static_pool.execute(task, session, HashMap::new())
    }

    pub fn install_signal_handlers(&self) -> io::Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        let _ = signal_hook::flag::register(SIGTERM, Arc::clone(&self.inner.signal_flag))?;
        let _ = signal_hook::flag::register(SIGINT, Arc::clone(&self.inner.signal_flag))?;
        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.inner.signal_flag.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.signal_flag.load(Ordering::Acquire)
    }

    /// Block until a shutdown signal arrives, then run coordinated
    /// shutdown and return its report.
    pub fn run_until_shutdown(&self) -> ShutdownReport {
        while !self.shutdown_requested() {
            thread::sleep(self.inner.config.shutdown_poll());
        }
        tracing::info!("shutdown signal received");
        self.shutdown()
    }

    /// Coordinated shutdown of every registered service. See the shutdown
    /// module for the stage sequence.
    pub fn shutdown(&self) -> ShutdownReport {
        shutdown::coordinate(self)
    }

    /// Terminate the process with the report's error count as exit status.
    pub fn exit(report: ShutdownReport) -> ! {
        std::process::exit(report.error_count() as i32)
    }

    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.inner.shutting_down.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn services_snapshot(&self) -> Vec<RegisteredService> {
        self.inner
            .services
            .lock()
            .expect("service registry lock")
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn take_log_service(&self) -> Option<RegisteredService> {
        self.inner.log_service.lock().expect("log service lock").take()
    }

    pub(crate) fn static_pool(&self) -> &WorkerPool {
        &self.inner.static_pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crossbeam::channel;
    use std::time::Duration;

    struct NoConsumers;

    impl ServiceHooks for NoConsumers {
        type Consumer = ();

        fn register_consumer(&self, _: ()) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn unregister_consumer(&self, _: ()) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn test_runtime() -> Runtime {
        let mut config = RuntimeConfig::default();
        config.service_pool = PoolConfig {
            core_size: 0,
            max_size: 4,
            keep_alive_secs: 1,
        };
        config.static_pool = config.service_pool;
        config.shutdown_poll_ms = 10;
        Runtime::new(config)
    }

    #[test]
    fn duplicate_names_conflict() {
        let runtime = test_runtime();
        runtime.register("alpha", 1, NoConsumers).expect("first");
        let second = runtime.register("alpha", 2, NoConsumers);
        assert!(matches!(second, Err(RuntimeError::NameConflict(name)) if name == "alpha"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let runtime = test_runtime();
        let result = runtime.register("  ", 1, NoConsumers);
        assert!(matches!(result, Err(RuntimeError::BadArgument { .. })));
    }

    #[test]
    fn registration_after_shutdown_is_refused() {
        let runtime = test_runtime();
        runtime.shutdown();
        let result = runtime.register("late", 1, NoConsumers);
        assert!(matches!(result, Err(RuntimeError::ShutdownInProgress)));
    }

    #[test]
    fn run_gateway_executes_with_supplied_session() {
        let runtime = test_runtime();
        let session = SessionContext::new();
        session.put("u", "alice");
        let expected = session.clone();
        let (tx, rx) = channel::bounded(1);
        runtime
            .run(
                move || {
                    let current = SessionContext::current();
                    let _ = tx.send((current == expected, current.get("u")));
                },
                Some(session),
            )
            .expect("run");
        let (same, user) = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert!(same);
        assert_eq!(user.as_deref(), Some("alice"));
    }

    #[test]
    fn run_gateway_substitutes_guest_session() {
        let runtime = test_runtime();
        let (tx, rx) = channel::bounded(1);
        runtime
            .run(
                move || {
                    let _ = tx.send(SessionContext::current().is_guest());
                },
                None,
            )
            .expect("run");
        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("task ran"));
    }

    #[test]
    fn log_service_slot_is_single() {
        let runtime = test_runtime();
        runtime
            .register_log_service("log", 0, NoConsumers)
            .expect("first log service");
        let second = runtime.register_log_service("log2", 0, NoConsumers);
        assert!(matches!(second, Err(RuntimeError::NameConflict(_))));
    }
}
