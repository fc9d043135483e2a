//! Coordinated shutdown: priority walk, stage sequencing, error fold.
//!
//! Services are visited in priority-descending order (higher priority shuts
//! down first; registration order breaks ties). Each visit runs
//! `Start` -> auxiliary-pool drain -> `End`, then shuts the primary pool
//! down and polls it to termination. Hook errors are counted into the
//! report, never propagated - shutdown must complete. The logging service
//! goes last so everything else can still log while it quiesces.

use std::thread;

use crate::runtime::registry::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    /// Quiesce external ingress; the auxiliary fabric is still up.
    Start,
    /// Final resource release after the auxiliary pools are gone.
    End,
}

/// Outcome of a coordinated shutdown. The error count doubles as the
/// process exit status.
#[derive(Debug)]
pub struct ShutdownReport {
    errors: usize,
    order: Vec<String>,
}

impl ShutdownReport {
    fn empty() -> Self {
        Self {
            errors: 0,
            order: Vec::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }

    /// Service names in visit order.
    pub fn order(&self) -> &[String] {
        &self.order
    }
}

pub(crate) fn coordinate(runtime: &Runtime) -> ShutdownReport {
    if !runtime.begin_shutdown() {
        tracing::warn!("shutdown already in progress");
        return ShutdownReport::empty();
    }

    let mut services = runtime.services_snapshot();
    services.sort_by(|a, b| {
        b.core
            .priority()
            .cmp(&a.core.priority())
            .then(a.seq.cmp(&b.seq))
    });

    let poll = runtime.config().shutdown_poll();
    let mut errors = 0usize;
    let mut order = Vec::with_capacity(services.len() + 1);

    tracing::info!("starting coordinated shutdown");
    for entry in &services {
        let name = entry.core.name().to_string();
        tracing::info!(service = %name, priority = entry.core.priority(), "service shutdown starting");
        entry.core.mark_terminated();

        if let Err(err) = entry.hooks.shutdown(ShutdownStage::Start) {
            errors += 1;
            tracing::warn!(service = %name, error = %err, "start stage failed");
        }

        for pool in entry.core.aux_pools() {
            if let Err(err) = entry.hooks.shutdown_aux_pool(&pool) {
                errors += 1;
                tracing::warn!(service = %name, pool = pool.name(), error = %err, "aux pool shutdown failed");
            }
        }

        if let Err(err) = entry.hooks.shutdown(ShutdownStage::End) {
            errors += 1;
            tracing::warn!(service = %name, error = %err, "end stage failed");
        }

        entry.core.primary_pool().shutdown();
        while !entry.core.primary_pool().is_terminated() {
            thread::sleep(poll);
        }
        tracing::info!(service = %name, "primary pool terminated");
        order.push(name);
    }

    runtime.static_pool().shutdown();
    while !runtime.static_pool().is_terminated() {
        thread::sleep(poll);
    }

    if let Some(log) = runtime.take_log_service() {
        let name = log.core.name().to_string();
        log.core.mark_terminated();
        if let Err(err) = log.hooks.shutdown(ShutdownStage::Start) {
            errors += 1;
            tracing::warn!(service = %name, error = %err, "log service start stage failed");
        }
        log.core.primary_pool().shutdown();
        while !log.core.primary_pool().is_terminated() {
            thread::sleep(poll);
        }
        if let Err(err) = log.hooks.shutdown(ShutdownStage::End) {
            errors += 1;
            tracing::warn!(service = %name, error = %err, "log service end stage failed");
        }
        order.push(name);
    }

    tracing::info!(errors, "shutdown complete");
    ShutdownReport { errors, order }
}
