//! Service runtime - registry, worker pools, session propagation, shutdown.
//!
//! Provides:
//! - `Runtime` - explicit registry of named services plus the `run` gateway
//! - `Service` / `ServiceHooks` - lifecycle capability instead of inheritance
//! - `WorkerPool` - dynamically sized pools of session-carrying threads
//! - coordinated two-stage shutdown with an error-counting report

pub mod pool;
pub mod registry;
pub mod service;
pub mod shutdown;
pub mod task;

pub use pool::{WorkerPool, WorkerThread};
pub use registry::Runtime;
pub use service::{Service, ServiceCore, ServiceHooks};
pub use shutdown::{ShutdownReport, ShutdownStage};
pub use task::{TaskHandle, TaskOrder};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid argument for {field}: {reason}")]
    BadArgument { field: String, reason: String },

    #[error("service name already registered: {0}")]
    NameConflict(String),

    #[error("tasks must execute on a pool worker thread")]
    NotAWorkerThread,

    #[error("worker pool saturated: {pool}")]
    PoolSaturated { pool: String },

    #[error("shutdown in progress")]
    ShutdownInProgress,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
