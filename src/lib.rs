#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod http;
pub mod runtime;
pub mod session;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the embedded-API surface at the crate root.
pub use crate::http::{
    HeaderMap, HttpHeader, HttpPackage, HttpRequest, HttpResponse, Method, PackageParser,
    ParseError, Protocol, RequestLine, RequestParser, ResponseParser, StatusLine,
};
pub use crate::runtime::{
    Runtime, RuntimeError, Service, ServiceCore, ServiceHooks, ShutdownReport, ShutdownStage,
    TaskHandle, WorkerPool, WorkerThread,
};
pub use crate::session::{SessionContext, SessionId};
