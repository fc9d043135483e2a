//! Incremental HTTP/1.1 message framing.
//!
//! Provides:
//! - `HttpHeader` / `HeaderMap` - case-insensitive header storage
//! - `PackageParser` - three-state assembly from arbitrarily split chunks
//! - `HttpPackage` - the finished message, request or response flavored

pub mod header;
pub mod package;
pub mod request;
pub mod response;

pub use header::{HeaderMap, HttpHeader};
pub use package::{HttpPackage, PackageParser, Protocol, StartLine, HTTP_VERSION_1_1};
pub use request::{HttpRequest, Method, RequestLine, RequestParser};
pub use response::{HttpResponse, ResponseParser, StatusLine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),

    #[error("unknown method: {0:?}")]
    UnknownMethod(String),

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),
}
