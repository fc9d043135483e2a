//! Incremental assembly of HTTP messages from byte chunks.
//!
//! Chunks may split anywhere - mid-header, mid-CRLF, mid-body. The parser
//! is the only durable state across calls; once it completes it yields an
//! immutable `HttpPackage` and ignores further input. One parser per
//! connection; `&mut self` serializes `add_data`, the parser is not
//! reentrant.

use super::header::{HeaderMap, HttpHeader};
use super::ParseError;

pub const HTTP_VERSION_1_1: &str = "HTTP/1.1";

const CR: u8 = b'\r';
const LF: u8 = b'\n';

const DEFAULT_LOG_TAG: &str = "http";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// The literal token emitted when the message is serialized.
    pub fn token(self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
        }
    }

    /// Serialize a version string under this protocol's token: an https
    /// package emits `"HTTP/1.1"` as `"HTTPS/1.1"`.
    pub fn write_version(self, version: &str, out: &mut Vec<u8>) {
        out.extend_from_slice(self.token().as_bytes());
        if let Some((_, rest)) = version.split_once('/') {
            out.push(b'/');
            out.extend_from_slice(rest.as_bytes());
        }
    }
}

/// First line of a message; the request and response flavors interpret it
/// differently. `trim_body` is the hook for subtypes that post-process the
/// raw body (transfer encodings stay out of the core).
pub trait StartLine: Sized {
    fn parse(line: &str) -> Result<Self, ParseError>;

    fn http_version(&self) -> &str;

    /// Serialize the start line, without the trailing CRLF. The version
    /// field is emitted under the package protocol's token.
    fn write(&self, protocol: Protocol, out: &mut Vec<u8>);

    fn trim_body(body: Vec<u8>) -> Vec<u8> {
        body
    }
}

/// A fully parsed message. Headers and body are reachable only here, after
/// the parser completed.
#[derive(Debug)]
pub struct HttpPackage<L> {
    pub protocol: Protocol,
    pub start: L,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl<L: StartLine> HttpPackage<L> {
    pub fn http_version(&self) -> &str {
        self.start.http_version()
    }

    pub fn header(&self, name: &str) -> Option<&HttpHeader> {
        self.headers.get(name)
    }

    /// RFC 7230 framing: start line, header lines, blank CRLF, body. The
    /// start-line version carries `protocol`'s token.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 128);
        self.start.write(self.protocol, &mut out);
        out.extend_from_slice(b"\r\n");
        for header in self.headers.iter() {
            out.extend_from_slice(header.name().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

enum ParseState {
    Headers,
    Body,
    Complete,
}

/// Three-state incremental parser: header-region accumulation, body-region
/// accumulation, complete.
pub struct PackageParser<L: StartLine> {
    state: ParseState,
    accumulator: Vec<u8>,
    // A CR at the end of one chunk may pair with an LF at the start of the
    // next; it is remembered here instead of being consumed blindly.
    pending_cr: bool,
    lines: Vec<String>,
    headers: HeaderMap,
    package: Option<HttpPackage<L>>,
    defect: Option<ParseError>,
    log_tag: String,
}

impl<L: StartLine> PackageParser<L> {
    pub fn new() -> Self {
        Self {
            state: ParseState::Headers,
            accumulator: Vec::new(),
            pending_cr: false,
            lines: Vec::new(),
            headers: HeaderMap::new(),
            package: None,
            defect: None,
            log_tag: DEFAULT_LOG_TAG.to_string(),
        }
    }

    pub fn with_log_tag(mut self, tag: impl Into<String>) -> Self {
        self.log_tag = tag.into();
        self
    }

    /// Feed the next chunk. No-op once complete; a chunk that carries the
    /// package past its declared `Content-Length` completes it.
    pub fn add_data(&mut self, data: &[u8]) {
        match self.state {
            ParseState::Complete => {
                tracing::debug!(tag = %self.log_tag, "data discarded after completion");
            }
            ParseState::Headers => {
                if let Some(rest) = self.consume_header_bytes(data) {
                    self.accumulator.extend_from_slice(rest);
                    self.try_complete();
                }
            }
            ParseState::Body => {
                self.accumulator.extend_from_slice(data);
                self.try_complete();
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ParseState::Complete)
    }

    /// A recorded parse defect leaves the package permanently incomplete;
    /// the connection owner decides whether to abort.
    pub fn defect(&self) -> Option<&ParseError> {
        self.defect.as_ref()
    }

    pub fn package(&self) -> Option<&HttpPackage<L>> {
        self.package.as_ref()
    }

    pub fn into_package(self) -> Option<HttpPackage<L>> {
        self.package
    }

    /// Scan for CRLF-delimited lines until the blank line. Returns the
    /// chunk remainder once the header region ends, `None` while still in
    /// it.
    fn consume_header_bytes<'d>(&mut self, data: &'d [u8]) -> Option<&'d [u8]> {
        for (i, &byte) in data.iter().enumerate() {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == LF {
                    if self.accumulator.is_empty() {
                        // Two CRLFs in a row: the header region is done.
                        self.finish_headers();
                        return Some(&data[i + 1..]);
                    }
                    let line = String::from_utf8_lossy(&self.accumulator)
                        .trim()
                        .to_string();
                    if !line.is_empty() {
                        self.lines.push(line);
                    }
                    self.accumulator.clear();
                    continue;
                }
                // Lone CR belongs to the line.
                self.accumulator.push(CR);
            }
            if byte == CR {
                self.pending_cr = true;
            } else {
                self.accumulator.push(byte);
            }
        }
        None
    }

    /// Blank line seen: lines beyond the first become headers, the
    /// accumulator switches to collecting body bytes.
    fn finish_headers(&mut self) {
        self.accumulator.clear();
        self.pending_cr = false;

        if self.lines.is_empty() {
            self.record_defect(ParseError::MalformedStartLine(String::new()));
        }

        let mut parsed = HeaderMap::new();
        let mut defect = None;
        for line in self.lines.iter().skip(1) {
            match HttpHeader::parse(line) {
                Ok(header) => parsed.insert(header),
                Err(err) => {
                    if defect.is_none() {
                        defect = Some(err);
                    }
                }
            }
        }
        self.headers = parsed;
        if let Some(err) = defect {
            self.record_defect(err);
        }
        self.state = ParseState::Body;
    }

    fn try_complete(&mut self) {
        if self.defect.is_some() {
            return;
        }

        let declared = match self.declared_content_length() {
            Ok(length) => length,
            Err(err) => {
                self.record_defect(err);
                return;
            }
        };
        if self.accumulator.len() < declared {
            return;
        }

        let first = match self.lines.first() {
            Some(first) => first,
            None => return,
        };
        let start = match L::parse(first) {
            Ok(start) => start,
            Err(err) => {
                self.record_defect(err);
                return;
            }
        };

        let body = L::trim_body(std::mem::take(&mut self.accumulator));
        self.package = Some(HttpPackage {
            protocol: Protocol::Http,
            start,
            headers: std::mem::take(&mut self.headers),
            body,
        });
        self.lines.clear();
        self.state = ParseState::Complete;
    }

    /// Absent header means the body is already done; present but unparsable
    /// is a defect.
    fn declared_content_length(&self) -> Result<usize, ParseError> {
        match self.headers.get(HttpHeader::CONTENT_LENGTH) {
            Some(header) => header
                .value()
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(header.value().to_string())),
            None => Ok(0),
        }
    }

    fn record_defect(&mut self, err: ParseError) {
        tracing::warn!(tag = %self.log_tag, error = %err, "package defect, will not complete");
        if self.defect.is_none() {
            self.defect = Some(err);
        }
    }
}

impl<L: StartLine> Default for PackageParser<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestParser;

    #[test]
    fn completes_without_content_length_at_blank_line() {
        let mut parser = RequestParser::new();
        parser.add_data(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(parser.is_complete());
        let package = parser.package().expect("package");
        assert!(package.body.is_empty());
        assert_eq!(package.header("host").map(|h| h.value()), Some("a"));
    }

    #[test]
    fn add_data_after_completion_changes_nothing() {
        let mut parser = RequestParser::new().with_log_tag("framing");
        parser.add_data(b"GET / HTTP/1.1\r\nContent-Length: 2\r\n\r\nok");
        assert!(parser.is_complete());
        parser.add_data(b"more bytes");
        let package = parser.package().expect("package");
        assert_eq!(package.body, b"ok");
        assert_eq!(package.headers.len(), 1);
    }

    #[test]
    fn invalid_content_length_is_a_sticky_defect() {
        let mut parser = RequestParser::new();
        parser.add_data(b"GET / HTTP/1.1\r\nContent-Length: twelve\r\n\r\n");
        assert!(!parser.is_complete());
        assert!(matches!(
            parser.defect(),
            Some(ParseError::InvalidContentLength(_))
        ));
        parser.add_data(b"body");
        assert!(!parser.is_complete());
    }

    #[test]
    fn malformed_header_line_is_a_defect() {
        let mut parser = RequestParser::new();
        parser.add_data(b"GET / HTTP/1.1\r\nnot a header\r\n\r\n");
        assert!(!parser.is_complete());
        assert!(matches!(
            parser.defect(),
            Some(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn serializes_with_rfc7230_framing() {
        let mut parser = RequestParser::new();
        parser.add_data(b"POST /y HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        let package = parser.into_package().expect("package");
        let bytes = package.to_bytes();
        assert_eq!(
            bytes,
            b"POST /y HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec()
        );
    }

    #[test]
    fn https_packages_serialize_with_the_https_token() {
        let mut parser = RequestParser::new();
        parser.add_data(b"GET /secure HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        let mut package = parser.into_package().expect("package");
        assert_eq!(package.protocol, Protocol::Http);

        package.protocol = Protocol::Https;
        assert_eq!(
            package.to_bytes(),
            b"GET /secure HTTPS/1.1\r\nContent-Length: 0\r\n\r\n".to_vec()
        );
    }
}
