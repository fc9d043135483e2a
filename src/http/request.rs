//! Request start line: method, target, version.

use std::fmt;

use super::package::{HttpPackage, PackageParser, Protocol, StartLine};
use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        match token {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            other => Err(ParseError::UnknownMethod(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub version: String,
}

impl StartLine for RequestLine {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::MalformedStartLine(line.to_string());
        let mut parts = line.split_whitespace();
        let method = parts.next().ok_or_else(malformed)?;
        let target = parts.next().ok_or_else(malformed)?;
        let version = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            method: Method::parse(method)?,
            target: target.to_string(),
            version: version.to_string(),
        })
    }

    fn http_version(&self) -> &str {
        &self.version
    }

    fn write(&self, protocol: Protocol, out: &mut Vec<u8>) {
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.target.as_bytes());
        out.push(b' ');
        protocol.write_version(&self.version, out);
    }
}

pub type RequestParser = PackageParser<RequestLine>;
pub type HttpRequest = HttpPackage<RequestLine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_request_line() {
        let line = RequestLine::parse("GET /x HTTP/1.1").expect("parse");
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.target, "/x");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(
            RequestLine::parse("BREW /pot HTTP/1.1"),
            Err(ParseError::UnknownMethod(_))
        ));
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(matches!(
            RequestLine::parse("GET /x"),
            Err(ParseError::MalformedStartLine(_))
        ));
        assert!(matches!(
            RequestLine::parse("GET /x HTTP/1.1 extra"),
            Err(ParseError::MalformedStartLine(_))
        ));
    }
}
