//! Response start line: version, status, reason.

use super::package::{HttpPackage, PackageParser, Protocol, StartLine};
use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status: u16,
    pub reason: String,
}

impl StartLine for StatusLine {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::MalformedStartLine(line.to_string());
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().filter(|v| !v.is_empty()).ok_or_else(malformed)?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(malformed)?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        Ok(Self {
            version: version.to_string(),
            status,
            reason,
        })
    }

    fn http_version(&self) -> &str {
        &self.version
    }

    fn write(&self, protocol: Protocol, out: &mut Vec<u8>) {
        protocol.write_version(&self.version, out);
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        if !self.reason.is_empty() {
            out.push(b' ');
            out.extend_from_slice(self.reason.as_bytes());
        }
    }
}

pub type ResponseParser = PackageParser<StatusLine>;
pub type HttpResponse = HttpPackage<StatusLine>;
