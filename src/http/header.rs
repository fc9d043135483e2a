//! Header name/value pairs and a case-insensitive header map.

use std::collections::HashMap;

use super::ParseError;

/// One header line. Name comparison is case-insensitive; the original
/// spelling is preserved for serialization.
#[derive(Debug, Clone)]
pub struct HttpHeader {
    name: String,
    value: String,
}

impl HttpHeader {
    pub const CONTENT_LENGTH: &'static str = "Content-Length";
    pub const CONTENT_TYPE: &'static str = "Content-Type";
    pub const CONNECTION: &'static str = "Connection";
    pub const HOST: &'static str = "Host";

    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `Name: value` line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::MalformedHeader(line.to_string()));
        }
        Ok(Self::new(name, value.trim()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Split the value into comma-separated groups of semicolon-separated
    /// fields, trimmed. `"text/html; q=0.9, text/plain"` yields
    /// `[["text/html", "q=0.9"], ["text/plain"]]`.
    pub fn groups(&self) -> Vec<Vec<String>> {
        self.value
            .split(',')
            .map(|group| {
                group
                    .split(';')
                    .map(str::trim)
                    .filter(|field| !field.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .filter(|group: &Vec<String>| !group.is_empty())
            .collect()
    }
}

impl PartialEq for HttpHeader {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.value == other.value
    }
}

impl Eq for HttpHeader {}

/// Header storage keyed by lowercased name; lookups are case-insensitive
/// and duplicate names coalesce last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: HashMap<String, HttpHeader>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: HttpHeader) {
        self.entries
            .insert(header.name().to_ascii_lowercase(), header);
    }

    pub fn get(&self, name: &str) -> Option<&HttpHeader> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HttpHeader> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(HttpHeader::new("Content-Length", "12"));
        assert_eq!(headers.get("content-length").map(HttpHeader::value), Some("12"));
        assert_eq!(headers.get("CONTENT-LENGTH").map(HttpHeader::value), Some("12"));
        assert!(headers.contains(HttpHeader::CONTENT_LENGTH));
    }

    #[test]
    fn duplicate_names_keep_the_last_value() {
        let mut headers = HeaderMap::new();
        headers.insert(HttpHeader::new("Accept", "text/html"));
        headers.insert(HttpHeader::new("accept", "application/json"));
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.get("Accept").map(HttpHeader::value),
            Some("application/json")
        );
    }

    #[test]
    fn parse_splits_on_first_colon() {
        let header = HttpHeader::parse("Host: example.com:8080").expect("parse");
        assert_eq!(header.name(), "Host");
        assert_eq!(header.value(), "example.com:8080");
        assert!(header.is("HOST"));
    }

    #[test]
    fn parse_rejects_lines_without_a_colon() {
        assert!(matches!(
            HttpHeader::parse("garbage"),
            Err(ParseError::MalformedHeader(_))
        ));
        assert!(matches!(
            HttpHeader::parse(": no name"),
            Err(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn groups_split_on_commas_and_semicolons() {
        let header = HttpHeader::new("Accept", "text/html; q=0.9, text/plain");
        assert_eq!(
            header.groups(),
            vec![
                vec!["text/html".to_string(), "q=0.9".to_string()],
                vec!["text/plain".to_string()],
            ]
        );
    }

    #[test]
    fn name_equality_ignores_case() {
        assert_eq!(
            HttpHeader::new("Host", "a"),
            HttpHeader::new("HOST", "a")
        );
        assert_ne!(HttpHeader::new("Host", "a"), HttpHeader::new("Host", "b"));
    }
}
