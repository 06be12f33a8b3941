//! Raw HTTP/1.1 request parsing.
//!
//! # Responsibilities
//! - Split a socket buffer into request line, header block and body
//! - Provide a case-insensitive header view shared by both proxy adapters
//! - Report `Incomplete` until `Content-Length` body bytes have arrived
//!
//! # Design Decisions
//! - Pure functions over the input buffer; no I/O happens here
//! - Duplicate header names: the last value wins
//! - Header names are stored lowercased for lookup
//! - Chunked request bodies are not supported and rejected outright

use thiserror::Error;

/// Default cap on the request line plus header block.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;

/// Default cap on a request body buffered for the authentication decision.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Structural failures. Any of these is fatal to the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("header block exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("request body of {actual} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { actual: usize, limit: usize },

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),
}

/// Ordered header map with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header. A repeated name replaces the earlier value in place.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.trim().to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
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

    /// Iterate in arrival order as `(lowercased name, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// A fully buffered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// Request target exactly as sent, including any query string.
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub content_length: usize,
    pub body: Vec<u8>,
    /// Bytes of the input buffer this request occupies.
    pub consumed: usize,
}

impl ParsedRequest {
    /// The target without its query string.
    pub fn path(&self) -> &str {
        split_path(&self.target)
    }
}

/// Outcome of feeding a buffer to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Complete(ParsedRequest),
    /// More bytes are needed before the request can be judged.
    Incomplete,
}

/// Stateless request parser with size limits.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_BODY_BYTES)
    }
}

impl RequestHeader {
    pub fn new(max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            max_header_bytes,
            max_body_bytes,
        }
    }

    /// Parse with the default limits.
    pub fn parse(raw: &[u8]) -> Result<Parsed, ParseError> {
        Self::default().parse_buffer(raw)
    }

    /// Parse the first request in `raw`.
    pub fn parse_buffer(&self, raw: &[u8]) -> Result<Parsed, ParseError> {
        let header_end = match find_terminator(raw) {
            Some(pos) => pos,
            None if raw.len() > self.max_header_bytes => {
                return Err(ParseError::HeaderTooLarge(self.max_header_bytes));
            }
            None => return Ok(Parsed::Incomplete),
        };
        let body_start = header_end + HEADER_TERMINATOR.len();
        if body_start > self.max_header_bytes {
            return Err(ParseError::HeaderTooLarge(self.max_header_bytes));
        }

        let block = String::from_utf8_lossy(&raw[..header_end]);
        let mut lines = block.split("\r\n");

        let request_line = lines.next().ok_or(ParseError::MalformedRequestLine)?;
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ParseError::MalformedHeader(line.to_string()));
            }
            headers.insert(name, value.trim());
        }

        if let Some(encoding) = headers.get("transfer-encoding") {
            if !encoding.trim().eq_ignore_ascii_case("identity") {
                return Err(ParseError::UnsupportedTransferEncoding(encoding.to_string()));
            }
        }

        let content_length = match headers.get("content-length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?,
            None => 0,
        };
        if content_length > self.max_body_bytes {
            return Err(ParseError::BodyTooLarge {
                actual: content_length,
                limit: self.max_body_bytes,
            });
        }

        let consumed = body_start + content_length;
        if raw.len() < consumed {
            return Ok(Parsed::Incomplete);
        }

        Ok(Parsed::Complete(ParsedRequest {
            method,
            target,
            version,
            headers,
            content_length,
            body: raw[body_start..consumed].to_vec(),
            consumed,
        }))
    }
}

/// Strip the query string from a request target.
pub fn split_path(target: &str) -> &str {
    target.split_once('?').map_or(target, |(path, _)| path)
}

fn find_terminator(raw: &[u8]) -> Option<usize> {
    raw.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

fn parse_request_line(line: &str) -> Result<(String, String, String), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::MalformedRequestLine);
    };

    let method_ok = !method.is_empty() && method.bytes().all(|b| b.is_ascii_uppercase());
    if !method_ok || target.is_empty() || !version.starts_with("HTTP/") {
        return Err(ParseError::MalformedRequestLine);
    }

    Ok((method.to_string(), target.to_string(), version.to_string()))
}
