//! Minimal HTTP request/response values shared by clients and servers.

use crate::ServerTime;
use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the server clock on every response.
pub const TIMESTAMP_HEADER: &str = "x-weave-timestamp";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL, including the query string.
    pub url: String,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    /// Attaches a body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers with lowercase names.
    pub headers: BTreeMap<String, String>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// Sets a header. Names are stored lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the server timestamp header.
    pub fn with_timestamp(self, timestamp: ServerTime) -> Self {
        self.with_header(TIMESTAMP_HEADER, format_timestamp(timestamp))
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parses the server timestamp header.
    pub fn timestamp(&self) -> Option<ServerTime> {
        self.header(TIMESTAMP_HEADER)?.trim().parse().ok()
    }
}

/// Renders a server time with two decimal places, as servers send it.
pub fn format_timestamp(timestamp: ServerTime) -> String {
    format!("{:.2}", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_header_round_trip() {
        let response = HttpResponse::new(200, Vec::new()).with_timestamp(1234.5);
        assert_eq!(response.header("X-Weave-Timestamp"), Some("1234.50"));
        assert_eq!(response.timestamp(), Some(1234.5));
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(204, Vec::new()).is_success());
        assert!(!HttpResponse::new(404, Vec::new()).is_success());
        assert!(!HttpResponse::new(503, Vec::new()).is_success());
    }
}
