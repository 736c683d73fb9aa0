//! Request IDs for correlating log lines.

use hyper::header::{HeaderMap, HeaderValue};
use std::fmt;
use uuid::Uuid;

/// Header carrying the request ID to and from the backend.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied ID that is accepted as is.
const MAX_INCOMING_LEN: usize = 128;

/// Identifier attached to every proxied request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Random UUID v4 ID, unique across processes.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Reuse the client's `x-request-id` when it is printable and short,
    /// otherwise mint a random one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_INCOMING_LEN)
            .map(Self::from_string)
            .unwrap_or_else(Self::random)
    }

    /// Set this ID as the `x-request-id` header.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_ids_are_uuids() {
        let a = RequestId::random();
        let b = RequestId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_random_ids_unique() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = RequestId::random();
            assert!(ids.insert(id.to_string()), "duplicate ID generated");
        }
    }

    #[test]
    fn test_from_headers_reuses_client_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(RequestId::from_headers(&headers).as_str(), "abc-123");
    }

    #[test]
    fn test_from_headers_generates_when_missing_or_oversized() {
        let headers = HeaderMap::new();
        let generated = RequestId::from_headers(&headers);
        assert!(Uuid::parse_str(generated.as_str()).is_ok());

        let mut headers = HeaderMap::new();
        let long = "x".repeat(MAX_INCOMING_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        let generated = RequestId::from_headers(&headers);
        assert_eq!(generated.as_str().len(), 36);
        assert_ne!(generated.as_str(), long);
    }

    #[test]
    fn test_apply_sets_header() {
        let mut headers = HeaderMap::new();
        RequestId::from_string("test-id-123").apply(&mut headers);
        assert_eq!(headers[REQUEST_ID_HEADER], "test-id-123");
    }
}
