//! Backend address parsing.

use hyper::Uri;
use std::fmt::Display;
use thiserror::Error;

/// Default port for `http://` backends without an explicit port.
const DEFAULT_HTTP_PORT: u16 = 80;

/// A backend address that cannot be used as an upstream.
#[derive(Debug, Error)]
#[error("invalid backend address '{address}': {reason}")]
pub struct AddressError {
    pub address: String,
    pub reason: String,
}

impl AddressError {
    fn new(address: &str, reason: impl Display) -> Self {
        Self {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse a configured backend address into an absolute `http://` URI.
pub fn parse_address(address: &str) -> Result<Uri, AddressError> {
    let uri: Uri = address
        .trim()
        .parse()
        .map_err(|e| AddressError::new(address, e))?;

    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => {
            return Err(AddressError::new(
                address,
                format!("unsupported scheme '{}', only http is supported", other),
            ));
        }
        None => return Err(AddressError::new(address, "missing scheme")),
    }

    match uri.authority() {
        Some(authority) if !authority.host().is_empty() => Ok(uri),
        _ => Err(AddressError::new(address, "missing host")),
    }
}

/// Host and port to open a TCP connection to for this URI.
pub(crate) fn connect_target(uri: &Uri) -> Option<(String, u16)> {
    let authority = uri.authority()?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    Some((host, authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_addresses() {
        let uri = parse_address("http://127.0.0.1:9001").unwrap();
        assert_eq!(uri.host(), Some("127.0.0.1"));
        assert_eq!(uri.port_u16(), Some(9001));

        let uri = parse_address("http://backend.internal/api").unwrap();
        assert_eq!(uri.path(), "/api");
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        assert!(parse_address("").is_err());
        assert!(parse_address("not a uri").is_err());
        assert!(parse_address("127.0.0.1:9001").is_err());
        assert!(parse_address("/relative/path").is_err());

        let err = parse_address("https://example.com").unwrap_err();
        assert!(err.reason.contains("only http"));
    }

    #[test]
    fn test_connect_target() {
        let uri = parse_address("http://127.0.0.1:9001/x").unwrap();
        assert_eq!(connect_target(&uri), Some(("127.0.0.1".to_string(), 9001)));

        let uri = parse_address("http://example.com").unwrap();
        assert_eq!(connect_target(&uri), Some(("example.com".to_string(), 80)));

        let uri = parse_address("http://[::1]:8080").unwrap();
        assert_eq!(connect_target(&uri), Some(("::1".to_string(), 8080)));
    }
}
