//! Opening handshake (RFC 6455 Section 4.2), server side.
//!
//! ```http
//! GET / HTTP/1.1
//! Host: 127.0.0.1:49632
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest request head accepted, terminator included.
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Handshake failures, each mapping to an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Request head could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// No terminator within [`MAX_REQUEST_HEAD`] bytes.
    #[error("request head exceeds 8192 bytes")]
    HeadTooLarge,
    /// Request target differs from the configured path.
    #[error("no endpoint at '{0}'")]
    NotFound(String),
    /// Method other than GET.
    #[error("method must be GET, got '{0}'")]
    InvalidMethod(String),
    /// HTTP version older than 1.1.
    #[error("unsupported HTTP version '{0}'")]
    UnsupportedHttpVersion(String),
    /// `Upgrade` lacks the `websocket` token.
    #[error("Upgrade header must contain 'websocket'")]
    MissingUpgrade,
    /// `Connection` lacks the `upgrade` token.
    #[error("Connection header must contain 'upgrade'")]
    MissingConnectionUpgrade,
    /// No `Sec-WebSocket-Key`.
    #[error("missing Sec-WebSocket-Key")]
    MissingKey,
    /// Key is not base64 of 16 bytes.
    #[error("Sec-WebSocket-Key must be base64 of 16 bytes")]
    InvalidKey,
    /// `Sec-WebSocket-Version` present but not 13.
    #[error("unsupported WebSocket version '{0}'")]
    UnsupportedVersion(String),
    /// Connection limit reached.
    #[error("connection limit reached")]
    ConnectionLimit,
}

impl HandshakeError {
    /// HTTP status for the rejection response.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::ConnectionLimit => 503,
            _ => 400,
        }
    }

    /// Full rejection response for this error.
    pub fn response_bytes(&self) -> Vec<u8> {
        reject_response(self.status())
    }
}

/// Compute `Sec-WebSocket-Accept` for a client key.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Offset just past the `\r\n\r\n` terminating the request head.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Rejection response: status line, `Connection: close`, empty body.
pub fn reject_response(status: u16) -> Vec<u8> {
    let reason = match status {
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Error",
    };
    format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
        .into_bytes()
}

/// Parsed upgrade request head.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: String,
    /// Request target, compared verbatim with the configured path.
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub version: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Parse a request head (bytes up to and including the blank line).
    pub fn parse(head: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| HandshakeError::Malformed("request head is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HandshakeError::Malformed(format!(
                "bad request line '{request_line}'"
            )));
        };
        if !version.starts_with("HTTP/") {
            return Err(HandshakeError::Malformed(format!(
                "bad protocol '{version}'"
            )));
        }

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines.take_while(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::Malformed(format!("bad header line '{line}'")))?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            // Repeated headers combine into one comma-separated list.
            let _ = headers
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether a comma-separated header contains `token` (case-insensitive).
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }

    fn is_http11_or_later(&self) -> bool {
        let Some((major, minor)) = self
            .version
            .strip_prefix("HTTP/")
            .and_then(|v| v.split_once('.'))
        else {
            return false;
        };
        match (major.parse::<u32>(), minor.parse::<u32>()) {
            (Ok(major), Ok(minor)) => major > 1 || (major == 1 && minor >= 1),
            _ => false,
        }
    }
}

/// Accepted upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptResponse {
    /// `Sec-WebSocket-Accept` value.
    pub accept_key: String,
}

impl AcceptResponse {
    /// The `101 Switching Protocols` response.
    pub fn response_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            self.accept_key
        )
        .into_bytes()
    }
}

/// Validate an upgrade request against the configured path.
///
/// The path is checked first so a request for an unknown resource gets 404
/// regardless of its headers.
pub fn validate_upgrade(request: &HttpRequest, path: &str) -> Result<AcceptResponse, HandshakeError> {
    if request.target != path {
        return Err(HandshakeError::NotFound(request.target.clone()));
    }
    if request.method != "GET" {
        return Err(HandshakeError::InvalidMethod(request.method.clone()));
    }
    if !request.is_http11_or_later() {
        return Err(HandshakeError::UnsupportedHttpVersion(request.version.clone()));
    }
    if !request.header_has_token("upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !request.header_has_token("connection", "upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }
    let key = request
        .header("sec-websocket-key")
        .ok_or(HandshakeError::MissingKey)?;
    match base64::engine::general_purpose::STANDARD.decode(key) {
        Ok(decoded) if decoded.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }
    if let Some(version) = request.header("sec-websocket-version") {
        if version != "13" {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }
    }
    Ok(AcceptResponse {
        accept_key: compute_accept_key(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request(extra: &str) -> HttpRequest {
        let raw = format!(
            "GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: {SAMPLE_KEY}\r\n{extra}\r\n"
        );
        HttpRequest::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(compute_accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn valid_request_is_accepted() {
        let accepted = validate_upgrade(&request("Sec-WebSocket-Version: 13\r\n"), "/").unwrap();
        let response = String::from_utf8(accepted.response_bytes()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn random_client_nonces_are_accepted() {
        for _ in 0..32 {
            let nonce: [u8; 16] = rand::random();
            let key = base64::engine::general_purpose::STANDARD.encode(nonce);
            let raw = format!(
                "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Key: {key}\r\n\r\n"
            );
            let accepted = validate_upgrade(&HttpRequest::parse(raw.as_bytes()).unwrap(), "/").unwrap();
            assert_eq!(accepted.accept_key, compute_accept_key(&key));
            assert_eq!(accepted.accept_key.len(), 28);
        }
    }

    #[test]
    fn version_header_is_optional() {
        assert!(validate_upgrade(&request(""), "/").is_ok());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let err = validate_upgrade(&request("Sec-WebSocket-Version: 8\r\n"), "/").unwrap_err();
        assert_matches!(err, HandshakeError::UnsupportedVersion(ref v) if v == "8");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn wrong_path_is_404_before_header_checks() {
        let raw = "GET /other HTTP/1.1\r\nHost: x\r\n\r\n";
        let err = validate_upgrade(&HttpRequest::parse(raw.as_bytes()).unwrap(), "/").unwrap_err();
        assert_matches!(err, HandshakeError::NotFound(ref t) if t == "/other");
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn header_tokens_are_case_insensitive_lists() {
        let raw = format!(
            "GET /ws HTTP/1.1\r\nupgrade: WebSocket\r\nCONNECTION: keep-alive, Upgrade\r\n\
             sec-websocket-key: {SAMPLE_KEY}\r\n\r\n"
        );
        let request = HttpRequest::parse(raw.as_bytes()).unwrap();
        assert!(validate_upgrade(&request, "/ws").is_ok());
    }

    #[test]
    fn missing_headers_are_400() {
        let cases = [
            ("Connection: Upgrade\r\n", HandshakeError::MissingUpgrade),
            ("Upgrade: websocket\r\n", HandshakeError::MissingConnectionUpgrade),
            (
                "Upgrade: websocket\r\nConnection: Upgrade\r\n",
                HandshakeError::MissingKey,
            ),
            (
                "Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: c2hvcnQ=\r\n",
                HandshakeError::InvalidKey,
            ),
        ];
        for (headers, expected) in cases {
            let raw = format!("GET / HTTP/1.1\r\n{headers}\r\n");
            let err = validate_upgrade(&HttpRequest::parse(raw.as_bytes()).unwrap(), "/")
                .unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(err.status(), 400);
        }
    }

    #[test]
    fn post_and_http10_are_rejected() {
        let raw = format!("POST / HTTP/1.1\r\nSec-WebSocket-Key: {SAMPLE_KEY}\r\n\r\n");
        assert_matches!(
            validate_upgrade(&HttpRequest::parse(raw.as_bytes()).unwrap(), "/"),
            Err(HandshakeError::InvalidMethod(_))
        );
        let raw = "GET / HTTP/1.0\r\n\r\n";
        assert_matches!(
            validate_upgrade(&HttpRequest::parse(raw.as_bytes()).unwrap(), "/"),
            Err(HandshakeError::UnsupportedHttpVersion(_))
        );
    }

    #[test]
    fn malformed_heads_are_rejected() {
        assert_matches!(HttpRequest::parse(b"GARBAGE\r\n\r\n"), Err(HandshakeError::Malformed(_)));
        assert_matches!(
            HttpRequest::parse(b"GET / HTTP/1.1\r\nno-colon\r\n\r\n"),
            Err(HandshakeError::Malformed(_))
        );
        assert_matches!(HttpRequest::parse(&[0xFF, 0xFE]), Err(HandshakeError::Malformed(_)));
    }

    #[test]
    fn find_head_end_reports_offset_past_terminator() {
        let buf = b"GET / HTTP/1.1\r\n\r\nextra";
        assert_eq!(find_head_end(buf), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn rejection_response_shape() {
        let text = String::from_utf8(HandshakeError::ConnectionLimit.response_bytes()).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );
    }
}
