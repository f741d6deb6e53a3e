//! The HTTP upgrade head, inspected before the WebSocket handshake.

use std::time::Duration;

use crate::TransportError;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Bounds on reading an upgrade head.
#[derive(Debug, Clone, Copy)]
pub struct HeadLimits {
    /// Largest head accepted, terminator included.
    pub max_bytes: usize,
    /// How long the peer has to send the complete head.
    pub timeout: Duration,
}

impl Default for HeadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 8 * 1024,
            timeout: Duration::from_secs(5),
        }
    }
}

/// The request line and headers of an upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub method: String,
    /// Request target as sent, query string included.
    pub path: String,
    headers: Vec<(String, String)>,
    /// Length of the head in bytes, terminator included.
    head_len: usize,
}

impl UpgradeRequest {
    /// Parses a head from the start of `buf`.
    ///
    /// Returns `Ok(None)` while the terminating blank line has not arrived.
    ///
    /// # Errors
    /// Returns [`TransportError::BadRequest`] when the head is complete but
    /// not a well-formed HTTP/1.1 request.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, TransportError> {
        let Some(end) = buf
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        else {
            return Ok(None);
        };
        let head_len = end + HEAD_TERMINATOR.len();

        let text = std::str::from_utf8(&buf[..end])
            .map_err(|_| TransportError::BadRequest("head is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_ascii_whitespace();
        let (Some(method), Some(path), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(TransportError::BadRequest(format!(
                "bad request line {request_line:?}"
            )));
        };
        if !version.starts_with("HTTP/1.") {
            return Err(TransportError::BadRequest(format!(
                "unsupported version {version:?}"
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(TransportError::BadRequest(format!(
                    "bad header line {line:?}"
                )));
            };
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Some(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            head_len,
        }))
    }

    /// The first value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The last segment of the path, with any query string removed.
    ///
    /// `/session/K7QX2M9A?x=1` → `K7QX2M9A`. Empty segments yield `None`.
    pub fn session_code(&self) -> Option<&str> {
        let path = self.path.split('?').next().unwrap_or_default();
        path.rsplit('/').next().filter(|segment| !segment.is_empty())
    }

    /// The token from an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }

    /// The value of cookie `name`, searched across every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n == "cookie")
            .flat_map(|(_, v)| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    pub fn head_len(&self) -> usize {
        self.head_len
    }
}

/// Reason phrase for the statuses the server rejects with.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(head: &str) -> UpgradeRequest {
        UpgradeRequest::parse(head.as_bytes())
            .expect("should parse")
            .expect("should be complete")
    }

    #[test]
    fn test_parse_incomplete_head_returns_none() {
        let partial = b"GET /session/ABC HTTP/1.1\r\nHost: x\r\n";
        assert!(UpgradeRequest::parse(partial).unwrap().is_none());
    }

    #[test]
    fn test_parse_records_head_len() {
        let head = "GET /session/ABC HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut bytes = head.as_bytes().to_vec();
        bytes.extend_from_slice(b"trailing frame bytes");

        let req = UpgradeRequest::parse(&bytes).unwrap().unwrap();
        assert_eq!(req.head_len(), head.len());
        assert_eq!(req.method, "GET");
    }

    #[test]
    fn test_parse_rejects_garbage_request_line() {
        let err = UpgradeRequest::parse(b"HELLO\r\n\r\n").unwrap_err();
        assert!(matches!(err, TransportError::BadRequest(_)));
    }

    #[test]
    fn test_session_code_is_last_segment() {
        let req = parse("GET /session/K7QX2M9A?v=2 HTTP/1.1\r\n\r\n");
        assert_eq!(req.session_code(), Some("K7QX2M9A"));

        let req = parse("GET /session/ HTTP/1.1\r\n\r\n");
        assert_eq!(req.session_code(), None);
    }

    #[test]
    fn test_bearer_token() {
        let req = parse("GET /s/A HTTP/1.1\r\nAuthorization: Bearer abc123\r\n\r\n");
        assert_eq!(req.bearer_token(), Some("abc123"));

        let req = parse("GET /s/A HTTP/1.1\r\nAuthorization: Basic abc123\r\n\r\n");
        assert_eq!(req.bearer_token(), None);
    }

    #[test]
    fn test_cookie_lookup() {
        let req = parse(
            "GET /s/A HTTP/1.1\r\nCookie: theme=dark; token=t-1\r\nCookie: other=2\r\n\r\n",
        );
        assert_eq!(req.cookie("token"), Some("t-1"));
        assert_eq!(req.cookie("other"), Some("2"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = parse("GET / HTTP/1.1\r\nSec-WebSocket-Key: k\r\n\r\n");
        assert_eq!(req.header("sec-websocket-key"), Some("k"));
    }
}
