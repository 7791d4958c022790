//! A minimal HTTP/1.1 request parser. Spec §1 names the HTTP parser as an
//! external collaborator "specified only by interface"; this module is that
//! collaborator made concrete, in the same hand-rolled spirit as
//! `omesh_common::json`'s parser rather than pulling in an ecosystem HTTP
//! crate for a handful of fixed routes.
use crate::error::HttpError;

/// Upper bound on one request's bytes.
pub const MAX_REQUEST_LEN: usize = 8 * 1024;

/// A parsed HTTP/1.1 request line, headers, and body.
#[derive(Debug, Clone)]
pub struct Request {
    /// The request method (`GET`, `POST`, `OPTIONS`, ...), as written on the wire.
    pub method: String,
    /// The request path, without the query string.
    pub path: String,
    /// The raw query string, if any (text after `?`, not percent-decoded).
    pub query: Option<String>,
    /// Request headers, lower-cased names, in wire order.
    pub headers: Vec<(String, String)>,
    /// The request body, empty if none was sent.
    pub body: Vec<u8>,
}

impl Request {
    /// A header's value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// The value bound to `key` in the query string, if present. No
    /// percent-decoding is performed: the one caller of this (`q=`) expects
    /// plain ASCII terms.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        let query = self.query.as_deref()?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

/// Parse a complete HTTP/1.1 request out of `bytes`. Tolerates `\r\n` or
/// bare `\n` line endings; rejects anything that doesn't look like a
/// request line, and any body content-length mismatch.
pub fn parse(bytes: &[u8]) -> Result<Request, HttpError> {
    let text = std::str::from_utf8(bytes).map_err(|_| HttpError::BadRequest("request is not utf-8".to_string()))?;

    let header_end = text
        .find("\r\n\r\n")
        .map(|i| (i, 4))
        .or_else(|| text.find("\n\n").map(|i| (i, 2)))
        .ok_or_else(|| HttpError::BadRequest("no end of headers found".to_string()))?;
    let (head, body_start) = (&text[..header_end.0], header_end.0 + header_end.1);

    let mut lines = head.split(['\n']).map(|l| l.trim_end_matches('\r'));
    let request_line = lines.next().ok_or_else(|| HttpError::BadRequest("empty request".to_string()))?;
    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or_else(|| HttpError::BadRequest("missing method".to_string()))?.to_string();
    let target = parts.next().ok_or_else(|| HttpError::BadRequest("missing path".to_string()))?;
    let _version = parts.next().ok_or_else(|| HttpError::BadRequest("missing http version".to_string()))?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::BadRequest(format!("malformed header line {line:?}")))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let body_bytes = &bytes[body_start.min(bytes.len())..];
    let body = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, len)) => {
            let len: usize = len.parse().map_err(|_| HttpError::BadRequest("bad content-length".to_string()))?;
            if body_bytes.len() < len {
                return Err(HttpError::BadRequest("body shorter than content-length".to_string()));
            }
            body_bytes[..len].to_vec()
        }
        None => Vec::new(),
    };

    Ok(Request { method, path, query, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_get_with_query_string() {
        let raw = b"GET /search?q=hello HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = parse(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query_param("q"), Some("hello"));
    }

    #[test]
    fn parses_a_post_with_body() {
        let raw = b"POST /index HTTP/1.1\r\nContent-Length: 19\r\nContent-Type: application/json\r\n\r\n{\"content\":\"hello\"}";
        let req = parse(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, b"{\"content\":\"hello\"}");
    }

    #[test]
    fn missing_header_terminator_is_rejected() {
        assert!(parse(b"GET / HTTP/1.1\r\nHost: x").is_err());
    }

    #[test]
    fn short_body_is_rejected() {
        let raw = b"POST /index HTTP/1.1\r\nContent-Length: 100\r\n\r\nshort";
        assert!(parse(raw).is_err());
    }
}
