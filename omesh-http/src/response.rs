//! HTTP/1.1 response building: every response carries `Server`,
//! permissive CORS headers, `Content-Type`, `Content-Length`, and
//! `Connection: close`.
use omesh_common::Json;

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// Build a complete response with a JSON body, UTF-8 encoded with no
/// whitespace.
pub fn json(status: u16, body: &Json) -> Vec<u8> {
    raw(status, "application/json", body.to_compact_string().into_bytes())
}

/// Build a complete response with an empty body (used for `204 No Content`).
pub fn empty(status: u16) -> Vec<u8> {
    raw(status, "text/plain", Vec::new())
}

fn raw(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let mut head = String::new();
    head.push_str(&format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status)));
    head.push_str(&format!("Server: omesh/{}\r\n", env!("CARGO_PKG_VERSION")));
    head.push_str("Access-Control-Allow-Origin: *\r\n");
    head.push_str("Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n");
    head.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
    head.push_str(&format!("Content-Type: {content_type}\r\n"));
    head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    head.push_str("Connection: close\r\n");
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(&body);
    out
}

/// A `{"error":"..."}` body at the given status.
pub fn error(status: u16, message: impl Into<String>) -> Vec<u8> {
    json(status, &Json::object([("error", Json::str(message.into()))]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_response_has_required_headers() {
        let body = Json::object([("status", Json::str("ok"))]);
        let bytes = json(200, &body);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("{\"status\":\"ok\"}"));
    }

    #[test]
    fn error_body_has_the_error_field() {
        let bytes = error(404, "not found");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#"{"error":"not found"}"#));
    }
}
