//! A minimal JSON value type, writer and length-bounded recursive-descent
//! parser.
//!
//! Spec §1 calls out the JSON parser/writer as an external collaborator
//! "specified only by interface": a length-bounded recursive-descent parser
//! over a caller-supplied arena. This module is that collaborator, made
//! concrete so the HTTP route table (§4.6) has something real to build
//! bodies with. The "arena" here is simply the `Vec`/`String` allocations
//! owned by the returned [`Value`] tree; the length bound is `max_depth` and
//! the size of the input slice itself, which callers already cap (the HTTP
//! loop reads at most 8 KiB per request).
use crate::error::Error;

/// A parsed or to-be-written JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `null`.
    Null,
    /// `true` or `false`.
    Bool(bool),
    /// A JSON number, stored as `f64` (sufficient for doc ids/scores at the
    /// sizes this protocol uses; large u64 doc ids are written as decimal
    /// integers and parsed back exactly because `f64` round-trips any
    /// integer up to 2^53 -- comfortably more than this protocol's id
    /// space in practice).
    Number(f64),
    /// A JSON string.
    String(String),
    /// A JSON array.
    Array(Vec<Value>),
    /// A JSON object. Stored as an ordered list of key/value pairs rather
    /// than a map: response bodies are small and emitted in a fixed,
    /// spec-mandated field order.
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Build an object from an iterator of (key, value) pairs.
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Convenience constructor for a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Look up a field on an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// View this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// View this value as an f64, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// View this value as a u64, if it is a non-negative integral number.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_f64().filter(|n| *n >= 0.0 && n.fract() == 0.0).map(|n| n as u64)
    }

    /// Serialize to a compact (no whitespace) JSON string, UTF-8 encoded.
    pub fn to_compact_string(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(true) => out.push_str("true"),
            Value::Bool(false) => out.push_str("false"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    out.push_str(&format!("{}", *n as i64));
                } else {
                    out.push_str(&n.to_string());
                }
            }
            Value::String(s) => write_json_string(s, out),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write(out);
                }
                out.push(']');
            }
            Value::Object(fields) => {
                out.push('{');
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_json_string(key, out);
                    out.push(':');
                    value.write(out);
                }
                out.push('}');
            }
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Maximum nesting depth the parser will descend before giving up. Bounds
/// stack usage on adversarial input the way the framing codec bounds frame
/// size.
pub const MAX_DEPTH: usize = 32;

/// Parse a UTF-8 JSON document, rejecting anything nested deeper than
/// [`MAX_DEPTH`] or containing trailing garbage.
pub fn parse(input: &str) -> Result<Value, Error> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    let value = parse_value(bytes, &mut pos, 0)?;
    skip_ws(bytes, &mut pos);
    if pos != bytes.len() {
        return Err(Error::protocol("trailing data after JSON value"));
    }
    Ok(value)
}

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() && matches!(bytes[*pos], b' ' | b'\t' | b'\n' | b'\r') {
        *pos += 1;
    }
}

fn parse_value(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Value, Error> {
    if depth > MAX_DEPTH {
        return Err(Error::protocol("json nesting too deep"));
    }
    skip_ws(bytes, pos);
    match bytes.get(*pos) {
        Some(b'{') => parse_object(bytes, pos, depth),
        Some(b'[') => parse_array(bytes, pos, depth),
        Some(b'"') => parse_string(bytes, pos).map(Value::String),
        Some(b't') => parse_literal(bytes, pos, "true").map(|_| Value::Bool(true)),
        Some(b'f') => parse_literal(bytes, pos, "false").map(|_| Value::Bool(false)),
        Some(b'n') => parse_literal(bytes, pos, "null").map(|_| Value::Null),
        Some(c) if c.is_ascii_digit() || *c == b'-' => parse_number(bytes, pos),
        _ => Err(Error::protocol("unexpected character in json input")),
    }
}

fn parse_literal(bytes: &[u8], pos: &mut usize, lit: &str) -> Result<(), Error> {
    let end = *pos + lit.len();
    if bytes.get(*pos..end) == Some(lit.as_bytes()) {
        *pos = end;
        Ok(())
    } else {
        Err(Error::protocol(format!("expected `{lit}`")))
    }
}

fn parse_number(bytes: &[u8], pos: &mut usize) -> Result<Value, Error> {
    let start = *pos;
    if bytes.get(*pos) == Some(&b'-') {
        *pos += 1;
    }
    while bytes.get(*pos).is_some_and(|c| c.is_ascii_digit()) {
        *pos += 1;
    }
    if bytes.get(*pos) == Some(&b'.') {
        *pos += 1;
        while bytes.get(*pos).is_some_and(|c| c.is_ascii_digit()) {
            *pos += 1;
        }
    }
    if matches!(bytes.get(*pos), Some(b'e') | Some(b'E')) {
        *pos += 1;
        if matches!(bytes.get(*pos), Some(b'+') | Some(b'-')) {
            *pos += 1;
        }
        while bytes.get(*pos).is_some_and(|c| c.is_ascii_digit()) {
            *pos += 1;
        }
    }
    let text = std::str::from_utf8(&bytes[start..*pos]).unwrap_or_default();
    text.parse::<f64>()
        .map(Value::Number)
        .map_err(|_| Error::protocol("invalid json number"))
}

fn parse_string(bytes: &[u8], pos: &mut usize) -> Result<String, Error> {
    debug_assert_eq!(bytes.get(*pos), Some(&b'"'));
    *pos += 1;
    let mut out = String::new();
    loop {
        match bytes.get(*pos) {
            None => return Err(Error::protocol("unterminated json string")),
            Some(b'"') => {
                *pos += 1;
                return Ok(out);
            }
            Some(b'\\') => {
                *pos += 1;
                match bytes.get(*pos) {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    Some(b'b') => out.push('\u{8}'),
                    Some(b'f') => out.push('\u{c}'),
                    Some(b'u') => {
                        let hex = bytes
                            .get(*pos + 1..*pos + 5)
                            .and_then(|h| std::str::from_utf8(h).ok())
                            .and_then(|h| u32::from_str_radix(h, 16).ok())
                            .ok_or_else(|| Error::protocol("invalid \\u escape"))?;
                        out.push(char::from_u32(hex).unwrap_or('\u{fffd}'));
                        *pos += 4;
                    }
                    _ => return Err(Error::protocol("invalid escape sequence")),
                }
                *pos += 1;
            }
            Some(_) => {
                // Re-decode a UTF-8 scalar starting here so multi-byte
                // characters pass through untouched.
                let rest = std::str::from_utf8(&bytes[*pos..]).map_err(|_| {
                    Error::protocol("invalid utf-8 in json string")
                })?;
                let ch = rest.chars().next().unwrap();
                out.push(ch);
                *pos += ch.len_utf8();
            }
        }
    }
}

fn parse_array(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Value, Error> {
    debug_assert_eq!(bytes.get(*pos), Some(&b'['));
    *pos += 1;
    let mut items = Vec::new();
    skip_ws(bytes, pos);
    if bytes.get(*pos) == Some(&b']') {
        *pos += 1;
        return Ok(Value::Array(items));
    }
    loop {
        items.push(parse_value(bytes, pos, depth + 1)?);
        skip_ws(bytes, pos);
        match bytes.get(*pos) {
            Some(b',') => {
                *pos += 1;
            }
            Some(b']') => {
                *pos += 1;
                return Ok(Value::Array(items));
            }
            _ => return Err(Error::protocol("expected `,` or `]` in json array")),
        }
    }
}

fn parse_object(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Value, Error> {
    debug_assert_eq!(bytes.get(*pos), Some(&b'{'));
    *pos += 1;
    let mut fields = Vec::new();
    skip_ws(bytes, pos);
    if bytes.get(*pos) == Some(&b'}') {
        *pos += 1;
        return Ok(Value::Object(fields));
    }
    loop {
        skip_ws(bytes, pos);
        if bytes.get(*pos) != Some(&b'"') {
            return Err(Error::protocol("expected json object key"));
        }
        let key = parse_string(bytes, pos)?;
        skip_ws(bytes, pos);
        if bytes.get(*pos) != Some(&b':') {
            return Err(Error::protocol("expected `:` after json object key"));
        }
        *pos += 1;
        let value = parse_value(bytes, pos, depth + 1)?;
        fields.push((key, value));
        skip_ws(bytes, pos);
        match bytes.get(*pos) {
            Some(b',') => {
                *pos += 1;
            }
            Some(b'}') => {
                *pos += 1;
                return Ok(Value::Object(fields));
            }
            _ => return Err(Error::protocol("expected `,` or `}` in json object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flat_object() {
        let value = Value::object([("status", Value::str("ok")), ("doc_id", Value::Number(7.0))]);
        let text = value.to_compact_string();
        assert_eq!(text, r#"{"status":"ok","doc_id":7}"#);

        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.get("status").and_then(Value::as_str), Some("ok"));
        assert_eq!(parsed.get("doc_id").and_then(Value::as_u64), Some(7));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse(r#"{"a":1} garbage"#).is_err());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut text = String::new();
        for _ in 0..MAX_DEPTH + 10 {
            text.push('[');
        }
        assert!(parse(&text).is_err());
    }

    #[test]
    fn parses_escaped_strings() {
        let parsed = parse(r#""line\nbreak \"quoted\"""#).unwrap();
        assert_eq!(parsed, Value::String("line\nbreak \"quoted\"".to_string()));
    }

    #[test]
    fn writer_escapes_control_characters() {
        let value = Value::str("a\tb");
        assert_eq!(value.to_compact_string(), r#""a\tb""#);
    }
}
