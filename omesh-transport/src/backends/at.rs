//! Shared helpers for the AT-command-driven radio backends (short- and
//! long-range).
use omesh_common::error::Error;

/// Hex-escape a payload for an AT `AT+SEND=<hex>` command.
pub fn hex_escape(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

/// Decode a hex-escaped payload back into bytes.
pub fn hex_unescape(hex: &str) -> Result<Vec<u8>, Error> {
    if hex.len() % 2 != 0 {
        return Err(Error::protocol("odd-length hex payload in AT frame"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| Error::protocol("invalid hex digit")))
        .collect()
}

/// Parse a `+RCV=<hex>` notification line, returning its payload.
pub fn parse_rcv_line(line: &str) -> Option<Result<Vec<u8>, Error>> {
    line.trim().strip_prefix("+RCV=").map(hex_unescape)
}

/// Format an `AT+SEND=<hex>` command line, including the terminating CRLF.
pub fn format_send_line(data: &[u8]) -> String {
    format!("AT+SEND={}\r\n", hex_escape(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let data = b"hello radio".to_vec();
        let hex = hex_escape(&data);
        assert_eq!(hex_unescape(&hex).unwrap(), data);
    }

    #[test]
    fn parses_rcv_notification() {
        let line = "+RCV=68656C6C6F";
        let payload = parse_rcv_line(line).unwrap().unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn non_rcv_lines_are_ignored() {
        assert!(parse_rcv_line("OK").is_none());
    }

    #[test]
    fn odd_length_hex_is_a_protocol_error() {
        assert!(hex_unescape("ABC").is_err());
    }
}
