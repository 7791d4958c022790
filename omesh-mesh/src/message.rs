//! The mesh wire message header and payload codec. All
//! multi-byte integers are little-endian. The header is distinct from the
//! transport-level framing codec in `omesh-transport`: stream-socket
//! connections carry these messages length-prefixed by nothing but their own
//! `payload_len` field, since TCP already gives reliable byte delivery.
use crate::error::MeshError;

/// Header magic, distinct from the `omesh-transport` framing sync bytes so a
/// stream carrying both (e.g. a backend that tunnels mesh traffic over a
/// framed link) can always tell which layer produced a given byte run.
pub const MAGIC: [u8; 4] = *b"OMSH";
/// Current (and only) supported wire version.
pub const VERSION: u8 = 1;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 32;
/// Upper bound on a message's payload, generous enough for a maximum-size
/// `INDEX` message carrying a full `omesh_index::DEFAULT_MAX_CONTENT_LEN`
/// document.
pub const MAX_PAYLOAD: usize = 2 * 1024 * 1024;
/// Width of the fixed host field in `PEERS` records.
pub const PEERS_HOST_LEN: usize = 16;

/// Mesh message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Handshake identity exchange.
    Hello = 1,
    /// Heartbeat probe.
    Ping = 2,
    /// Heartbeat reply.
    Pong = 3,
    /// Ask a peer to enumerate everyone it knows.
    Discover = 4,
    /// Reply to `Discover` with a peer list.
    Peers = 5,
    /// A distributed search request.
    Search = 6,
    /// A distributed search's results.
    Results = 7,
    /// Replicate a document ingestion or deletion.
    Index = 8,
}

impl MessageType {
    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Hello),
            2 => Some(Self::Ping),
            3 => Some(Self::Pong),
            4 => Some(Self::Discover),
            5 => Some(Self::Peers),
            6 => Some(Self::Search),
            7 => Some(Self::Results),
            8 => Some(Self::Index),
            _ => None,
        }
    }
}

/// A decoded (or about-to-be-encoded) header, without its payload bytes.
#[derive(Debug, Clone)]
pub struct Header {
    /// The message type tag, if recognized.
    pub msg_type: Option<MessageType>,
    /// Protocol version the sender claims.
    pub version: u8,
    /// Reserved for future per-message flags.
    pub flags: u16,
    /// The originating node's id.
    pub source_id: u64,
    /// The intended recipient, or 0 for broadcast.
    pub dest_id: u64,
    /// Declared payload length in bytes.
    pub payload_len: u32,
    /// Checksum over the payload bytes.
    pub checksum: u32,
}

/// The PUT/DELETE operation carried in an `INDEX` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    /// Add or replace a document.
    Put,
    /// Remove a document.
    Delete,
}

/// `HELLO` payload: identity and listening ports.
#[derive(Debug, Clone)]
pub struct HelloPayload {
    /// The sender's node id.
    pub node_id: u64,
    /// The sender's protocol version.
    pub version: u32,
    /// The sender's mesh listener port.
    pub mesh_port: u16,
    /// The sender's HTTP listener port.
    pub http_port: u16,
    /// Reserved flags.
    pub flags: u32,
    /// Reserved.
    pub reserved: u32,
}

/// One `PEERS` record: enough to attempt a connection.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// The peer's node id (0 if unlearned).
    pub node_id: u64,
    /// The peer's printable host address.
    pub host: String,
    /// The peer's mesh port.
    pub port: u16,
}

/// `PEERS` payload.
#[derive(Debug, Clone, Default)]
pub struct PeersPayload {
    /// The enumerated peers.
    pub records: Vec<PeerRecord>,
}

/// `SEARCH` payload.
#[derive(Debug, Clone)]
pub struct SearchPayload {
    /// The coordinator's query id.
    pub query_id: u32,
    /// Reserved search flags.
    pub flags: u32,
    /// Maximum number of results the sender wants back.
    pub max_results: u32,
    /// The raw query string.
    pub query: String,
}

/// One `(doc_id, score)` hit in a `RESULTS` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRecord {
    /// The matched document id.
    pub doc_id: u64,
    /// Its score against the query.
    pub score: u32,
}

/// `RESULTS` payload.
#[derive(Debug, Clone, Default)]
pub struct ResultsPayload {
    /// The query this is a response to.
    pub query_id: u32,
    /// The matched documents.
    pub records: Vec<ResultRecord>,
}

/// `INDEX` payload.
#[derive(Debug, Clone)]
pub struct IndexPayload {
    /// The document id.
    pub doc_id: u64,
    /// Whether to put or delete.
    pub operation: IndexOp,
    /// The document content (empty for delete).
    pub content: Vec<u8>,
}

/// A fully decoded mesh message body. `None` when the header's type tag was
/// unrecognized — such messages are dropped by the caller,
/// not treated as a decode error.
#[derive(Debug, Clone)]
pub enum Body {
    /// See [`HelloPayload`].
    Hello(HelloPayload),
    /// No payload.
    Ping,
    /// No payload.
    Pong,
    /// No payload.
    Discover,
    /// See [`PeersPayload`].
    Peers(PeersPayload),
    /// See [`SearchPayload`].
    Search(SearchPayload),
    /// See [`ResultsPayload`].
    Results(ResultsPayload),
    /// See [`IndexPayload`].
    Index(IndexPayload),
}

/// A header paired with its decoded body, or `None` when the type tag is
/// unrecognized.
#[derive(Debug, Clone)]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// The decoded body, or `None` for an unrecognized type tag.
    pub body: Option<Body>,
}

/// Simple CRC-32 (poly 0xEDB88320, IEEE) over payload bytes. Any algorithm
/// works as long as all nodes in a mesh agree on it.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in payload {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn encode_body(body: &Body) -> Vec<u8> {
    let mut out = Vec::new();
    match body {
        Body::Hello(h) => {
            push_u64(&mut out, h.node_id);
            push_u32(&mut out, h.version);
            push_u16(&mut out, h.mesh_port);
            push_u16(&mut out, h.http_port);
            push_u32(&mut out, h.flags);
            push_u32(&mut out, h.reserved);
        }
        Body::Ping | Body::Pong | Body::Discover => {}
        Body::Peers(p) => {
            push_u32(&mut out, p.records.len() as u32);
            for record in &p.records {
                push_u64(&mut out, record.node_id);
                let mut host_field = [0u8; PEERS_HOST_LEN];
                let bytes = record.host.as_bytes();
                let len = bytes.len().min(PEERS_HOST_LEN);
                host_field[..len].copy_from_slice(&bytes[..len]);
                out.extend_from_slice(&host_field);
                push_u16(&mut out, record.port);
            }
        }
        Body::Search(s) => {
            push_u32(&mut out, s.query_id);
            push_u32(&mut out, s.flags);
            push_u32(&mut out, s.max_results);
            push_u32(&mut out, s.query.len() as u32);
            out.extend_from_slice(s.query.as_bytes());
        }
        Body::Results(r) => {
            push_u32(&mut out, r.query_id);
            push_u32(&mut out, r.records.len() as u32);
            for record in &r.records {
                push_u64(&mut out, record.doc_id);
                push_u32(&mut out, record.score);
            }
        }
        Body::Index(i) => {
            push_u64(&mut out, i.doc_id);
            push_u32(&mut out, if i.operation == IndexOp::Put { 1 } else { 2 });
            push_u32(&mut out, i.content.len() as u32);
            out.extend_from_slice(&i.content);
        }
    }
    out
}

fn msg_type_of(body: &Body) -> MessageType {
    match body {
        Body::Hello(_) => MessageType::Hello,
        Body::Ping => MessageType::Ping,
        Body::Pong => MessageType::Pong,
        Body::Discover => MessageType::Discover,
        Body::Peers(_) => MessageType::Peers,
        Body::Search(_) => MessageType::Search,
        Body::Results(_) => MessageType::Results,
        Body::Index(_) => MessageType::Index,
    }
}

/// Encode a message body with the given source/destination ids into a
/// complete wire frame (header + payload).
pub fn encode(body: &Body, source_id: u64, dest_id: u64) -> Result<Vec<u8>, MeshError> {
    let payload = encode_body(body);
    if payload.len() > MAX_PAYLOAD {
        return Err(MeshError::Argument(format!(
            "payload of {} bytes exceeds the {}-byte cap",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(msg_type_of(body) as u8);
    out.push(VERSION);
    push_u16(&mut out, 0); // flags
    push_u64(&mut out, source_id);
    push_u64(&mut out, dest_id);
    push_u32(&mut out, payload.len() as u32);
    push_u32(&mut out, checksum(&payload));
    out.extend_from_slice(&payload);
    Ok(out)
}

fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([bytes[pos], bytes[pos + 1]])
}
fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}
fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap())
}

/// Parse a header out of the first [`HEADER_LEN`] bytes of `bytes`.
pub fn decode_header(bytes: &[u8]) -> Result<Header, MeshError> {
    if bytes.len() < HEADER_LEN {
        return Err(MeshError::Protocol("short header".to_string()));
    }
    if bytes[0..4] != MAGIC {
        return Err(MeshError::Protocol("bad magic".to_string()));
    }
    let msg_type = MessageType::from_u8(bytes[4]);
    let version = bytes[5];
    let flags = read_u16(bytes, 6);
    let source_id = read_u64(bytes, 8);
    let dest_id = read_u64(bytes, 16);
    let payload_len = read_u32(bytes, 24);
    let checksum = read_u32(bytes, 28);
    Ok(Header {
        msg_type,
        version,
        flags,
        source_id,
        dest_id,
        payload_len,
        checksum,
    })
}

/// Decode a complete frame (header plus exactly `header.payload_len` payload
/// bytes) into a [`Message`]. Validates the declared length against what
/// follows, the checksum, and that the payload does not exceed
/// `max_payload`. An unrecognized type tag yields `body: None` rather than an
/// error, matching the "unknown types are silently dropped" rule; the caller
/// drops it.
pub fn decode(bytes: &[u8], max_payload: usize) -> Result<Message, MeshError> {
    let header = decode_header(bytes)?;
    let payload_len = header.payload_len as usize;
    if payload_len > max_payload {
        return Err(MeshError::Protocol(format!(
            "payload length {payload_len} exceeds cap {max_payload}"
        )));
    }
    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + payload_len)
        .ok_or_else(|| MeshError::Protocol("payload shorter than declared length".to_string()))?;
    if checksum(payload) != header.checksum {
        return Err(MeshError::Protocol("checksum mismatch".to_string()));
    }

    let body = match header.msg_type {
        None => None,
        Some(MessageType::Ping) => Some(Body::Ping),
        Some(MessageType::Pong) => Some(Body::Pong),
        Some(MessageType::Discover) => Some(Body::Discover),
        Some(MessageType::Hello) => Some(Body::Hello(decode_hello(payload)?)),
        Some(MessageType::Peers) => Some(Body::Peers(decode_peers(payload)?)),
        Some(MessageType::Search) => Some(Body::Search(decode_search(payload)?)),
        Some(MessageType::Results) => Some(Body::Results(decode_results(payload)?)),
        Some(MessageType::Index) => Some(Body::Index(decode_index(payload)?)),
    };
    Ok(Message { header, body })
}

fn need(payload: &[u8], len: usize) -> Result<(), MeshError> {
    if payload.len() < len {
        Err(MeshError::Protocol("payload too short for its type".to_string()))
    } else {
        Ok(())
    }
}

fn decode_hello(payload: &[u8]) -> Result<HelloPayload, MeshError> {
    need(payload, 24)?;
    Ok(HelloPayload {
        node_id: read_u64(payload, 0),
        version: read_u32(payload, 8),
        mesh_port: read_u16(payload, 12),
        http_port: read_u16(payload, 14),
        flags: read_u32(payload, 16),
        reserved: read_u32(payload, 20),
    })
}

fn decode_peers(payload: &[u8]) -> Result<PeersPayload, MeshError> {
    need(payload, 4)?;
    let count = read_u32(payload, 0) as usize;
    let mut pos = 4;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        need(payload, pos + 8 + PEERS_HOST_LEN + 2)?;
        let node_id = read_u64(payload, pos);
        pos += 8;
        let host_field = &payload[pos..pos + PEERS_HOST_LEN];
        let end = host_field.iter().position(|&b| b == 0).unwrap_or(PEERS_HOST_LEN);
        let host = String::from_utf8_lossy(&host_field[..end]).into_owned();
        pos += PEERS_HOST_LEN;
        let port = read_u16(payload, pos);
        pos += 2;
        records.push(PeerRecord { node_id, host, port });
    }
    Ok(PeersPayload { records })
}

fn decode_search(payload: &[u8]) -> Result<SearchPayload, MeshError> {
    need(payload, 16)?;
    let query_id = read_u32(payload, 0);
    let flags = read_u32(payload, 4);
    let max_results = read_u32(payload, 8);
    let query_len = read_u32(payload, 12) as usize;
    need(payload, 16 + query_len)?;
    let query = std::str::from_utf8(&payload[16..16 + query_len])
        .map_err(|_| MeshError::Protocol("query is not utf-8".to_string()))?
        .to_string();
    Ok(SearchPayload {
        query_id,
        flags,
        max_results,
        query,
    })
}

fn decode_results(payload: &[u8]) -> Result<ResultsPayload, MeshError> {
    need(payload, 8)?;
    let query_id = read_u32(payload, 0);
    let count = read_u32(payload, 4) as usize;
    let mut pos = 8;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        need(payload, pos + 12)?;
        let doc_id = read_u64(payload, pos);
        let score = read_u32(payload, pos + 8);
        pos += 12;
        records.push(ResultRecord { doc_id, score });
    }
    Ok(ResultsPayload { query_id, records })
}

fn decode_index(payload: &[u8]) -> Result<IndexPayload, MeshError> {
    need(payload, 16)?;
    let doc_id = read_u64(payload, 0);
    let operation = if read_u32(payload, 8) == 2 {
        IndexOp::Delete
    } else {
        IndexOp::Put
    };
    let content_len = read_u32(payload, 12) as usize;
    need(payload, 16 + content_len)?;
    let content = payload[16..16 + content_len].to_vec();
    Ok(IndexPayload {
        doc_id,
        operation,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let body = Body::Hello(HelloPayload {
            node_id: 42,
            version: 1,
            mesh_port: 9000,
            http_port: 8080,
            flags: 0,
            reserved: 0,
        });
        let frame = encode(&body, 1, 2).unwrap();
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        assert_eq!(msg.header.source_id, 1);
        assert_eq!(msg.header.dest_id, 2);
        assert!(matches!(msg.body, Some(Body::Hello(h)) if h.node_id == 42 && h.mesh_port == 9000));
    }

    #[test]
    fn ping_has_an_empty_payload() {
        let frame = encode(&Body::Ping, 1, 0).unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        assert!(matches!(msg.body, Some(Body::Ping)));
    }

    #[test]
    fn search_and_results_round_trip() {
        let search = Body::Search(SearchPayload {
            query_id: 7,
            flags: 0,
            max_results: 10,
            query: "hello world".to_string(),
        });
        let frame = encode(&search, 1, 0).unwrap();
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        assert!(matches!(msg.body, Some(Body::Search(s)) if s.query == "hello world" && s.query_id == 7));

        let results = Body::Results(ResultsPayload {
            query_id: 7,
            records: vec![ResultRecord { doc_id: 1, score: 3 }, ResultRecord { doc_id: 2, score: 1 }],
        });
        let frame = encode(&results, 2, 1).unwrap();
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        match msg.body {
            Some(Body::Results(r)) => {
                assert_eq!(r.query_id, 7);
                assert_eq!(r.records.len(), 2);
            }
            _ => panic!("expected Results"),
        }
    }

    #[test]
    fn index_put_and_delete_round_trip() {
        let put = Body::Index(IndexPayload {
            doc_id: 5,
            operation: IndexOp::Put,
            content: b"some content".to_vec(),
        });
        let frame = encode(&put, 1, 0).unwrap();
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        assert!(matches!(msg.body, Some(Body::Index(i)) if i.operation == IndexOp::Put && i.content == b"some content"));

        let delete = Body::Index(IndexPayload {
            doc_id: 5,
            operation: IndexOp::Delete,
            content: Vec::new(),
        });
        let frame = encode(&delete, 1, 0).unwrap();
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        assert!(matches!(msg.body, Some(Body::Index(i)) if i.operation == IndexOp::Delete));
    }

    #[test]
    fn peers_round_trips_with_host_strings() {
        let body = Body::Peers(PeersPayload {
            records: vec![
                PeerRecord { node_id: 1, host: "10.0.0.1".to_string(), port: 9000 },
                PeerRecord { node_id: 2, host: "10.0.0.2".to_string(), port: 9001 },
            ],
        });
        let frame = encode(&body, 1, 0).unwrap();
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        match msg.body {
            Some(Body::Peers(p)) => {
                assert_eq!(p.records.len(), 2);
                assert_eq!(p.records[0].host, "10.0.0.1");
            }
            _ => panic!("expected Peers"),
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut frame = encode(&Body::Ping, 1, 0).unwrap();
        frame[0] = 0;
        assert!(decode(&frame, MAX_PAYLOAD).is_err());
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let body = Body::Search(SearchPayload {
            query_id: 1,
            flags: 0,
            max_results: 1,
            query: "x".to_string(),
        });
        let mut frame = encode(&body, 1, 0).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(decode(&frame, MAX_PAYLOAD).is_err());
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut frame = encode(&Body::Ping, 1, 0).unwrap();
        frame[24..28].copy_from_slice(&(MAX_PAYLOAD as u32 + 1).to_le_bytes());
        assert!(decode(&frame, MAX_PAYLOAD).is_err());
    }

    #[test]
    fn unknown_type_tag_decodes_with_no_body() {
        let mut frame = encode(&Body::Ping, 1, 0).unwrap();
        frame[4] = 0xEE;
        let msg = decode(&frame, MAX_PAYLOAD).unwrap();
        assert!(msg.body.is_none());
    }
}
