//! The route table: `/health`, `/peers`, `/status`, `/index`,
//! `/search`, and the CORS preflight catch-all.
use std::time::Duration;

use omesh_common::{Json, NodeId};

use crate::engine::Engine;
use crate::request::Request;
use crate::response;

/// Cap on the number of distributed-search hits returned to an HTTP client.
const SEARCH_MAX_RESULTS: u32 = 10;
/// Deadline for one distributed search.
const SEARCH_DEADLINE: Duration = Duration::from_millis(500);

/// Dispatch one parsed request to its handler, or a 404/405 if none match.
pub fn route(req: &Request, engine: &mut Engine) -> Vec<u8> {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/health") => health(),
        ("GET", "/peers") => peers(engine),
        ("GET", "/status") => status(),
        ("POST", "/index") => index(req, engine),
        ("GET", "/search") => search(req, engine),
        (method, _) if method == "OPTIONS" => response::empty(204),
        (_, path) if is_known_path(path) => response::error(405, "method not allowed"),
        _ => response::error(404, "not found"),
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(path, "/health" | "/peers" | "/status" | "/index" | "/search")
}

fn health() -> Vec<u8> {
    response::json(200, &Json::object([("status", Json::str("ok"))]))
}

fn status() -> Vec<u8> {
    response::json(
        200,
        &Json::object([
            ("status", Json::str("ok")),
            ("version", Json::str(env!("CARGO_PKG_VERSION"))),
        ]),
    )
}

fn peers(engine: &mut Engine) -> Vec<u8> {
    let entries: Vec<Json> = engine
        .reactor()
        .peer_list()
        .iter()
        .map(|p| {
            Json::object([
                ("node_id", Json::str(NodeId(p.node_id).to_hex())),
                ("host", Json::str(p.host.clone())),
                ("port", Json::Number(p.port as f64)),
                ("status", Json::str(status_label(p.status))),
                ("transport", Json::str(transport_label(p.transport))),
                ("last_seen", Json::Number(p.last_seen as f64)),
            ])
        })
        .collect();
    let count = entries.len();
    response::json(
        200,
        &Json::object([("peers", Json::Array(entries)), ("count", Json::Number(count as f64))]),
    )
}

fn status_label(status: omesh_mesh::PeerStatus) -> &'static str {
    use omesh_mesh::PeerStatus::*;
    match status {
        Unknown => "unknown",
        Connecting => "connecting",
        Connected => "connected",
        Disconnected => "disconnected",
        Failed => "failed",
    }
}

fn transport_label(transport: omesh_transport::TransportKind) -> &'static str {
    use omesh_transport::TransportKind::*;
    match transport {
        None => "none",
        StreamSocket => "stream-socket",
        DatagramSocket => "datagram-socket",
        Serial => "serial",
        RadioLongRange => "radio-longrange",
        RadioShort => "radio-short",
        KernelMesh => "kernel-mesh",
    }
}

fn index(req: &Request, engine: &mut Engine) -> Vec<u8> {
    let body = match std::str::from_utf8(&req.body).ok().and_then(|s| omesh_common::json::parse(s).ok()) {
        Some(value) => value,
        None => return response::error(400, "malformed json body"),
    };
    let content = match body.get("content").and_then(Json::as_str) {
        Some(c) => c,
        None => return response::error(400, "missing \"content\" field"),
    };

    match engine.index_local_and_broadcast(content) {
        Ok(doc_id) => response::json(
            200,
            &Json::object([("status", Json::str("indexed")), ("doc_id", Json::Number(doc_id as f64))]),
        ),
        Err(err) => response::error(500, err.to_string()),
    }
}

fn search(req: &Request, engine: &mut Engine) -> Vec<u8> {
    let Some(query) = req.query_param("q") else {
        return response::error(400, "missing \"q\" query parameter");
    };
    if query.is_empty() {
        return response::error(400, "\"q\" must not be empty");
    }

    let clock = *engine.clock();
    let (reactor, registry) = engine.reactor_and_registry_mut();
    match omesh_search::search(reactor, registry, &clock, query, SEARCH_MAX_RESULTS, SEARCH_DEADLINE) {
        Ok(outcome) => {
            let results: Vec<Json> = outcome
                .results
                .iter()
                .map(|(doc_id, score)| {
                    Json::object([("doc_id", Json::Number(*doc_id as f64)), ("score", Json::Number(*score as f64))])
                })
                .collect();
            response::json(
                200,
                &Json::object([("results", Json::Array(results)), ("total", Json::Number(outcome.total as f64))]),
            )
        }
        Err(err) => response::error(400, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request;

    fn engine_at(http_port: u16, mesh_port: u16) -> Engine {
        let dir = std::env::temp_dir().join(format!(
            "omesh-routes-test-{http_port}-{mesh_port}-{}",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        Engine::new(1, http_port, mesh_port, &dir).unwrap()
    }

    #[test]
    fn health_reports_ok() {
        let mut engine = engine_at(0, 0);
        let req = request::parse(b"GET /health HTTP/1.1\r\n\r\n").unwrap();
        let resp = route(&req, &mut engine);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains("200 OK"));
        assert!(text.ends_with(r#"{"status":"ok"}"#));
    }

    #[test]
    fn peers_on_a_fresh_node_is_empty() {
        let mut engine = engine_at(0, 0);
        let req = request::parse(b"GET /peers HTTP/1.1\r\n\r\n").unwrap();
        let resp = route(&req, &mut engine);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.ends_with(r#"{"peers":[],"count":0}"#));
    }

    #[test]
    fn index_then_search_round_trips() {
        let mut engine = engine_at(0, 0);
        let index_req = request::parse(b"POST /index HTTP/1.1\r\nContent-Length: 27\r\n\r\n{\"content\":\"hello world\"}").unwrap();
        let resp = route(&index_req, &mut engine);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains(r#""status":"indexed""#));

        let search_req = request::parse(b"GET /search?q=hello HTTP/1.1\r\n\r\n").unwrap();
        let resp = route(&search_req, &mut engine);
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains(r#""total":1"#));
    }

    #[test]
    fn unknown_path_is_404() {
        let mut engine = engine_at(0, 0);
        let req = request::parse(b"GET /nope HTTP/1.1\r\n\r\n").unwrap();
        let resp = route(&req, &mut engine);
        assert!(String::from_utf8(resp).unwrap().contains("404"));
    }

    #[test]
    fn wrong_method_on_known_path_is_405() {
        let mut engine = engine_at(0, 0);
        let req = request::parse(b"DELETE /health HTTP/1.1\r\n\r\n").unwrap();
        let resp = route(&req, &mut engine);
        assert!(String::from_utf8(resp).unwrap().contains("405"));
    }
}
