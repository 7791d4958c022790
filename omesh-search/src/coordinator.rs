//! The distributed-search coordinator: converts one local query
//! into a SEARCH fan-out across the mesh, collects RESULTS up to a deadline,
//! and merges local and peer hits into one ranked response.
use std::time::Duration;

use log::debug;
use omesh_common::Clock;
use omesh_mesh::{Body, Reactor, SearchPayload};

use crate::error::SearchError;
use crate::registry::PendingSearchRegistry;

/// The merged outcome of one distributed search ("Merge
/// semantics"): results concatenated in arrival order (local first, then
/// peers as their RESULTS arrive), with `total = local_count + peer_count`.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// `(doc_id, score)` pairs, local hits first, then peer hits in arrival order.
    pub results: Vec<(u64, u32)>,
    /// `local_count + peer_count`.
    pub total: u32,
}

/// Poll interval inside [`collect`] while waiting on peer RESULTS (
/// "sleep 10 ms").
const COLLECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Broadcast a SEARCH for `query` to every connected peer, returning the
/// number of successful sends ("Broadcast"). The query id is
/// allocated from `registry` first, since the outgoing message must carry it.
pub fn broadcast(
    reactor: &mut Reactor,
    registry: &mut PendingSearchRegistry,
    clock: &dyn Clock,
    query: &str,
    max_results: u32,
    deadline: Duration,
) -> Result<u32, SearchError> {
    if query.is_empty() {
        return Err(SearchError::Argument("query must not be empty".to_string()));
    }
    registry.clear();
    let estimate = reactor.connected_count() as u32;
    let query_id = registry.start(estimate, deadline, clock);

    let body = Body::Search(SearchPayload {
        query_id,
        flags: 0,
        max_results,
        query: query.to_string(),
    });
    let sent = reactor.broadcast_connected(&body) as u32;
    registry.set_expected_peer_count(sent);
    Ok(query_id)
}

/// Pump the mesh reactor until `registry`'s active query is complete or its
/// deadline elapses ("Collect"). A deadline of zero performs
/// exactly one pump and returns.
pub fn collect(reactor: &mut Reactor, registry: &mut PendingSearchRegistry, clock: &dyn Clock, deadline: Duration) {
    if deadline.is_zero() {
        let _ = reactor.pump(Duration::from_millis(0), clock, registry);
        return;
    }
    loop {
        let _ = reactor.pump(Duration::from_millis(0), clock, registry);
        if registry.is_complete() || registry.is_deadline_elapsed(clock) {
            break;
        }
        std::thread::sleep(COLLECT_POLL_INTERVAL);
    }
}

/// Run a full distributed search: execute locally, fan out to connected
/// peers, collect up to `deadline`, and merge (used by `GET /search`).
pub fn search(
    reactor: &mut Reactor,
    registry: &mut PendingSearchRegistry,
    clock: &dyn Clock,
    query: &str,
    max_results: u32,
    deadline: Duration,
) -> Result<SearchOutcome, SearchError> {
    let local_hits = reactor.index().query(query, max_results as usize);
    let query_id = broadcast(reactor, registry, clock, query, max_results, deadline)?;
    collect(reactor, registry, clock, deadline);

    debug!(
        target: "search",
        "query {query_id} complete: {} local, {} peer hits from {}/{} peers",
        local_hits.len(),
        registry.get_count(),
        registry.responses_received(),
        registry.expected_peer_count()
    );

    let mut results: Vec<(u64, u32)> = local_hits.iter().map(|p| (p.doc_id, p.score)).collect();
    results.extend_from_slice(registry.results());
    let total = results.len() as u32;
    Ok(SearchOutcome { results, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omesh_common::SystemClock;

    #[test]
    fn search_with_no_peers_returns_only_local_results() {
        let clock = SystemClock;
        let mut reactor = Reactor::new(1, 0, 0).unwrap();
        reactor.index_mut().index_local(1, "hello world").unwrap();
        let mut registry = PendingSearchRegistry::new();

        let outcome = search(&mut reactor, &mut registry, &clock, "hello", 10, Duration::from_millis(0)).unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.results[0].0, 1);
    }

    #[test]
    fn empty_query_is_rejected() {
        let clock = SystemClock;
        let mut reactor = Reactor::new(1, 0, 0).unwrap();
        let mut registry = PendingSearchRegistry::new();
        let err = broadcast(&mut reactor, &mut registry, &clock, "", 10, Duration::from_millis(0)).unwrap_err();
        assert!(matches!(err, SearchError::Argument(_)));
    }
}
