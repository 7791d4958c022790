//! The pending-search registry: state for the single
//! in-flight distributed query this node is coordinating. Only one query is
//! tracked at a time — concurrent callers serialize on this resource, per
//! a deliberate simplification: only one search is ever in flight.
use std::time::Duration;

use omesh_common::Clock;
use omesh_mesh::SearchResultSink;

/// Upper bound on buffered `(doc_id, score)` hits for one query. Generous
/// enough for the peer-list cap (64) times a realistic per-peer
/// `max_results`, while still bounded by a fixed capacity.
pub const RESULT_CAPACITY: usize = 1024;

struct PendingSearch {
    query_id: u32,
    expected_peer_count: u32,
    responses_received: u32,
    deadline: Duration,
    start_monotonic: std::time::Instant,
    results: Vec<(u64, u32)>,
}

/// Tracks the single active distributed query and its accumulated results.
#[derive(Default)]
pub struct PendingSearchRegistry {
    active: Option<PendingSearch>,
    next_query_id: u32,
}

impl PendingSearchRegistry {
    /// An empty registry with no active query. Query ids start at 1, since
    /// 0 is not a reserved sentinel on the wire but starting from 1 keeps
    /// query ids visually distinct from the "unknown node id" convention.
    pub fn new() -> Self {
        Self { active: None, next_query_id: 1 }
    }

    /// Drop any active query and its buffered results.
    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Begin a new query, estimating `expected_peer_count` from `max_peers`
    /// (the connected-peer count known before the broadcast is sent).
    /// [`PendingSearchRegistry::set_expected_peer_count`] corrects this once
    /// the broadcast's actual successful-send count is known, since the
    /// query id must exist before the SEARCH message carrying it can be
    /// built and sent.
    pub fn start(&mut self, max_peers: u32, deadline: Duration, clock: &dyn Clock) -> u32 {
        let query_id = self.next_query_id;
        self.next_query_id = if self.next_query_id == u32::MAX { 1 } else { self.next_query_id + 1 };
        self.active = Some(PendingSearch {
            query_id,
            expected_peer_count: max_peers,
            responses_received: 0,
            deadline,
            start_monotonic: clock.now_monotonic(),
            results: Vec::new(),
        });
        query_id
    }

    /// Correct `expected_peer_count` to the broadcast's actual successful
    /// send count.
    pub fn set_expected_peer_count(&mut self, expected: u32) {
        if let Some(search) = &mut self.active {
            search.expected_peer_count = expected;
        }
    }

    /// The id of the currently active query, if any.
    pub fn active_query_id(&self) -> Option<u32> {
        self.active.as_ref().map(|s| s.query_id)
    }

    /// Append a `(doc_id, score)` hit for `query_id`. A no-op if there is no
    /// active query, if `query_id` does not match it, or if the result
    /// buffer is already at [`RESULT_CAPACITY`].
    pub fn add_result(&mut self, query_id: u32, doc_id: u64, score: u32) {
        if let Some(search) = &mut self.active {
            if search.query_id == query_id && search.results.len() < RESULT_CAPACITY {
                search.results.push((doc_id, score));
            }
        }
    }

    /// Record that one peer has responded to `query_id`.
    pub fn mark_peer_responded(&mut self, query_id: u32) {
        if let Some(search) = &mut self.active {
            if search.query_id == query_id {
                search.responses_received += 1;
            }
        }
    }

    /// Whether every expected peer has responded. Vacuously `true` when no
    /// query is active.
    pub fn is_complete(&self) -> bool {
        self.active.as_ref().map_or(true, |s| s.responses_received >= s.expected_peer_count)
    }

    /// Whether the active query's deadline has elapsed. Vacuously `true`
    /// when no query is active.
    pub fn is_deadline_elapsed(&self, clock: &dyn Clock) -> bool {
        self.active
            .as_ref()
            .map_or(true, |s| clock.now_monotonic().duration_since(s.start_monotonic) >= s.deadline)
    }

    /// Number of results buffered for the active query (0 if none active).
    pub fn get_count(&self) -> usize {
        self.active.as_ref().map_or(0, |s| s.results.len())
    }

    /// The `responses_received` counter for the active query, 0 if none.
    pub fn responses_received(&self) -> u32 {
        self.active.as_ref().map_or(0, |s| s.responses_received)
    }

    /// The `expected_peer_count` for the active query, 0 if none.
    pub fn expected_peer_count(&self) -> u32 {
        self.active.as_ref().map_or(0, |s| s.expected_peer_count)
    }

    /// The `index`'th buffered `(doc_id, score)` result, in arrival order.
    pub fn get_result(&self, index: usize) -> Option<(u64, u32)> {
        self.active.as_ref().and_then(|s| s.results.get(index).copied())
    }

    /// All buffered results, in arrival order.
    pub fn results(&self) -> &[(u64, u32)] {
        self.active.as_ref().map_or(&[], |s| s.results.as_slice())
    }
}

impl SearchResultSink for PendingSearchRegistry {
    fn on_results(&mut self, query_id: u32, records: &[(u64, u32)]) {
        for &(doc_id, score) in records {
            self.add_result(query_id, doc_id, score);
        }
        self.mark_peer_responded(query_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omesh_common::SystemClock;

    #[test]
    fn add_result_with_no_active_query_is_a_no_op() {
        let mut registry = PendingSearchRegistry::new();
        registry.add_result(1, 7, 3);
        assert_eq!(registry.get_count(), 0);
    }

    #[test]
    fn query_id_is_a_monotonic_counter_across_starts() {
        let clock = SystemClock;
        let mut registry = PendingSearchRegistry::new();
        let first = registry.start(1, Duration::from_millis(500), &clock);
        registry.clear();
        let second = registry.start(1, Duration::from_millis(500), &clock);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn results_for_a_stale_query_id_are_dropped() {
        let clock = SystemClock;
        let mut registry = PendingSearchRegistry::new();
        let query_id = registry.start(1, Duration::from_millis(500), &clock);
        registry.add_result(query_id + 1, 1, 1);
        assert_eq!(registry.get_count(), 0);
    }

    #[test]
    fn expected_peer_count_is_corrected_after_broadcast() {
        let clock = SystemClock;
        let mut registry = PendingSearchRegistry::new();
        let estimate = 3;
        registry.start(estimate, Duration::from_millis(500), &clock);
        assert_eq!(registry.expected_peer_count(), estimate);

        let actual_sent = 2;
        registry.set_expected_peer_count(actual_sent);
        assert_eq!(registry.expected_peer_count(), actual_sent);
    }

    #[test]
    fn is_complete_once_every_expected_peer_has_responded() {
        let clock = SystemClock;
        let mut registry = PendingSearchRegistry::new();
        let query_id = registry.start(2, Duration::from_millis(500), &clock);
        assert!(!registry.is_complete());

        registry.mark_peer_responded(query_id);
        assert!(!registry.is_complete());
        registry.mark_peer_responded(query_id);
        assert!(registry.is_complete());
    }

    #[test]
    fn result_buffer_drops_results_past_capacity() {
        let clock = SystemClock;
        let mut registry = PendingSearchRegistry::new();
        let query_id = registry.start(1, Duration::from_millis(500), &clock);
        for i in 0..RESULT_CAPACITY + 10 {
            registry.add_result(query_id, i as u64, 1);
        }
        assert_eq!(registry.get_count(), RESULT_CAPACITY);
    }

    #[test]
    fn on_results_sink_appends_and_counts_one_response() {
        let clock = SystemClock;
        let mut registry = PendingSearchRegistry::new();
        let query_id = registry.start(1, Duration::from_millis(500), &clock);
        registry.on_results(query_id, &[(1, 5), (2, 3)]);
        assert_eq!(registry.get_count(), 2);
        assert_eq!(registry.responses_received(), 1);
    }
}
