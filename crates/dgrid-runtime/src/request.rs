#![forbid(unsafe_code)]

//! In-flight request bookkeeping and supersession.
//!
//! Every data request is registered here before it is issued. Registering a
//! new request aborts the outstanding ones it supersedes:
//!
//! 1. a full load supersedes everything, since it discards the tree the
//!    others would merge into;
//! 2. a request for the same node supersedes the older one;
//! 3. requests whose dimension paths diverge within their shared length
//!    supersede each other.
//!
//! Requests for different nodes along identical or extending paths run
//! concurrently. Aborting flips the request's [`AbortHandle`]; the response
//! may still arrive and is then discarded by [`RequestTracker::finish`].

use std::fmt;

use dgrid_core::NodeRef;
use futures_util::future::{AbortHandle, AbortRegistration};

/// Identifier of one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// What a request loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Reset and reload the base level along `breakdown`.
    Full { breakdown: Vec<String> },
    /// Next page of `node`, whose rows are split along the last dimension of
    /// `breakdown`.
    Node { node: NodeRef, breakdown: Vec<String> },
}

impl RequestTarget {
    /// Dimension path attached to the request.
    #[must_use]
    pub fn breakdown(&self) -> &[String] {
        match self {
            Self::Full { breakdown } | Self::Node { breakdown, .. } => breakdown,
        }
    }

    fn node(&self) -> Option<&NodeRef> {
        match self {
            Self::Full { .. } => None,
            Self::Node { node, .. } => Some(node),
        }
    }

    /// Whether issuing `self` must abort the outstanding `other`.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        if matches!(self, Self::Full { .. }) {
            return true;
        }
        if let (Some(a), Some(b)) = (self.node(), other.node())
            && a == b
        {
            return true;
        }
        let (a, b) = (self.breakdown(), other.breakdown());
        let shared = a.len().min(b.len());
        a[..shared] != b[..shared]
    }
}

struct InFlight {
    id: RequestId,
    target: RequestTarget,
    handle: AbortHandle,
}

/// Outstanding requests of one data source.
#[derive(Default)]
pub struct RequestTracker {
    next_id: u64,
    in_flight: Vec<InFlight>,
    superseded: u64,
}

impl RequestTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `target`, aborting whatever it supersedes.
    ///
    /// Returns the request id and the registration its future must be wrapped
    /// with.
    pub fn register(&mut self, target: RequestTarget) -> (RequestId, AbortRegistration) {
        let id = self.next_id();
        (id, self.register_as(id, target))
    }

    /// Allocate the id for a request about to be registered.
    pub fn next_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    /// Register a request under an id from [`next_id`](Self::next_id).
    pub fn register_as(&mut self, id: RequestId, target: RequestTarget) -> AbortRegistration {
        let mut kept = Vec::with_capacity(self.in_flight.len());
        for request in self.in_flight.drain(..) {
            if target.supersedes(&request.target) {
                request.handle.abort();
                self.superseded += 1;
                tracing::debug!(request = %request.id, by = %id, "request superseded");
                crate::debug_trace!("{} superseded by {}", request.id, id);
            } else {
                kept.push(request);
            }
        }
        self.in_flight = kept;

        let (handle, registration) = AbortHandle::new_pair();
        self.in_flight.push(InFlight { id, target, handle });
        registration
    }

    /// Mark `id` as resolved. Returns `false` if it was superseded, in which
    /// case its response must be discarded.
    pub fn finish(&mut self, id: RequestId) -> bool {
        let before = self.in_flight.len();
        self.in_flight.retain(|r| r.id != id);
        self.in_flight.len() != before
    }

    /// Whether `id` is still outstanding and current.
    #[must_use]
    pub fn is_current(&self, id: RequestId) -> bool {
        self.in_flight.iter().any(|r| r.id == id)
    }

    /// Whether a full load is outstanding.
    #[must_use]
    pub fn has_full_load(&self) -> bool {
        self.in_flight
            .iter()
            .any(|r| matches!(r.target, RequestTarget::Full { .. }))
    }

    /// Abort every outstanding request.
    pub fn abort_all(&mut self) {
        for request in self.in_flight.drain(..) {
            request.handle.abort();
            self.superseded += 1;
        }
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Total requests aborted so far.
    #[must_use]
    pub fn superseded_count(&self) -> u64 {
        self.superseded
    }
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<RequestId> = self.in_flight.iter().map(|r| r.id).collect();
        f.debug_struct("RequestTracker")
            .field("in_flight", &ids)
            .field("superseded", &self.superseded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgrid_core::BreakdownId;
    use futures_util::FutureExt;
    use futures_util::future::{Abortable, ready};

    fn dims(d: &[&str]) -> Vec<String> {
        d.iter().map(|s| (*s).to_owned()).collect()
    }

    fn node(level: usize, id: &str, d: &[&str]) -> RequestTarget {
        RequestTarget::Node {
            node: NodeRef::child_of(level, BreakdownId::new(id)),
            breakdown: dims(d),
        }
    }

    fn full(d: &[&str]) -> RequestTarget {
        RequestTarget::Full { breakdown: dims(d) }
    }

    #[test]
    fn full_load_supersedes_everything() {
        assert!(full(&["a"]).supersedes(&node(1, "1", &["a", "b"])));
        assert!(full(&["a"]).supersedes(&full(&["a"])));
    }

    #[test]
    fn same_node_supersedes() {
        assert!(node(1, "1", &["a", "b"]).supersedes(&node(1, "1", &["a", "b"])));
    }

    #[test]
    fn extending_paths_on_other_nodes_coexist() {
        assert!(!node(1, "1", &["a", "b"]).supersedes(&node(1, "2", &["a", "b"])));
        assert!(!node(2, "1||4", &["a", "b", "c"]).supersedes(&node(1, "2", &["a", "b"])));
        assert!(!node(1, "2", &["a", "b"]).supersedes(&full(&["a", "b", "c"])));
    }

    #[test]
    fn diverging_paths_supersede() {
        assert!(node(1, "1", &["a", "x"]).supersedes(&node(1, "2", &["a", "b"])));
        assert!(node(1, "1", &["b"]).supersedes(&full(&["a"])));
    }

    #[test]
    fn register_aborts_superseded_futures() {
        let mut tracker = RequestTracker::new();
        let (first, reg) = tracker.register(full(&["a"]));
        let pending = Abortable::new(ready(1), reg);

        let (second, _reg) = tracker.register(full(&["b"]));
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));
        assert_eq!(tracker.superseded_count(), 1);
        assert!(pending.now_or_never().unwrap().is_err());

        assert!(!tracker.finish(first));
        assert!(tracker.finish(second));
        assert!(tracker.is_empty());
    }

    #[test]
    fn independent_requests_stay_in_flight() {
        let mut tracker = RequestTracker::new();
        tracker.register(node(1, "1", &["a", "b"]));
        tracker.register(node(1, "2", &["a", "b"]));
        assert_eq!(tracker.len(), 2);
        tracker.abort_all();
        assert!(tracker.is_empty());
        assert_eq!(tracker.superseded_count(), 2);
    }

    #[test]
    fn full_load_is_tracked_until_finished() {
        let mut tracker = RequestTracker::new();
        tracker.register(node(1, "1", &["a", "b"]));
        assert!(!tracker.has_full_load());
        let (id, _reg) = tracker.register(full(&["a"]));
        assert!(tracker.has_full_load());
        tracker.finish(id);
        assert!(!tracker.has_full_load());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn path() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..4)
                .prop_map(|d| dims(&d))
        }

        fn target() -> impl Strategy<Value = RequestTarget> {
            prop_oneof![
                path().prop_map(|breakdown| RequestTarget::Full { breakdown }),
                (1usize..3, prop::sample::select(vec!["1", "2"]), path()).prop_map(
                    |(level, id, breakdown)| RequestTarget::Node {
                        node: NodeRef::child_of(level, BreakdownId::new(id)),
                        breakdown,
                    }
                ),
            ]
        }

        proptest! {
            #[test]
            fn full_load_supersedes_any_target(d in path(), other in target()) {
                let full = RequestTarget::Full { breakdown: d };
                prop_assert!(full.supersedes(&other));
            }

            #[test]
            fn node_supersession_is_symmetric(a in target(), b in target()) {
                prop_assume!(matches!(a, RequestTarget::Node { .. }));
                prop_assume!(matches!(b, RequestTarget::Node { .. }));
                prop_assert_eq!(a.supersedes(&b), b.supersedes(&a));
                prop_assert!(a.supersedes(&a));
            }

            #[test]
            fn extending_paths_coexist_unless_same_node(a in target(), b in target()) {
                let (pa, pb) = (a.breakdown(), b.breakdown());
                let shared = pa.len().min(pb.len());
                prop_assume!(pa[..shared] == pb[..shared]);
                prop_assume!(!matches!(a, RequestTarget::Full { .. }));
                prop_assert_eq!(a.supersedes(&b), a.node().is_some() && a.node() == b.node());
            }

            #[test]
            fn registration_keeps_only_compatible_requests(
                targets in prop::collection::vec(target(), 1..24)
            ) {
                let mut tracker = RequestTracker::new();
                let mut issued = Vec::new();
                for t in &targets {
                    let (id, _reg) = tracker.register(t.clone());
                    issued.push((id, t.clone()));
                }
                let live: Vec<&(RequestId, RequestTarget)> =
                    issued.iter().filter(|(id, _)| tracker.is_current(*id)).collect();
                prop_assert_eq!(live.len(), tracker.len());
                prop_assert_eq!(tracker.len() as u64 + tracker.superseded_count(), targets.len() as u64);
                for (i, (_, older)) in live.iter().enumerate() {
                    for (_, newer) in &live[i + 1..] {
                        prop_assert!(!newer.supersedes(older));
                    }
                }
                prop_assert!(tracker.is_current(issued[issued.len() - 1].0));
            }
        }
    }
}
