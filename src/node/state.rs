//! The Ricart–Agrawala decision rules and the per-node state machine,
//! expressed as pure transitions with no I/O. The owning actor
//! (`super::Node`) holds this behind a mutex and does all I/O outside the
//! lock.
//!
//! The decision rules follow Ricart and Agrawala's original algorithm
//! directly: a REQUEST is answered immediately unless the receiver is itself
//! requesting with strictly higher priority, in which case the reply is
//! deferred until the receiver's own critical-section round ends.

use crate::clock::{LamportClock, Priority};
use std::collections::BTreeSet;

/// The five phases a round moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Awaiting,
    Entering,
    InCs,
    Releasing,
}

/// What to do with an incoming REQUEST, decided by `NodeState::handle_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// Reply immediately: we are not requesting, or the requester has
    /// strictly higher priority than our own outstanding request.
    ReplyNow,
    /// Defer: we hold higher priority; the REPLY is sent on our CS exit.
    Defer,
}

/// The two causes that can empty `awaiting` for one peer: kept as distinct
/// variants rather than silently folding a send failure into a normal reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Received,
    Unreachable,
}

#[derive(Debug)]
pub struct NodeState {
    pub id: u8,
    pub clock: LamportClock,
    pub requesting: bool,
    pub my_request_ts: Option<u64>,
    pub awaiting: BTreeSet<u8>,
    pub deferred: BTreeSet<u8>,
    pub in_cs: bool,
    pub phase: Phase,
}

impl NodeState {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            clock: LamportClock::new(),
            requesting: false,
            my_request_ts: None,
            awaiting: BTreeSet::new(),
            deferred: BTreeSet::new(),
            in_cs: false,
            phase: Phase::Idle,
        }
    }

    fn my_priority(&self) -> Priority {
        Priority::new(
            self.my_request_ts.expect("requesting implies my_request_ts"),
            self.id,
        )
    }

    /// Only valid from `Idle`. Returns the timestamp to stamp the outbound
    /// REQUEST with. `peers` is the full peer id set, becoming the initial
    /// `awaiting` set.
    pub fn begin_request(&mut self, peers: impl IntoIterator<Item = u8>) -> anyhow::Result<u64> {
        anyhow::ensure!(
            !self.requesting,
            "begin_request called while already requesting"
        );
        anyhow::ensure!(
            self.deferred.is_empty(),
            "deferred must be empty before starting a new round"
        );
        let ts = self.clock.tick();
        self.requesting = true;
        self.my_request_ts = Some(ts);
        self.awaiting = peers.into_iter().collect();
        self.phase = Phase::Awaiting;
        Ok(ts)
    }

    /// Updates the clock and decides REPLY-now vs defer. Does not itself
    /// mutate `deferred` or `awaiting` for the sender's bookkeeping beyond
    /// the requester's own case (the caller acts on the returned decision).
    pub fn handle_request(&mut self, ts: u64, from: u8) -> RequestDecision {
        self.clock.observe(ts);
        if !self.requesting {
            return RequestDecision::ReplyNow;
        }
        let their_priority = Priority::new(ts, from);
        if their_priority < self.my_priority() {
            RequestDecision::ReplyNow
        } else {
            self.deferred.insert(from);
            RequestDecision::Defer
        }
    }

    /// Idempotent: a duplicate REPLY for a peer already removed from
    /// `awaiting` has no effect. Returns `true` once this call
    /// makes `awaiting` empty while still requesting (i.e. time to enter).
    pub fn handle_reply(&mut self, ts: u64, from: u8) -> bool {
        self.clock.observe(ts);
        self.awaiting.remove(&from);
        self.ready_to_enter()
    }

    /// A send failure during REQUEST fan-out counts as an implicit REPLY.
    /// Kept as an explicit variant so callers and tests can tell the two
    /// causes apart instead of silently treating them the same.
    pub fn apply_reply_outcome(&mut self, from: u8, outcome: ReplyOutcome) -> bool {
        match outcome {
            ReplyOutcome::Received => {}
            ReplyOutcome::Unreachable => {}
        }
        self.awaiting.remove(&from);
        self.ready_to_enter()
    }

    fn ready_to_enter(&self) -> bool {
        self.requesting && self.awaiting.is_empty()
    }

    /// Awaiting -> Entering, once all REPLYs are in.
    pub fn begin_entering(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.ready_to_enter(), "not all replies collected yet");
        self.phase = Phase::Entering;
        Ok(())
    }

    /// Entering -> InCs, on ENTER_OK from the orchestrator.
    pub fn enter_cs(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.phase == Phase::Entering, "enter_cs outside Entering");
        anyhow::ensure!(self.awaiting.is_empty(), "in_cs requires awaiting to be empty");
        self.in_cs = true;
        self.phase = Phase::InCs;
        Ok(())
    }

    /// Entering -> Releasing without having entered: orchestrator rejection
    /// or a CS timeout/watchdog. Also used from InCs on normal EXIT.
    /// Idempotent: a second call when already idle is a no-op, matching
    /// Calling it twice for the same round is a no-op.
    pub fn exit_cs(&mut self) -> Vec<u8> {
        if self.phase == Phase::Idle {
            return Vec::new();
        }
        self.phase = Phase::Releasing;
        self.in_cs = false;
        self.requesting = false;
        self.my_request_ts = None;
        self.awaiting.clear();
        let drained: Vec<u8> = self.deferred.iter().copied().collect();
        self.deferred.clear();
        self.phase = Phase::Idle;
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(ids: &[u8]) -> BTreeSet<u8> {
        ids.iter().copied().collect()
    }

    #[test]
    fn scenario_a_no_contention() {
        // Node 1, cluster of 2; node 2 is idle and replies immediately.
        let mut node1 = NodeState::new(1);
        let ts = node1.begin_request([2]).unwrap();
        assert_eq!(ts, 1);
        assert_eq!(node1.phase, Phase::Awaiting);

        let mut node2 = NodeState::new(2);
        let decision = node2.handle_request(ts, 1);
        assert_eq!(decision, RequestDecision::ReplyNow);

        let ready = node1.handle_reply(node2.clock.value(), 2);
        assert!(ready);
        node1.begin_entering().unwrap();
        node1.enter_cs().unwrap();
        assert!(node1.in_cs);

        let drained = node1.exit_cs();
        assert!(drained.is_empty());
        assert!(!node1.in_cs);
        assert!(!node1.requesting);
    }

    #[test]
    fn scenario_c_tie_break_smaller_id_wins() {
        // Both request at ts=4. Node 1 sees (4,2) > (4,1): defers node 2.
        let mut node1 = NodeState::new(1);
        node1.begin_request([2]).unwrap();
        node1.clock = LamportClock::from(4);
        node1.my_request_ts = Some(4);

        let decision = node1.handle_request(4, 2);
        assert_eq!(decision, RequestDecision::Defer);
        assert!(node1.deferred.contains(&2));

        // Node 2 sees (4,1) < (4,2): replies immediately.
        let mut node2 = NodeState::new(2);
        node2.begin_request([1]).unwrap();
        node2.clock = LamportClock::from(4);
        node2.my_request_ts = Some(4);

        let decision = node2.handle_request(4, 1);
        assert_eq!(decision, RequestDecision::ReplyNow);
    }

    #[test]
    fn duplicate_reply_is_idempotent() {
        let mut node = NodeState::new(1);
        node.begin_request([2, 3]).unwrap();
        assert!(!node.handle_reply(1, 2));
        // duplicate from the same peer: no effect, still awaiting 3
        assert!(!node.handle_reply(1, 2));
        assert!(node.handle_reply(1, 3));
    }

    #[test]
    fn exit_cs_is_idempotent() {
        let mut node = NodeState::new(1);
        node.begin_request([2]).unwrap();
        node.handle_reply(1, 2);
        node.begin_entering().unwrap();
        node.enter_cs().unwrap();

        let first = node.exit_cs();
        let second = node.exit_cs();
        assert!(second.is_empty());
        assert_eq!(first.len(), 0);
    }

    #[test]
    fn deferred_peers_are_answered_on_exit() {
        let mut node = NodeState::new(1);
        node.begin_request([2, 3]).unwrap();
        node.my_request_ts = Some(1);

        // peer 4 (not even a configured peer here, just an id) defers
        node.handle_request(100, 4);
        assert!(node.deferred.contains(&4));

        node.handle_reply(1, 2);
        node.handle_reply(1, 3);
        node.begin_entering().unwrap();
        node.enter_cs().unwrap();

        let drained = node.exit_cs();
        assert_eq!(drained, vec![4]);
        assert!(node.deferred.is_empty());
    }

    #[test]
    fn unreachable_peer_counts_as_implicit_reply() {
        let mut node = NodeState::new(1);
        node.begin_request([2, 3]).unwrap();
        assert!(!node.apply_reply_outcome(2, ReplyOutcome::Unreachable));
        assert!(node.apply_reply_outcome(3, ReplyOutcome::Received));
    }

    #[test]
    fn request_while_already_requesting_is_rejected() {
        let mut node = NodeState::new(1);
        node.begin_request([2]).unwrap();
        assert!(node.begin_request([2]).is_err());
    }

    #[test]
    fn peer_ids_helper_builds_expected_set() {
        assert_eq!(peers(&[1, 2]), BTreeSet::from([1, 2]));
    }
}
