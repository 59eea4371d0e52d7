//! Lamport logical clock and the total request-priority order derived from it.
//!
//! See `Time, Clocks, and the Ordering of Events in a Distributed System`
//! (Commun. ACM'78): IR1 increments the clock before a local event, IR2
//! advances it past any received timestamp. Ties across processes are
//! broken by node id, giving a total order over `(timestamp, id)` pairs.

use serde::{Deserialize, Serialize};

/// A node's logical clock. Monotonically non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LamportClock(u64);

impl LamportClock {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// IR1: a local event that needs timestamping increments the clock and
    /// returns the new value.
    pub fn tick(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// IR2: on receiving a message timestamped `received`, advance the clock
    /// to `max(local, received) + 1`. Never decreases the clock.
    pub fn observe(&mut self, received: u64) -> u64 {
        self.0 = self.0.max(received) + 1;
        self.0
    }
}

impl From<u64> for LamportClock {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// The total order used to resolve contention: `(timestamp, node id)`,
/// lexicographic, smaller wins. Equality is impossible in practice since
/// ids are unique, but the derived `Ord` handles it the same way either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority {
    pub timestamp: u64,
    pub node_id: u8,
}

impl Priority {
    pub fn new(timestamp: u64, node_id: u8) -> Self {
        Self { timestamp, node_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tick_increments_by_one() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn observe_takes_max_plus_one() {
        let mut clock = LamportClock::from(3);
        assert_eq!(clock.observe(7), 8);
        // once ahead, a stale received timestamp still advances by one
        assert_eq!(clock.observe(1), 9);
    }

    #[test]
    fn clock_never_decreases() {
        let mut clock = LamportClock::from(10);
        clock.observe(2);
        assert!(clock.value() >= 10);
    }

    #[test]
    fn priority_breaks_ties_by_smaller_id() {
        let a = Priority::new(4, 1);
        let b = Priority::new(4, 2);
        assert!(a < b, "equal timestamp: smaller id wins");
    }

    #[test]
    fn priority_orders_by_timestamp_first() {
        let a = Priority::new(5, 9);
        let b = Priority::new(7, 1);
        assert!(a < b);
    }

    proptest! {
        #[test]
        fn tick_is_always_strictly_increasing(start in 0u64..1_000_000, ticks in 1usize..50) {
            let mut clock = LamportClock::from(start);
            let mut previous = clock.value();
            for _ in 0..ticks {
                let next = clock.tick();
                prop_assert!(next > previous);
                previous = next;
            }
        }

        #[test]
        fn observe_is_always_greater_than_both_inputs(local in 0u64..1_000_000, received in 0u64..1_000_000) {
            let mut clock = LamportClock::from(local);
            let observed = clock.observe(received);
            prop_assert!(observed > local);
            prop_assert!(observed > received);
        }

        #[test]
        fn priority_order_is_total_and_antisymmetric(
            t1 in 0u64..1000, id1 in 0u8..255,
            t2 in 0u64..1000, id2 in 0u8..255,
        ) {
            let a = Priority::new(t1, id1);
            let b = Priority::new(t2, id2);
            // exactly one of <, ==, > holds
            let relations = [a < b, a == b, a > b];
            prop_assert_eq!(relations.iter().filter(|r| **r).count(), 1);
            // antisymmetry
            if a < b {
                prop_assert!(b > a);
            }
        }

        #[test]
        fn priority_order_is_transitive(
            t1 in 0u64..100, id1 in 0u8..255,
            t2 in 0u64..100, id2 in 0u8..255,
            t3 in 0u64..100, id3 in 0u8..255,
        ) {
            let a = Priority::new(t1, id1);
            let b = Priority::new(t2, id2);
            let c = Priority::new(t3, id3);
            if a < b && b < c {
                prop_assert!(a < c);
            }
        }
    }
}
