//! Lamport-style logical clock carried by every log entry.
//!
//! The clock identifies its author by public key and orders concurrent
//! writes. Monotonicity within a log is the log's responsibility; entries
//! merely carry the clock they were created with.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A logical clock `{id, time}` where `id` is the hex form of the author's
/// public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LamportClock {
    /// Public key of the author, hex encoded.
    pub id: String,
    /// Logical time, starting at 0.
    pub time: u64,
}

impl LamportClock {
    /// Create a clock at the given time.
    pub fn new(id: impl Into<String>, time: u64) -> Self {
        Self { id: id.into(), time }
    }

    /// Create a clock at time 0.
    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, 0)
    }

    /// Return a copy advanced by one tick.
    pub fn tick(&self) -> Self {
        Self {
            id: self.id.clone(),
            time: self.time + 1,
        }
    }

    /// Merge with another clock, keeping the maximum time.
    pub fn merge(&self, other: &LamportClock) -> Self {
        Self {
            id: self.id.clone(),
            time: self.time.max(other.time),
        }
    }

    /// Compare two clocks: by time first, author id as tiebreak.
    pub fn compare(a: &LamportClock, b: &LamportClock) -> Ordering {
        a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_advances_time() {
        let clock = LamportClock::start("a");
        assert_eq!(clock.time, 0);
        assert_eq!(clock.tick().time, 1);
        assert_eq!(clock.tick().tick().time, 2);
    }

    #[test]
    fn test_merge_keeps_max() {
        let a = LamportClock::new("a", 3);
        let b = LamportClock::new("b", 7);
        let merged = a.merge(&b);
        assert_eq!(merged.time, 7);
        assert_eq!(merged.id, "a");
    }

    #[test]
    fn test_compare_tiebreaks_on_id() {
        let a = LamportClock::new("a", 5);
        let b = LamportClock::new("b", 5);
        assert_eq!(LamportClock::compare(&a, &b), Ordering::Less);
        assert_eq!(LamportClock::compare(&b, &a), Ordering::Greater);
        assert_eq!(LamportClock::compare(&a, &a), Ordering::Equal);
    }
}
