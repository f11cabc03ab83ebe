//! Totally-ordered sequence identifiers attributed to consensus slots.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::view::Host;

/// A sequence number attributed to a consensus slot.
///
/// Unlike a plain monotonic counter, `SeqN` pairs the counter with the
/// `Host` that stamped it, so that two replicas racing to propose at the
/// same counter value still produce distinct, comparable identifiers.
/// Ordering is lexicographic: `counter` first, `node` as the tiebreaker.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqN {
    counter: u32,
    node: Host,
}

impl SeqN {
    /// Returns the initial sequence number for a freshly bootstrapped
    /// replica: counter zero, stamped by `node`.
    pub fn zero(node: Host) -> Self {
        Self { counter: 0, node }
    }

    /// Builds a `SeqN` out of its raw parts.
    pub fn new(counter: u32, node: Host) -> Self {
        Self { counter, node }
    }

    /// The counter component.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The node that stamped this sequence number.
    pub fn node(&self) -> Host {
        self.node
    }

    /// Returns the following sequence number, stamped by `node`.
    #[must_use]
    pub fn increment(&self, node: Host) -> Self {
        Self {
            counter: self.counter.wrapping_add(1),
            node,
        }
    }
}

impl PartialOrd for SeqN {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeqN {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.node.cmp(&other.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn host(port: u16) -> Host {
        Host::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn orders_by_counter_then_node() {
        let a = SeqN::new(1, host(10));
        let b = SeqN::new(1, host(11));
        let c = SeqN::new(2, host(10));
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn increment_advances_counter_and_restamps_node() {
        let n = SeqN::zero(host(10));
        let next = n.increment(host(11));
        assert_eq!(next.counter(), 1);
        assert_eq!(next.node(), host(11));
    }

    #[test]
    fn increment_is_monotonic() {
        let leader = host(10);
        let n0 = SeqN::zero(leader);
        let n1 = n0.increment(leader);
        let n2 = n1.increment(leader);
        assert!(n0 < n1);
        assert!(n1 < n2);
    }
}
