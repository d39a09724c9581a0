use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Instant;

use crate::identifier::Identifier;

/// A routable peer descriptor: `{address, port, nodeID, lastSeen}`.
///
/// Identity is by `id` alone; `last_seen` is mutable liveness metadata and
/// is intentionally excluded from `PartialEq`/`Hash` so that two
/// observations of the same peer at different times still compare equal.
#[derive(Clone, Serialize, Deserialize)]
pub struct Contact {
    pub address: String,
    pub port: u16,
    pub id: Identifier,
    #[serde(skip, default = "Instant::now")]
    pub last_seen: Instant,
}

impl Contact {
    pub fn new(address: String, port: u16, id: Identifier) -> Self {
        Contact {
            address,
            port,
            id,
            last_seen: Instant::now(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Contact) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl std::hash::Hash for Contact {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{} - {:?}", self.addr(), self.id)
    }
}

/// Pairs a contact with its precomputed XOR distance to some target, so a
/// `BinaryHeap` can be used as a closest-first priority queue (the heap is
/// a max-heap, so ordering is reversed on the distance).
#[derive(Eq, Clone, Debug)]
pub struct ContactDistancePair(pub Contact, pub Identifier);

impl PartialEq for ContactDistancePair {
    fn eq(&self, other: &ContactDistancePair) -> bool {
        self.0.eq(&other.0)
    }
}

impl PartialOrd for ContactDistancePair {
    fn partial_cmp(&self, other: &ContactDistancePair) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContactDistancePair {
    fn cmp(&self, other: &ContactDistancePair) -> Ordering {
        other.1.cmp(&self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_id_only() {
        let id = Identifier::rand();
        let a = Contact::new("127.0.0.1".into(), 8000, id);
        let b = Contact::new("127.0.0.1".into(), 9000, id);
        assert_eq!(a, b);
    }
}
