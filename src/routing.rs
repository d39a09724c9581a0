use std::time::{Duration, Instant};

use crate::contact::Contact;
use crate::identifier::Identifier;
use crate::{BUCKET_REFRESH_INTERVAL, REPLICATION_PARAM, ROUTING_TABLE_SIZE};

/// Result of offering a contact to a `Bucket`.
#[derive(Debug, Clone)]
pub enum AddOutcome {
    /// The contact was already present; it was moved to the tail and its
    /// liveness timestamp refreshed.
    Updated,
    /// The bucket had room; the contact was appended to the tail.
    Added,
    /// The bucket is at capacity and the contact is not already present.
    /// Carries the head (least-recently-seen) contact, the eviction
    /// candidate the caller must PING before evicting it.
    Full(Contact),
}

/// A k-bucket: an ordered sequence of at most `REPLICATION_PARAM` contacts,
/// oldest-seen at the head and most-recently-seen at the tail.
///
/// Invariants: no duplicate node ids; `len() <= REPLICATION_PARAM`; order
/// reflects ascending `last_seen`.
#[derive(Clone, Debug)]
struct Bucket {
    contacts: Vec<Contact>,
    last_update_time: Instant,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            contacts: Vec::new(),
            last_update_time: Instant::now(),
        }
    }

    fn add(&mut self, contact: Contact) -> AddOutcome {
        self.last_update_time = Instant::now();
        if let Some(index) = self.contacts.iter().position(|c| c.id == contact.id) {
            let mut updated = self.contacts.remove(index);
            updated.last_seen = contact.last_seen;
            self.contacts.push(updated);
            return AddOutcome::Updated;
        }

        if self.contacts.len() < REPLICATION_PARAM {
            self.contacts.push(contact);
            return AddOutcome::Added;
        }

        AddOutcome::Full(self.contacts[0].clone())
    }

    /// Evicts `old_id` (expected to be the current head) and appends
    /// `new_contact` to the tail. No-op on `new_contact` insertion if
    /// `old_id` is not present.
    fn evict_and_add(&mut self, old_id: &Identifier, new_contact: Contact) {
        if let Some(index) = self.contacts.iter().position(|c| c.id == *old_id) {
            self.contacts.remove(index);
        }
        self.contacts.push(new_contact);
    }

    fn remove(&mut self, id: &Identifier) -> Option<Contact> {
        self.contacts
            .iter()
            .position(|c| c.id == *id)
            .map(|index| self.contacts.remove(index))
    }

    fn has(&self, id: &Identifier) -> bool {
        self.contacts.iter().any(|c| c.id == *id)
    }

    fn head(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    #[allow(dead_code)]
    fn tail(&self) -> Option<&Contact> {
        self.contacts.last()
    }

    fn is_full(&self) -> bool {
        self.contacts.len() == REPLICATION_PARAM
    }

    fn is_stale(&self) -> bool {
        self.last_update_time.elapsed() > Duration::from_secs(BUCKET_REFRESH_INTERVAL)
    }

    fn len(&self) -> usize {
        self.contacts.len()
    }
}

/// A node's routing table: a fixed array of `ROUTING_TABLE_SIZE` buckets,
/// indexed directly by the XOR-distance leading-zero count (equivalently,
/// `B - 1 - floor(log2(distance))`).
#[derive(Clone, Debug)]
pub struct RoutingTable {
    buckets: Vec<Bucket>,
    self_id: Identifier,
}

impl RoutingTable {
    pub fn new(self_id: Identifier) -> Self {
        RoutingTable {
            buckets: (0..ROUTING_TABLE_SIZE).map(|_| Bucket::new()).collect(),
            self_id,
        }
    }

    fn index_for(&self, id: &Identifier) -> Option<usize> {
        self.self_id.bucket_index(id)
    }

    /// Offers `contact` to its bucket. Self (`bucket_index` is `None`) is
    /// never stored and yields `Updated` as a no-op signal.
    pub fn add(&mut self, contact: Contact) -> AddOutcome {
        match self.index_for(&contact.id) {
            None => AddOutcome::Updated,
            Some(index) => self.buckets[index].add(contact),
        }
    }

    /// Completes the "oldest reliable wins" eviction protocol for the
    /// bucket holding `new_contact`'s would-be slot: removes `old_id` and
    /// inserts `new_contact`. Called after a PING to the head has timed
    /// out.
    pub fn evict_and_add(&mut self, old_id: &Identifier, new_contact: Contact) {
        if let Some(index) = self.index_for(&new_contact.id) {
            self.buckets[index].evict_and_add(old_id, new_contact);
        }
    }

    pub fn remove(&mut self, id: &Identifier) {
        if let Some(index) = self.index_for(id) {
            self.buckets[index].remove(id);
        }
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        match self.index_for(id) {
            Some(index) => self.buckets[index].has(id),
            None => false,
        }
    }

    pub fn bucket_head(&self, id: &Identifier) -> Option<Contact> {
        self.index_for(id)
            .and_then(|index| self.buckets[index].head().cloned())
    }

    pub fn bucket_is_full(&self, id: &Identifier) -> bool {
        match self.index_for(id) {
            Some(index) => self.buckets[index].is_full(),
            None => false,
        }
    }

    /// Returns the bucket index `id` would occupy, for test assertions.
    pub fn bucket_index_of(&self, id: &Identifier) -> Option<usize> {
        self.index_for(id)
    }

    /// Returns the up-to-`count` contacts closest to `target`, in
    /// nondecreasing XOR-distance order.
    ///
    /// Scans outward from `target`'s own bucket index first (those
    /// contacts are guaranteed closest), then away from self (distance
    /// monotonically increases by bucket in that direction), then toward
    /// self (distance is not monotonic there, so every remaining bucket
    /// must be considered) before the final sort and truncate.
    pub fn closest(&self, target: &Identifier, count: usize) -> Vec<Contact> {
        let index = match self.index_for(target) {
            Some(index) => index,
            None => 0,
        };
        let mut ret = Vec::new();
        ret.extend(self.buckets[index].contacts.iter().cloned());

        if ret.len() < count {
            for bucket in &self.buckets[index + 1..] {
                ret.extend(bucket.contacts.iter().cloned());
            }
        }

        if ret.len() < count {
            for bucket in self.buckets[..index].iter().rev() {
                ret.extend(bucket.contacts.iter().cloned());
                if ret.len() >= count {
                    break;
                }
            }
        }

        ret.sort_by_key(|c| c.id.distance(target));
        ret.truncate(count);
        ret
    }

    pub fn stale_bucket_indexes(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.is_stale())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_len(&self, index: usize) -> usize {
        self.buckets[index].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_with_index(self_id: &Identifier, index: usize) -> Contact {
        let raw = Identifier::rand_in_bucket_range(index);
        let id = self_id.distance(&raw);
        Contact::new("127.0.0.1".into(), 9000, id)
    }

    #[test]
    fn add_then_lookup_lands_in_expected_bucket() {
        let self_id = Identifier::rand();
        let mut table = RoutingTable::new(self_id);
        for i in 0..10 {
            let contact = contact_with_index(&self_id, i);
            table.add(contact.clone());
            assert_eq!(
                table.bucket_index_of(&contact.id),
                self_id.bucket_index(&contact.id)
            );
            assert!(table.contains(&contact.id));
        }
    }

    #[test]
    fn bucket_never_exceeds_capacity_and_ids_unique() {
        let self_id = Identifier::rand();
        let mut table = RoutingTable::new(self_id);
        let index = 5;
        for _ in 0..(REPLICATION_PARAM + 5) {
            let contact = contact_with_index(&self_id, index);
            table.add(contact);
        }
        assert!(table.bucket_len(index) <= REPLICATION_PARAM);
    }

    #[test]
    fn full_bucket_eviction_with_live_head() {
        let self_id = Identifier::rand();
        let mut table = RoutingTable::new(self_id);
        let index = (ROUTING_TABLE_SIZE - 1).min(159);

        let mut contacts = Vec::new();
        for _ in 0..REPLICATION_PARAM {
            let contact = contact_with_index(&self_id, index);
            table.add(contact.clone());
            contacts.push(contact);
        }

        let newcomer = contact_with_index(&self_id, index);
        match table.add(newcomer.clone()) {
            AddOutcome::Full(head) => {
                assert_eq!(head.id, contacts[0].id);
                // head responds to the liveness ping: refresh it instead of evicting.
                table.add(head.clone());
            },
            other => panic!("expected Full outcome, got {:?}", other),
        }

        assert!(!table.contains(&newcomer.id));
        assert_eq!(table.bucket_len(index), REPLICATION_PARAM);
    }

    #[test]
    fn full_bucket_eviction_with_dead_head() {
        let self_id = Identifier::rand();
        let mut table = RoutingTable::new(self_id);
        let index = 100;

        let mut contacts = Vec::new();
        for _ in 0..REPLICATION_PARAM {
            let contact = contact_with_index(&self_id, index);
            table.add(contact.clone());
            contacts.push(contact);
        }

        let newcomer = contact_with_index(&self_id, index);
        match table.add(newcomer.clone()) {
            AddOutcome::Full(head) => {
                assert_eq!(head.id, contacts[0].id);
                table.evict_and_add(&head.id, newcomer.clone());
            },
            other => panic!("expected Full outcome, got {:?}", other),
        }

        assert!(table.contains(&newcomer.id));
        assert!(!table.contains(&contacts[0].id));
    }

    #[test]
    fn closest_returns_nondecreasing_distance() {
        let self_id = Identifier::rand();
        let mut table = RoutingTable::new(self_id);
        for _ in 0..50 {
            table.add(Contact::new("127.0.0.1".into(), 9000, Identifier::rand()));
        }
        let target = Identifier::rand();
        let closest = table.closest(&target, 20);
        for window in closest.windows(2) {
            assert!(window[0].id.distance(&target) <= window[1].id.distance(&target));
        }
    }
}
