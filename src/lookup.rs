use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::contact::{Contact, ContactDistancePair};
use crate::identifier::Identifier;
use crate::rpc::RpcClient;
use crate::routing::RoutingTable;
use crate::transport::{RequestPayload, Response, ResponsePayload};
use crate::REPLICATION_PARAM;

/// Which RPC a lookup round issues: `FIND_NODE` for node-discovery
/// lookups, `FIND_VALUE` for value lookups.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LookupMode {
    Nodes,
    Value,
}

#[derive(Debug)]
pub enum LookupOutcome {
    /// The K closest contacts to the target, globally known (nodes mode,
    /// or a value lookup that never found the value).
    Nodes(Vec<Contact>),
    /// The first value returned by any responding contact (value mode).
    Value(String),
    /// A value lookup exhausted its shortlist without finding the value.
    /// Carries the K closest contacts so the caller can STORE to them.
    NotFound(Vec<Contact>),
}

enum LookupEvent {
    Responded(Response),
    Failed,
}

/// Bounds the shortlist to its `k` closest entries (spec's Round step 4:
/// "Truncate the shortlist to its K closest non-failed entries"). Only
/// unqueried candidates ever sit in `queue`, so this never drops a
/// pending or already-responded contact.
fn truncate_shortlist(queue: &mut BinaryHeap<ContactDistancePair>, k: usize) {
    if queue.len() <= k {
        return;
    }
    let mut items: Vec<ContactDistancePair> = std::mem::take(queue).into_iter().collect();
    items.sort_by(|a, b| a.1.cmp(&b.1));
    items.truncate(k);
    *queue = items.into_iter().collect();
}

/// The iterative FIND_NODE/FIND_VALUE state machine (spec's "Shortlist"):
/// unqueried candidates live in `queue`, a candidate moves to `pending`
/// implicitly while its RPC thread is in flight, to `queried` on success,
/// or is dropped on failure/timeout. Parallelism is capped at
/// `CONCURRENCY_PARAM` in-flight RPCs; a total deadline subsumes the
/// per-request RPC timeout.
pub struct Lookup {
    target: Identifier,
    mode: LookupMode,
    self_contact: Contact,
    routing_table: Arc<Mutex<RoutingTable>>,
    rpc: Arc<RpcClient>,
    concurrency: usize,
    deadline: Duration,
}

impl Lookup {
    pub fn new(
        target: Identifier,
        mode: LookupMode,
        self_contact: Contact,
        routing_table: Arc<Mutex<RoutingTable>>,
        rpc: Arc<RpcClient>,
        concurrency: usize,
        deadline: Duration,
    ) -> Self {
        Lookup {
            target,
            mode,
            self_contact,
            routing_table,
            rpc,
            concurrency,
            deadline,
        }
    }

    pub fn run(&self) -> LookupOutcome {
        let start = Instant::now();
        let target = self.target;

        let initial = {
            let routing_table = self.routing_table.lock().unwrap();
            routing_table.closest(&target, REPLICATION_PARAM)
        };

        let mut closest_distance = Identifier::new([0xFFu8; crate::ID_LENGTH]);
        for contact in &initial {
            closest_distance = std::cmp::min(closest_distance, contact.id.distance(&target));
        }

        let mut found: HashSet<Identifier> = initial.iter().map(|c| c.id).collect();
        found.insert(self.self_contact.id);

        let mut queried: HashMap<Identifier, Contact> = HashMap::new();
        // Closest contact that answered with a miss (nodes-only reply) in
        // value mode; the "cache at the closest miss" target on success.
        let mut closest_miss: Option<(Identifier, Contact)> = None;

        let mut queue: BinaryHeap<ContactDistancePair> = initial
            .into_iter()
            .map(|c| {
                let d = c.id.distance(&target);
                ContactDistancePair(c, d)
            })
            .collect();

        let (tx, rx) = channel();
        let mut in_flight = 0usize;

        let spawn_one = |contact: Contact, in_flight: &mut usize| {
            *in_flight += 1;
            let rpc = Arc::clone(&self.rpc);
            let mode = self.mode;
            let tx = tx.clone();
            thread::spawn(move || {
                let payload = match mode {
                    LookupMode::Nodes => RequestPayload::FindNode(target),
                    LookupMode::Value => RequestPayload::FindValue(target),
                };
                let event = match rpc.request(&contact, payload) {
                    Ok(response) => LookupEvent::Responded(response),
                    Err(_) => LookupEvent::Failed,
                };
                let _ = tx.send(event);
            });
        };

        for _ in 0..self.concurrency {
            if let Some(next) = queue.pop() {
                spawn_one(next.0, &mut in_flight);
            }
        }

        // Phase 1: keep rounds going until one completes no closer than
        // `closest_distance`.
        while in_flight > 0 {
            while in_flight < self.concurrency {
                match queue.pop() {
                    Some(next) => spawn_one(next.0, &mut in_flight),
                    None => break,
                }
            }

            let remaining = self.remaining(start);
            if remaining.is_zero() {
                break;
            }
            let event = match rx.recv_timeout(remaining) {
                Ok(event) => event,
                Err(_) => break,
            };
            in_flight -= 1;

            let mut improved = false;
            match event {
                LookupEvent::Responded(response) => {
                    self.routing_table.lock().unwrap().add(response.receiver.clone());
                    queried.insert(response.receiver.id, response.receiver.clone());

                    match response.payload {
                        ResponsePayload::Value(value) => {
                            self.cache_at_closest_miss(&closest_miss, &value);
                            return LookupOutcome::Value(value);
                        },
                        ResponsePayload::Nodes(nodes) => {
                            if self.mode == LookupMode::Value {
                                let distance = response.receiver.id.distance(&target);
                                let is_closer = closest_miss
                                    .as_ref()
                                    .map(|(d, _)| distance < *d)
                                    .unwrap_or(true);
                                if is_closer {
                                    closest_miss = Some((distance, response.receiver.clone()));
                                }
                            }
                            for contact in nodes {
                                if contact.id == self.self_contact.id || found.contains(&contact.id) {
                                    continue;
                                }
                                let distance = contact.id.distance(&target);
                                if distance < closest_distance {
                                    closest_distance = distance;
                                    improved = true;
                                }
                                found.insert(contact.id);
                                queue.push(ContactDistancePair(contact, distance));
                            }
                            truncate_shortlist(&mut queue, REPLICATION_PARAM);
                        },
                        _ => {},
                    }
                },
                LookupEvent::Failed => {},
            }

            if !improved {
                break;
            }
        }

        // Phase 2: drain the remaining shortlist until REPLICATION_PARAM
        // contacts have responded or the shortlist/in-flight set is empty.
        while queried.len() < REPLICATION_PARAM {
            while in_flight < self.concurrency {
                match queue.pop() {
                    Some(next) => spawn_one(next.0, &mut in_flight),
                    None => break,
                }
            }
            if in_flight == 0 {
                break;
            }

            let remaining = self.remaining(start);
            if remaining.is_zero() {
                break;
            }
            let event = match rx.recv_timeout(remaining) {
                Ok(event) => event,
                Err(_) => break,
            };
            in_flight -= 1;

            match event {
                LookupEvent::Responded(response) => {
                    self.routing_table.lock().unwrap().add(response.receiver.clone());
                    queried.insert(response.receiver.id, response.receiver.clone());

                    match response.payload {
                        ResponsePayload::Value(value) => {
                            self.cache_at_closest_miss(&closest_miss, &value);
                            return LookupOutcome::Value(value);
                        },
                        ResponsePayload::Nodes(nodes) => {
                            for contact in nodes {
                                if contact.id == self.self_contact.id || found.contains(&contact.id) {
                                    continue;
                                }
                                found.insert(contact.id);
                                let distance = contact.id.distance(&target);
                                queue.push(ContactDistancePair(contact, distance));
                            }
                            truncate_shortlist(&mut queue, REPLICATION_PARAM);
                        },
                        _ => {},
                    }
                },
                LookupEvent::Failed => {},
            }
        }

        let mut closest: Vec<Contact> = queried.into_values().collect();
        closest.sort_by_key(|c| c.id.distance(&target));
        closest.truncate(REPLICATION_PARAM);

        match self.mode {
            LookupMode::Nodes => LookupOutcome::Nodes(closest),
            LookupMode::Value => LookupOutcome::NotFound(closest),
        }
    }

    fn remaining(&self, start: Instant) -> Duration {
        self.deadline.saturating_sub(start.elapsed())
    }

    fn cache_at_closest_miss(&self, closest_miss: &Option<(Identifier, Contact)>, value: &str) {
        if let Some((_, contact)) = closest_miss {
            let _ = self
                .rpc
                .request(contact, RequestPayload::Store(self.target, value.to_string()));
        }
    }
}
