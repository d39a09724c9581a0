use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::contact::Contact;
use crate::error::NodeError;
use crate::identifier::Identifier;
use crate::lookup::{Lookup, LookupMode, LookupOutcome};
use crate::routing::{AddOutcome, RoutingTable};
use crate::rpc::{PendingRequests, RpcClient};
use crate::storage::{MemoryStorage, Record, ScanEvent, Storage};
use crate::transport::{
    Message, Request, RequestPayload, Response, ResponsePayload, Transport, UdpTransport,
};
use crate::validator::Validator;
use crate::{
    BUCKET_REFRESH_INTERVAL, CONCURRENCY_PARAM, LOOKUP_TIMEOUT_MS, REPLICATION_PARAM,
    REQUEST_TIMEOUT_MS, ROUTING_TABLE_SIZE, T_EXPIRE_SECS, T_REPLICATE_SECS, T_REPUBLISH_SECS,
};

/// Everything needed to construct a `Node` with explicit collaborators, for
/// production wiring or tests that stub the transport/storage/validator.
pub struct NodeConfig {
    pub self_contact: Contact,
    pub storage: Arc<dyn Storage>,
    pub transport: Arc<dyn Transport>,
    pub inbound: Receiver<Message>,
    pub validator: Option<Arc<dyn Validator>>,
    pub bootstrap: Option<Contact>,
}

/// Aggregate outcome of a `put`'s STORE fan-out: success does not require
/// unanimity among the `K` target contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutSummary {
    pub attempted: usize,
    pub accepted: usize,
}

/// A node in the Kademlia DHT: owns the routing table, the storage handle,
/// the RPC correlation table, and the maintenance scheduler. All fields
/// are cheaply-cloneable handles so background threads can hold their own
/// `Node` without borrowing.
#[derive(Clone)]
pub struct Node {
    self_contact: Contact,
    routing_table: Arc<Mutex<RoutingTable>>,
    storage: Arc<dyn Storage>,
    rpc: Arc<RpcClient>,
    pending: Arc<PendingRequests>,
    validator: Option<Arc<dyn Validator>>,
    is_active: Arc<AtomicBool>,
}

impl Node {
    /// Constructs a node bound to `address:port` over the default UDP
    /// transport and in-memory storage, bootstrapping its routing table
    /// from `bootstrap` if given. `node_id`, when absent, is derived from
    /// the bound address (spec's "Open question: nodeID derivation" —
    /// convenient for tests, weak against address reuse in production).
    pub fn new(address: &str, port: u16, bootstrap: Option<Contact>) -> Self {
        let socket =
            UdpSocket::bind((address, port)).expect("Node: could not bind to address");
        let local_addr = socket.local_addr().expect("bound socket has a local address");
        let node_id = Identifier::from_seed(local_addr.to_string().as_bytes());
        let self_contact = Contact::new(local_addr.ip().to_string(), local_addr.port(), node_id);

        let (tx, rx) = channel();
        let transport = Arc::new(UdpTransport::new(socket, tx));

        let node = Node::with_config(NodeConfig {
            self_contact,
            storage: Arc::new(MemoryStorage::new()),
            transport,
            inbound: rx,
            validator: None,
            bootstrap: bootstrap.clone(),
        });

        if let Some(seed) = bootstrap {
            let _ = node.join(seed);
        }
        node
    }

    /// Constructs a node from explicit collaborators.
    pub fn with_config(config: NodeConfig) -> Self {
        let mut routing_table = RoutingTable::new(config.self_contact.id);
        if let Some(bootstrap) = config.bootstrap {
            // Direct insert: the liveness-ping eviction protocol is only
            // meaningful once the table is populated, and constructing the
            // RPC client to run it here would be circular.
            routing_table.add(bootstrap);
        }

        let pending = Arc::new(PendingRequests::new());
        let rpc = Arc::new(RpcClient::new(
            Arc::clone(&config.transport),
            Arc::clone(&pending),
            config.self_contact.clone(),
            Duration::from_millis(REQUEST_TIMEOUT_MS),
        ));

        let node = Node {
            self_contact: config.self_contact,
            routing_table: Arc::new(Mutex::new(routing_table)),
            storage: config.storage,
            rpc,
            pending,
            validator: config.validator,
            is_active: Arc::new(AtomicBool::new(true)),
        };

        node.start_message_handler(config.inbound);
        node.start_maintenance_scheduler();
        node
    }

    pub fn contact(&self) -> Contact {
        self.self_contact.clone()
    }

    pub fn id(&self) -> Identifier {
        self.self_contact.id
    }

    /// Stops the node's background threads. In-flight RPCs awaiting a
    /// response will time out normally.
    pub fn shutdown(&self) {
        self.is_active.store(false, Ordering::Release);
    }

    // ---- inbound message dispatch --------------------------------------

    fn start_message_handler(&self, rx: Receiver<Message>) {
        let node = self.clone();
        thread::spawn(move || {
            for message in rx.iter() {
                if !node.is_active.load(Ordering::Acquire) {
                    break;
                }
                match message {
                    Message::Request(request) => node.handle_request(request),
                    Message::Response(response) => node.handle_response(response),
                    Message::Shutdown => break,
                }
            }
        });
    }

    /// The key liveness protocol (spec 4.2): try a direct add; if the
    /// target bucket is full, PING its head and either refresh it (head is
    /// alive: discard the newcomer) or evict it (head is dead: admit the
    /// newcomer). Runs on a background thread since it may block on an RPC
    /// round-trip.
    fn observe(&self, contact: Contact) {
        let node = self.clone();
        thread::spawn(move || {
            let outcome = {
                let mut routing_table = node.routing_table.lock().unwrap();
                routing_table.add(contact.clone())
            };
            if let AddOutcome::Full(head) = outcome {
                match node.rpc.request(&head, RequestPayload::Ping) {
                    Ok(_) => {
                        let mut routing_table = node.routing_table.lock().unwrap();
                        routing_table.add(head);
                    },
                    Err(_) => {
                        let mut routing_table = node.routing_table.lock().unwrap();
                        routing_table.evict_and_add(&head.id, contact);
                    },
                }
            }
        });
    }

    fn handle_request(&self, request: Request) {
        debug!(
            "{} - request from {}: {:?}",
            self.self_contact.addr(),
            request.sender.addr(),
            request.payload
        );
        self.observe(request.sender.clone());

        let payload = match request.payload {
            RequestPayload::Ping => ResponsePayload::Pong,
            RequestPayload::Store(key, value) => {
                if value.is_empty() {
                    ResponsePayload::Stored { accepted: false }
                } else {
                    let accepted = match &self.validator {
                        Some(validator) => validator.validate(&key, &value),
                        None => true,
                    };
                    if accepted {
                        let record = Record::new(value, request.sender.id);
                        match record.encode().and_then(|raw| self.storage.put(key, raw)) {
                            Ok(()) => ResponsePayload::Stored { accepted: true },
                            Err(e) => {
                                warn!("Node: failed to store {:?}: {}", key, e);
                                ResponsePayload::Stored { accepted: false }
                            },
                        }
                    } else {
                        ResponsePayload::Stored { accepted: false }
                    }
                }
            },
            RequestPayload::FindNode(key) => {
                let closest = self.routing_table.lock().unwrap().closest(&key, REPLICATION_PARAM);
                ResponsePayload::Nodes(closest)
            },
            RequestPayload::FindValue(key) => match self.storage.get(&key).and_then(|raw| Record::decode(&raw)) {
                Ok(record) => ResponsePayload::Value(record.value),
                Err(_) => {
                    let closest = self.routing_table.lock().unwrap().closest(&key, REPLICATION_PARAM);
                    ResponsePayload::Nodes(closest)
                },
            },
        };

        self.rpc.reply(&request.sender, request.id, payload);
    }

    fn handle_response(&self, response: Response) {
        self.observe(response.receiver.clone());
        if !self.pending.complete(response) {
            warn!(
                "{} - response did not match a pending request; ignoring.",
                self.self_contact.addr()
            );
        }
    }

    // ---- lookup ----------------------------------------------------------

    fn lookup(&self, target: Identifier, mode: LookupMode) -> LookupOutcome {
        let lookup = Lookup::new(
            target,
            mode,
            self.self_contact.clone(),
            Arc::clone(&self.routing_table),
            Arc::clone(&self.rpc),
            CONCURRENCY_PARAM,
            Duration::from_millis(LOOKUP_TIMEOUT_MS),
        );
        lookup.run()
    }

    // ---- public API --------------------------------------------------

    /// Inserts `seed_contact` into the routing table, looks up self's own
    /// id to populate the nearest buckets, then refreshes every
    /// non-empty bucket farther from self than the closest neighbor found.
    pub fn join(&self, seed_contact: Contact) -> Result<(), NodeError> {
        {
            let mut routing_table = self.routing_table.lock().unwrap();
            routing_table.add(seed_contact);
        }

        let neighbors = match self.lookup(self.self_contact.id, LookupMode::Nodes) {
            LookupOutcome::Nodes(nodes) => nodes,
            _ => Vec::new(),
        };

        let closest_index = neighbors
            .first()
            .and_then(|c| self.self_contact.id.bucket_index(&c.id))
            .unwrap_or(0);

        // Bucket index is the XOR-distance leading-zero count, so a higher
        // index is closer to self. "Farther than the closest neighbor"
        // means every bucket below `closest_index`, which the self-lookup
        // above cannot itself have populated.
        for index in 0..closest_index {
            let has_neighbors = self.routing_table.lock().unwrap().bucket_len(index) > 0;
            if has_neighbors {
                let target = Identifier::rand_in_bucket_range(index);
                self.lookup(target, LookupMode::Nodes);
            }
        }

        Ok(())
    }

    /// Inserts a key/value pair into the DHT: looks up the `K` contacts
    /// closest to the derived key and issues `STORE` to each in parallel.
    pub fn put(&self, key_seed: &[u8], value: &str) -> Result<PutSummary, NodeError> {
        if value.is_empty() {
            return Err(NodeError::InvalidInput("value must not be empty".to_string()));
        }
        let key = Identifier::from_seed(key_seed);
        if let Some(validator) = &self.validator {
            if !validator.validate(&key, value) {
                return Err(NodeError::InvalidValue);
            }
        }
        Ok(self.store_to_closest(key, value.to_string()))
    }

    /// Looks up the value for the derived key: a local hit short-circuits
    /// without starting a lookup.
    pub fn get(&self, key_seed: &[u8]) -> Result<String, NodeError> {
        let key = Identifier::from_seed(key_seed);
        if let Ok(raw) = self.storage.get(&key) {
            return Record::decode(&raw).map(|record| record.value);
        }

        match self.lookup(key, LookupMode::Value) {
            LookupOutcome::Value(value) => Ok(value),
            LookupOutcome::NotFound(_) | LookupOutcome::Nodes(_) => Err(NodeError::NotFound),
        }
    }

    fn store_to_closest(&self, key: Identifier, value: String) -> PutSummary {
        let contacts = match self.lookup(key, LookupMode::Nodes) {
            LookupOutcome::Nodes(contacts) => contacts,
            _ => Vec::new(),
        };
        let attempted = contacts.len();
        if attempted == 0 {
            return PutSummary { attempted: 0, accepted: 0 };
        }

        let (tx, rx) = channel();
        for contact in contacts {
            let rpc = Arc::clone(&self.rpc);
            let value = value.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let accepted = rpc
                    .request(&contact, RequestPayload::Store(key, value))
                    .map(|response| matches!(response.payload, ResponsePayload::Stored { accepted: true }))
                    .unwrap_or(false);
                let _ = tx.send(accepted);
            });
        }
        drop(tx);

        let accepted = rx.iter().filter(|ok| *ok).count();
        PutSummary { attempted, accepted }
    }

    // ---- maintenance scheduler -----------------------------------------

    fn start_maintenance_scheduler(&self) {
        let node = self.clone();
        thread::spawn(move || {
            let mut since_replicate = Duration::from_secs(0);
            let mut since_expire = Duration::from_secs(0);
            let tick = Duration::from_secs(1);

            while node.is_active.load(Ordering::Acquire) {
                thread::sleep(tick);
                since_replicate += tick;
                since_expire += tick;

                if since_replicate >= Duration::from_secs(T_REPLICATE_SECS) {
                    since_replicate = Duration::from_secs(0);
                    node.replicate_pass();
                }
                if since_expire >= Duration::from_secs(T_EXPIRE_SECS) {
                    since_expire = Duration::from_secs(0);
                    node.expire_pass();
                }
            }
        });

        let node = self.clone();
        thread::spawn(move || {
            while node.is_active.load(Ordering::Acquire) {
                thread::sleep(Duration::from_secs(BUCKET_REFRESH_INTERVAL));
                let stale = node.routing_table.lock().unwrap().stale_bucket_indexes();
                for index in stale {
                    node.lookup(Identifier::rand_in_bucket_range(index), LookupMode::Nodes);
                }
            }
        });
    }

    /// Re-publishes every record (self-published or not) whose age has
    /// reached `T_REPUBLISH_SECS`, so the current `K` closest nodes keep
    /// holding it. A failure on any single record is logged and does not
    /// abort the pass.
    fn replicate_pass(&self) {
        for event in self.storage.scan().iter() {
            match event {
                ScanEvent::Data(key, raw) => match Record::decode(&raw) {
                    Ok(record) if record.age_secs() >= T_REPUBLISH_SECS => {
                        self.store_to_closest(key, record.value);
                    },
                    Ok(_) => {},
                    Err(e) => warn!("Node: replicate pass could not decode {:?}: {}", key, e),
                },
                ScanEvent::Error(e) => warn!("Node: replicate scan error: {}", e),
                ScanEvent::End => break,
            }
        }
    }

    /// Deletes every record strictly older than `T_EXPIRE_SECS`.
    fn expire_pass(&self) {
        for event in self.storage.scan().iter() {
            match event {
                ScanEvent::Data(key, raw) => match Record::decode(&raw) {
                    Ok(record) if record.age_secs() > T_EXPIRE_SECS => {
                        if let Err(e) = self.storage.del(&key) {
                            warn!("Node: failed to expire {:?}: {}", key, e);
                        }
                    },
                    Ok(_) => {},
                    Err(e) => warn!("Node: expire pass could not decode {:?}: {}", key, e),
                },
                ScanEvent::Error(e) => warn!("Node: expire scan error: {}", e),
                ScanEvent::End => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{AcceptAll, RejectAll};
    use std::sync::Mutex as StdMutex;

    struct NullTransport {
        sent: StdMutex<Vec<(Contact, Message)>>,
    }

    impl NullTransport {
        fn new() -> Self {
            NullTransport { sent: StdMutex::new(Vec::new()) }
        }
    }

    impl Transport for NullTransport {
        fn send(&self, to: &Contact, message: Message) -> Result<(), String> {
            self.sent.lock().unwrap().push((to.clone(), message));
            Ok(())
        }
    }

    fn test_node(validator: Option<Arc<dyn Validator>>) -> (Node, Arc<NullTransport>) {
        let transport = Arc::new(NullTransport::new());
        let (_tx, rx) = channel();
        let self_contact = Contact::new("127.0.0.1".into(), 9000, Identifier::rand());
        let node = Node::with_config(NodeConfig {
            self_contact,
            storage: Arc::new(MemoryStorage::new()),
            transport: transport.clone() as Arc<dyn Transport>,
            inbound: rx,
            validator,
            bootstrap: None,
        });
        (node, transport)
    }

    #[test]
    fn ping_handler_replies_with_matching_id() {
        let (node, transport) = test_node(None);
        let sender = Contact::new("127.0.0.1".into(), 9100, Identifier::rand());
        let request = Request {
            id: Identifier::rand(),
            sender: sender.clone(),
            payload: RequestPayload::Ping,
        };
        node.handle_request(request.clone());

        let sent = transport.sent.lock().unwrap();
        let (to, message) = sent.last().expect("a response was sent");
        assert_eq!(to.id, sender.id);
        match message {
            Message::Response(response) => {
                assert_eq!(response.request_id, request.id);
                assert!(matches!(response.payload, ResponsePayload::Pong));
            },
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[test]
    fn store_rejected_by_validator_never_touches_storage() {
        let (node, _transport) = test_node(Some(Arc::new(RejectAll)));
        let sender = Contact::new("127.0.0.1".into(), 9100, Identifier::rand());
        let key = Identifier::rand();
        node.handle_request(Request {
            id: Identifier::rand(),
            sender,
            payload: RequestPayload::Store(key, "value".to_string()),
        });

        assert!(matches!(node.storage.get(&key), Err(NodeError::NotFound)));
    }

    #[test]
    fn store_accepted_by_validator_is_persisted() {
        let (node, _transport) = test_node(Some(Arc::new(AcceptAll)));
        let sender = Contact::new("127.0.0.1".into(), 9100, Identifier::rand());
        let key = Identifier::rand();
        node.handle_request(Request {
            id: Identifier::rand(),
            sender: sender.clone(),
            payload: RequestPayload::Store(key, "value".to_string()),
        });

        let record = Record::decode(&node.storage.get(&key).unwrap()).unwrap();
        assert_eq!(record.value, "value");
        assert_eq!(record.publisher, sender.id);
    }

    #[test]
    fn find_value_miss_replies_with_nodes_list() {
        let (node, transport) = test_node(None);
        let sender = Contact::new("127.0.0.1".into(), 9100, Identifier::rand());
        node.handle_request(Request {
            id: Identifier::rand(),
            sender,
            payload: RequestPayload::FindValue(Identifier::rand()),
        });

        let sent = transport.sent.lock().unwrap();
        match &sent.last().unwrap().1 {
            Message::Response(response) => {
                assert!(matches!(response.payload, ResponsePayload::Nodes(_)));
            },
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[test]
    fn get_short_circuits_on_local_hit() {
        let (node, _transport) = test_node(None);
        let key = Identifier::from_seed(b"beep");
        let record = Record::new("boop".to_string(), node.id());
        node.storage.put(key, record.encode().unwrap()).unwrap();

        assert_eq!(node.get(b"beep").unwrap(), "boop");
    }

    #[test]
    fn replicate_pass_republishes_due_foreign_record() {
        let (node, _transport) = test_node(None);
        let key = Identifier::rand();
        let mut record = Record::new("value".to_string(), Identifier::rand());
        record.timestamp = record.timestamp.saturating_sub(T_REPUBLISH_SECS);
        node.storage.put(key, record.encode().unwrap()).unwrap();

        // No peers are reachable, so the re-publish lookup finds nothing
        // and store_to_closest is a no-op; this only exercises that the
        // pass decodes and evaluates the due record without panicking.
        node.replicate_pass();
    }

    #[test]
    fn expire_pass_deletes_only_strictly_older_records() {
        let (node, _transport) = test_node(None);
        let fresh_key = Identifier::rand();
        let fresh = Record::new("fresh".to_string(), node.id());
        node.storage.put(fresh_key, fresh.encode().unwrap()).unwrap();

        let stale_key = Identifier::rand();
        let mut stale = Record::new("stale".to_string(), node.id());
        stale.timestamp = stale.timestamp.saturating_sub(T_EXPIRE_SECS + 1);
        node.storage.put(stale_key, stale.encode().unwrap()).unwrap();

        node.expire_pass();

        assert!(node.storage.get(&fresh_key).is_ok());
        assert!(matches!(node.storage.get(&stale_key), Err(NodeError::NotFound)));
    }

    #[test]
    fn put_then_get_round_trips_across_two_bootstrapped_nodes() {
        let seed = Node::new("127.0.0.1", 0, None);
        let node = Node::new("127.0.0.1", 0, Some(seed.contact()));

        let summary = node.put(b"beep", "boop").expect("put should succeed");
        assert!(summary.accepted >= 1);
        assert_eq!(seed.get(b"beep").unwrap(), "boop");

        node.shutdown();
        seed.shutdown();
    }

    #[test]
    fn put_rejects_empty_value() {
        let (node, _transport) = test_node(None);
        assert!(matches!(node.put(b"beep", ""), Err(NodeError::InvalidInput(_))));
    }
}
