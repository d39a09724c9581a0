use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::NodeError;
use crate::identifier::Identifier;

/// The record persisted under a key: the opaque value, the node that
/// originally published it, and the wall-clock instant this node last
/// accepted it. This is what crosses the storage boundary as JSON; the
/// storage layer itself only ever sees the encoded string.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Record {
    pub value: String,
    pub publisher: Identifier,
    pub timestamp: u64,
}

impl Record {
    pub fn new(value: String, publisher: Identifier) -> Self {
        Record {
            value,
            publisher,
            timestamp: now_unix(),
        }
    }

    pub fn age_secs(&self) -> u64 {
        now_unix().saturating_sub(self.timestamp)
    }

    pub fn encode(&self) -> Result<String, NodeError> {
        serde_json::to_string(self).map_err(|e| NodeError::Internal(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, NodeError> {
        serde_json::from_str(raw).map_err(|e| NodeError::Internal(e.to_string()))
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single event from a storage scan stream.
pub enum ScanEvent {
    Data(Identifier, String),
    Error(String),
    End,
}

/// Pluggable persistence backing local records. The node only ever reads
/// and writes opaque strings here; `Record` encode/decode happens at the
/// node boundary, not in the storage layer.
pub trait Storage: Send + Sync {
    fn get(&self, key: &Identifier) -> Result<String, NodeError>;
    fn put(&self, key: Identifier, raw: String) -> Result<(), NodeError>;
    fn del(&self, key: &Identifier) -> Result<(), NodeError>;

    /// Starts a fresh, independent scan over every stored entry. The
    /// returned stream is pushed to completion on a background thread and
    /// may be opened multiple times concurrently.
    fn scan(&self) -> Receiver<ScanEvent>;
}

/// A simple in-process `Storage` backed by a `HashMap`, grounded in the
/// teacher's original storage container. Expiry is not performed here: the
/// node's maintenance scheduler owns the expire pass, scanning and
/// deleting through this same trait.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<Identifier, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            items: Mutex::new(HashMap::new()),
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &Identifier) -> Result<String, NodeError> {
        let items = self.items.lock().unwrap();
        items.get(key).cloned().ok_or(NodeError::NotFound)
    }

    fn put(&self, key: Identifier, raw: String) -> Result<(), NodeError> {
        let mut items = self.items.lock().unwrap();
        items.insert(key, raw);
        Ok(())
    }

    fn del(&self, key: &Identifier) -> Result<(), NodeError> {
        let mut items = self.items.lock().unwrap();
        items.remove(key);
        Ok(())
    }

    fn scan(&self) -> Receiver<ScanEvent> {
        let snapshot: Vec<(Identifier, String)> = {
            let items = self.items.lock().unwrap();
            items.iter().map(|(k, v)| (*k, v.clone())).collect()
        };
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (key, value) in snapshot {
                if tx.send(ScanEvent::Data(key, value)).is_err() {
                    return;
                }
            }
            let _ = tx.send(ScanEvent::End);
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let storage = MemoryStorage::new();
        let key = Identifier::rand();
        storage.put(key, "boop".to_string()).unwrap();
        assert_eq!(storage.get(&key).unwrap(), "boop");
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let storage = MemoryStorage::new();
        match storage.get(&Identifier::rand()) {
            Err(NodeError::NotFound) => {},
            other => panic!("expected NotFound, got {:?}", other.err().map(|e| e.to_string())),
        }
    }

    #[test]
    fn scan_is_reopenable() {
        let storage = MemoryStorage::new();
        storage.put(Identifier::rand(), "a".to_string()).unwrap();
        storage.put(Identifier::rand(), "b".to_string()).unwrap();

        for _ in 0..2 {
            let rx = storage.scan();
            let mut count = 0;
            for event in rx.iter() {
                match event {
                    ScanEvent::Data(..) => count += 1,
                    ScanEvent::End => break,
                    ScanEvent::Error(e) => panic!("unexpected scan error: {}", e),
                }
            }
            assert_eq!(count, 2);
        }
    }

    #[test]
    fn record_encode_decode_round_trips() {
        let record = Record::new("boop".to_string(), Identifier::rand());
        let encoded = record.encode().unwrap();
        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded.value, "boop");
        assert_eq!(decoded.publisher, record.publisher);
    }
}
