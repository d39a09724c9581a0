#[macro_use]
extern crate log;

pub mod contact;
pub mod error;
pub mod identifier;
pub mod lookup;
pub mod node;
pub mod routing;
pub mod rpc;
pub mod storage;
pub mod transport;
pub mod validator;

pub use self::contact::Contact;
pub use self::error::NodeError;
pub use self::identifier::Identifier;
pub use self::node::{Node, NodeConfig};

/// Identifier length in bytes; `B = ID_LENGTH * 8` bits (160 by default).
pub const ID_LENGTH: usize = 20;
/// Maximum framed message size in bytes for the default UDP transport.
pub const MESSAGE_LENGTH: usize = 8196;
/// Number of buckets in a routing table: one per possible bit position.
pub const ROUTING_TABLE_SIZE: usize = ID_LENGTH * 8;

/// `K`: bucket capacity and lookup breadth.
pub const REPLICATION_PARAM: usize = 20;
/// `ALPHA`: per-round lookup parallelism.
pub const CONCURRENCY_PARAM: usize = 3;

/// Per-request RPC timeout, in milliseconds.
pub const REQUEST_TIMEOUT_MS: u64 = 5000;
/// Total deadline for an entire iterative lookup, in milliseconds. Must
/// subsume `REQUEST_TIMEOUT_MS` many times over since a lookup issues many
/// serialized rounds of requests.
pub const LOOKUP_TIMEOUT_MS: u64 = 30_000;

/// Replicate pass interval, in seconds.
pub const T_REPLICATE_SECS: u64 = 3600;
/// Age past which a self-published record is due for republish, and past
/// which any record becomes a replication candidate, in seconds.
pub const T_REPUBLISH_SECS: u64 = 86_400;
/// Expire pass interval and the record-age threshold it deletes past, in
/// seconds.
pub const T_EXPIRE_SECS: u64 = 86_400;
/// Bucket refresh interval, in seconds.
pub const BUCKET_REFRESH_INTERVAL: u64 = 3600;
