use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::contact::Contact;
use crate::identifier::Identifier;
use crate::MESSAGE_LENGTH;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub id: Identifier,
    pub sender: Contact,
    pub payload: RequestPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RequestPayload {
    Ping,
    Store(Identifier, String),
    FindNode(Identifier),
    FindValue(Identifier),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub request_id: Identifier,
    pub receiver: Contact,
    pub payload: ResponsePayload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ResponsePayload {
    Pong,
    /// Acknowledges a STORE, distinguishing a validator rejection from a
    /// silent accept (spec's STORE-acknowledgment open question, resolved
    /// in the affirmative).
    Stored { accepted: bool },
    Nodes(Vec<Contact>),
    Value(String),
}

/// The wire envelope a `Transport` sends and receives. `method` is implied
/// by which variant is present, matching the request/response correlation
/// rule: a `Request` dispatches to a handler, a `Response` is matched
/// against the pending-request table by `request_id`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
    /// Out-of-band local control message requesting the node's background
    /// threads shut down; never sent over the wire by a well-behaved peer.
    Shutdown,
}

/// Required of any transport a `Node` is constructed with: best-effort
/// delivery of outbound messages, and a push channel of decoded inbound
/// messages supplied at construction time. `send` returns `Err` only for a
/// synchronous, immediately-known failure (encode error, unreachable
/// address); delivery still carries no further guarantee beyond that.
pub trait Transport: Send + Sync {
    fn send(&self, to: &Contact, message: Message) -> Result<(), String>;
}

/// The default `Transport`: UDP datagrams framed with `bincode`, grounded
/// directly in the teacher's `Protocol`. Construction spawns a background
/// thread that decodes inbound datagrams and forwards them to `tx`.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, tx: Sender<Message>) -> Self {
        let transport = UdpTransport {
            socket: Arc::new(socket),
        };
        let read_socket = Arc::clone(&transport.socket);
        thread::spawn(move || {
            let mut buffer = [0u8; MESSAGE_LENGTH];
            loop {
                let len = match read_socket.recv_from(&mut buffer) {
                    Ok((len, _src_addr)) => len,
                    Err(e) => {
                        warn!("UdpTransport: recv error: {}", e);
                        continue;
                    },
                };
                let message: Message = match bincode::deserialize(&buffer[..len]) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("UdpTransport: dropping malformed message: {}", e);
                        continue;
                    },
                };
                if tx.send(message).is_err() {
                    warn!("UdpTransport: inbound channel closed, stopping receiver.");
                    break;
                }
            }
        });
        transport
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.socket.local_addr().expect("bound socket has a local address")
    }
}

impl Transport for UdpTransport {
    fn send(&self, to: &Contact, message: Message) -> Result<(), String> {
        let encoded = bincode::serialize(&message).map_err(|e| {
            let msg = format!("failed to encode message: {}", e);
            warn!("UdpTransport: {}", msg);
            msg
        })?;
        if encoded.len() > MESSAGE_LENGTH {
            let msg = "message exceeds MESSAGE_LENGTH".to_string();
            warn!("UdpTransport: {}", msg);
            return Err(msg);
        }
        self.socket.send_to(&encoded, to.addr()).map_err(|e| {
            let msg = format!("could not send to {}: {}", to.addr(), e);
            warn!("UdpTransport: {}", msg);
            msg
        })?;
        Ok(())
    }
}
