use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::contact::Contact;
use crate::error::NodeError;
use crate::identifier::Identifier;
use crate::transport::{Message, Request, RequestPayload, Response, Transport};

/// The correlation table between outgoing requests and the channel a
/// caller is waiting on for the matching response. Shared between the
/// inbound message dispatcher (which completes entries) and `RpcClient`
/// (which registers and cancels them).
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<Identifier, Sender<Response>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        PendingRequests {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves a fresh request id and returns its response channel.
    fn register(&self) -> (Identifier, Receiver<Response>) {
        let (tx, rx) = channel();
        let mut inner = self.inner.lock().unwrap();
        let mut id = Identifier::rand();
        while inner.contains_key(&id) {
            id = Identifier::rand();
        }
        inner.insert(id, tx);
        (id, rx)
    }

    fn cancel(&self, id: &Identifier) {
        self.inner.lock().unwrap().remove(id);
    }

    /// Routes an inbound response to its waiter, if one is still pending.
    /// Returns `false` for a response with no matching in-flight request
    /// (already timed out, or spurious).
    pub fn complete(&self, response: Response) -> bool {
        let sender = self.inner.lock().unwrap().remove(&response.request_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

/// Typed request/reply wrapper around a `Transport`: registers a
/// correlation id and timeout for every outgoing request, and resolves it
/// when a response arrives or the timeout elapses. Responses are
/// transmit-and-forget and never time out.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    self_contact: Contact,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        pending: Arc<PendingRequests>,
        self_contact: Contact,
        timeout: Duration,
    ) -> Self {
        RpcClient {
            transport,
            pending,
            self_contact,
            timeout,
        }
    }

    /// Sends a request RPC and blocks until a response arrives or the
    /// request times out. A synchronous transport failure (unreachable
    /// address, encode error) fails fast as `TransportFailure` instead of
    /// waiting out the full timeout.
    pub fn request(&self, to: &Contact, payload: RequestPayload) -> Result<Response, NodeError> {
        let (id, rx) = self.pending.register();
        let sent = self.transport.send(
            to,
            Message::Request(Request {
                id,
                sender: self.self_contact.clone(),
                payload,
            }),
        );
        if let Err(reason) = sent {
            self.pending.cancel(&id);
            return Err(NodeError::TransportFailure(reason));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(response) => Ok(response),
            Err(_) => {
                self.pending.cancel(&id);
                Err(NodeError::Timeout(self.timeout))
            },
        }
    }

    /// Sends a response RPC. Fire-and-forget: never expects a reply, and a
    /// send failure here is merely logged by the transport, not reported.
    pub fn reply(&self, to: &Contact, request_id: Identifier, payload: crate::transport::ResponsePayload) {
        let _ = self.transport.send(
            to,
            Message::Response(Response {
                request_id,
                receiver: self.self_contact.clone(),
                payload,
            }),
        );
    }
}
