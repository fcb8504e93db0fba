//! In-process transport.
//!
//! A [`MemoryNetwork`] maps address strings to request queues. A server
//! [`bind`](MemoryNetwork::bind)s an address and answers each
//! [`MemoryRequest`] through its reply channel; clients reach it through the
//! usual [`Transport`] traits. Sending to an address nobody has bound yet
//! waits until a listener shows up or the context shuts down.
//!
//! Channels come from `tokio::sync` and are driven with
//! `futures::executor::block_on`, so no runtime is needed and every call can
//! be made from a plain thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use super::{Socket, Transport, TransportContext, TransportKind};
use crate::error::{Result, SimSyncError};

/// Poll interval while waiting for an address to be bound
const ROUTE_POLL_INTERVAL: Duration = Duration::from_millis(2);

type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemoryRequest>>>>;

/// One request delivered to a listener.
#[derive(Debug)]
pub struct MemoryRequest {
    payload: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

impl MemoryRequest {
    /// Request bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Answer the request. Returns `false` if the requester went away.
    pub fn respond(self, reply: impl Into<Vec<u8>>) -> bool {
        self.reply.send(reply.into()).is_ok()
    }
}

/// Server side of a bound address.
#[derive(Debug)]
pub struct MemoryListener {
    addr: String,
    rx: mpsc::UnboundedReceiver<MemoryRequest>,
    routes: Routes,
}

impl MemoryListener {
    /// Bound address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Block for the next request. `None` once the address is unbound.
    pub fn recv(&mut self) -> Option<MemoryRequest> {
        self.rx.blocking_recv()
    }

    /// Next request if one is queued.
    pub fn try_recv(&mut self) -> Option<MemoryRequest> {
        self.rx.try_recv().ok()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.rx.close();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if routes.get(&self.addr).is_some_and(mpsc::UnboundedSender::is_closed) {
            routes.remove(&self.addr);
        }
    }
}

/// In-process request/reply network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    routes: Routes,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening on `addr`.
    pub fn bind(&self, addr: &str) -> Result<MemoryListener> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if routes.get(addr).is_some_and(|tx| !tx.is_closed()) {
            return Err(SimSyncError::Transport(format!(
                "Address {addr} already bound"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(addr.to_string(), tx);

        Ok(MemoryListener {
            addr: addr.to_string(),
            rx,
            routes: Arc::clone(&self.routes),
        })
    }

    /// Stop routing to `addr`; its listener drains and then yields `None`.
    pub fn unbind(&self, addr: &str) -> bool {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr)
            .is_some()
    }

    /// Whether a live listener owns `addr`.
    pub fn is_bound(&self, addr: &str) -> bool {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn route(&self, addr: &str) -> Option<mpsc::UnboundedSender<MemoryRequest>> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()
    }
}

impl Transport for MemoryNetwork {
    fn open_context(&self) -> Result<Arc<dyn TransportContext>> {
        Ok(Arc::new(MemoryContext::new(self.clone())))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }
}

/// Context of one connection lifetime on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryContext {
    id: String,
    network: MemoryNetwork,
    closed: watch::Sender<bool>,
}

impl MemoryContext {
    /// Create a context on `network`.
    pub fn new(network: MemoryNetwork) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            network,
            closed,
        }
    }
}

impl TransportContext for MemoryContext {
    fn socket(&self) -> Result<Box<dyn Socket>> {
        if self.is_shut_down() {
            return Err(SimSyncError::ContextTerminated);
        }
        Ok(Box::new(MemorySocket {
            network: self.network.clone(),
            closed: self.closed.subscribe(),
            peer: None,
            pending: None,
        }))
    }

    fn shutdown(&self) {
        tracing::debug!("Memory context {} shutting down", self.id);
        self.closed.send_replace(true);
    }

    fn is_shut_down(&self) -> bool {
        *self.closed.borrow()
    }

    fn id(&self) -> &str {
        &self.id
    }
}

struct MemorySocket {
    network: MemoryNetwork,
    closed: watch::Receiver<bool>,
    peer: Option<String>,
    pending: Option<oneshot::Receiver<Vec<u8>>>,
}

impl MemorySocket {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Socket for MemorySocket {
    fn connect(&mut self, addr: &str) -> Result<()> {
        if self.is_closed() {
            return Err(SimSyncError::ContextTerminated);
        }
        if self.peer.as_deref() != Some(addr) {
            self.pending = None;
            self.peer = Some(addr.to_string());
        }
        Ok(())
    }

    fn disconnect(&mut self, addr: &str) {
        if self.peer.as_deref() == Some(addr) {
            self.peer = None;
            self.pending = None;
        }
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let peer = self.peer.clone().ok_or(SimSyncError::NotConnected)?;

        loop {
            if self.is_closed() {
                return Err(SimSyncError::ContextTerminated);
            }

            if let Some(tx) = self.network.route(&peer) {
                let (reply, pending) = oneshot::channel();
                let request = MemoryRequest {
                    payload: payload.to_vec(),
                    reply,
                };
                if tx.send(request).is_ok() {
                    self.pending = Some(pending);
                    return Ok(());
                }
            }

            std::thread::sleep(ROUTE_POLL_INTERVAL);
        }
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(SimSyncError::ContextTerminated);
        }
        let pending = self.pending.take().ok_or_else(|| {
            SimSyncError::Transport("Receive without a pending request".to_string())
        })?;

        let mut closed = self.closed.clone();
        let peer = self.peer.clone().unwrap_or_default();

        futures::executor::block_on(async move {
            tokio::select! {
                biased;
                reply = pending => reply.map_err(|_| {
                    SimSyncError::Transport(format!("Peer {peer} dropped the request"))
                }),
                () = async {
                    while closed.changed().await.is_ok() {
                        if *closed.borrow() {
                            break;
                        }
                    }
                } => Err(SimSyncError::ContextTerminated),
            }
        })
    }

    fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_request_reply() {
        let network = MemoryNetwork::new();
        let mut listener = network.bind("inproc://echo").unwrap();

        let server = thread::spawn(move || {
            let request = listener.recv().unwrap();
            let mut reply = request.payload().to_vec();
            reply.reverse();
            request.respond(reply)
        });

        let context = network.open_context().unwrap();
        let mut socket = context.socket().unwrap();
        socket.connect("inproc://echo").unwrap();
        socket.send(b"abc").unwrap();
        assert_eq!(socket.recv().unwrap(), b"cba");
        assert!(server.join().unwrap());
    }

    #[test]
    fn test_double_bind_rejected() {
        let network = MemoryNetwork::new();
        let _listener = network.bind("inproc://a").unwrap();
        assert!(network.bind("inproc://a").is_err());
        assert!(network.is_bound("inproc://a"));
    }

    #[test]
    fn test_dropped_listener_frees_address() {
        let network = MemoryNetwork::new();
        drop(network.bind("inproc://a").unwrap());
        assert!(!network.is_bound("inproc://a"));
        assert!(network.bind("inproc://a").is_ok());
    }

    #[test]
    fn test_send_waits_for_late_bind() {
        let network = MemoryNetwork::new();
        let late = network.clone();

        let server = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut listener = late.bind("inproc://late").unwrap();
            listener.recv().unwrap().respond(b"ok".to_vec());
        });

        let context = network.open_context().unwrap();
        let mut socket = context.socket().unwrap();
        socket.connect("inproc://late").unwrap();
        socket.send(b"hi").unwrap();
        assert_eq!(socket.recv().unwrap(), b"ok");
        server.join().unwrap();
    }

    #[test]
    fn test_shutdown_unblocks_recv() {
        let network = MemoryNetwork::new();
        let mut listener = network.bind("inproc://silent").unwrap();

        let context = network.open_context().unwrap();
        let mut socket = context.socket().unwrap();
        socket.connect("inproc://silent").unwrap();
        socket.send(b"ping").unwrap();

        let waiter = thread::spawn(move || socket.recv());
        // Keep the request alive so only the shutdown can end the wait
        let _request = listener.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        context.shutdown();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(SimSyncError::ContextTerminated)
        ));
    }

    #[test]
    fn test_dropped_request_fails_recv() {
        let network = MemoryNetwork::new();
        let mut listener = network.bind("inproc://rude").unwrap();

        let context = network.open_context().unwrap();
        let mut socket = context.socket().unwrap();
        socket.connect("inproc://rude").unwrap();
        socket.send(b"ping").unwrap();
        drop(listener.recv().unwrap());

        assert!(matches!(socket.recv(), Err(SimSyncError::Transport(_))));
    }

    #[test]
    fn test_unbind_ends_listener() {
        let network = MemoryNetwork::new();
        let mut listener = network.bind("inproc://gone").unwrap();
        assert!(network.unbind("inproc://gone"));
        assert!(listener.recv().is_none());
    }
}
