//! Transport layer abstraction for SimSync.
//!
//! The engine only needs a connection-oriented request/reply primitive that
//! moves opaque byte messages, one request in flight per socket. Backends:
//! - **TCP**: blocking `std::net` streams with length-prefixed frames
//! - **Memory**: in-process request/reply network for tests and embedding
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              SimSync Client              │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ open_context() per connect
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  TcpTransport   │ │  MemoryNetwork  │
//! └─────────────────┘ └─────────────────┘
//!          │ TransportContext::socket()
//!          ▼
//!     Box<dyn Socket>  connect / send / recv / disconnect
//! ```
//!
//! Shutting a context down unblocks every socket it handed out; their pending
//! and future calls fail with [`SimSyncError::ContextTerminated`].
//!
//! [`SimSyncError::ContextTerminated`]: crate::error::SimSyncError::ContextTerminated

mod memory;
mod tcp;

pub use memory::{MemoryContext, MemoryListener, MemoryNetwork, MemoryRequest};
pub use tcp::{read_frame, write_frame, TcpContext, TcpTransport};

use std::sync::Arc;

use crate::error::Result;

/// Transport kind, selected by address scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Length-prefixed frames over TCP (default)
    #[default]
    Tcp,
    /// In-process channels
    Memory,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Memory => "Memory",
        }
    }

    /// Kind implied by an address such as `tcp://127.0.0.1:7000`.
    pub fn from_address(addr: &str) -> Option<Self> {
        let (scheme, _) = addr.split_once("://")?;
        scheme.parse().ok()
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "inproc" | "memory" | "mem" => Ok(Self::Memory),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// Transport backend. Opens a fresh context for every connect cycle.
pub trait Transport: Send + Sync {
    /// Allocate a new transport context.
    fn open_context(&self) -> Result<Arc<dyn TransportContext>>;

    /// Kind of addresses this backend serves.
    fn kind(&self) -> TransportKind;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Owner of the sockets of one connection lifetime.
pub trait TransportContext: Send + Sync {
    /// Create a request socket bound to this context.
    fn socket(&self) -> Result<Box<dyn Socket>>;

    /// Terminate the context, failing all blocked and future socket calls.
    fn shutdown(&self);

    /// Whether `shutdown` was called.
    fn is_shut_down(&self) -> bool;

    /// Context identifier for diagnostics.
    fn id(&self) -> &str;
}

/// Request socket talking to one peer at a time.
pub trait Socket: Send {
    /// Point the socket at `addr`, replacing any previous peer.
    fn connect(&mut self, addr: &str) -> Result<()>;

    /// Drop the peer if it is `addr`; a no-op otherwise.
    fn disconnect(&mut self, addr: &str);

    /// Send one message to the current peer.
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Block until the reply to the last message arrives.
    fn recv(&mut self) -> Result<Vec<u8>>;

    /// Current peer address, if any.
    fn peer(&self) -> Option<&str>;
}
