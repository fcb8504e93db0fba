//! SimSync error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Recoverable**: the engine retries them itself through the rendezvous
//!   protocol (rejected rendezvous, negotiation mismatch, mid-stream
//!   invalidation). They surface mostly as diagnostics.
//! - **Fatal for the session**: transport failures and hook rejections. A
//!   transport failure raises the shutdown flag; the caller has to
//!   `connect` again.
//!
//! The `Negotiation` variant preserves the full error chain via `#[source]`.

use thiserror::Error;

use crate::protocol::{BufferSizes, RequestedSizes};

/// SimSync errors.
#[derive(Error, Debug)]
pub enum SimSyncError {
    /// The transport refused a connection or failed to move a message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport context was shut down while a call was blocked on it.
    #[error("Transport context terminated")]
    ContextTerminated,

    /// The rendezvous server answered with an address other than ours.
    #[error("Rendezvous rejected: expected {expected}, received {received}")]
    RendezvousRejected {
        /// Our own session address.
        expected: String,
        /// Address the server handed back.
        received: String,
    },

    /// Metadata negotiation failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(#[source] NegotiationError),

    /// The server flagged the running session as invalid.
    #[error("Session invalidated by the server")]
    SessionInvalidated,

    /// A domain hook refused to continue.
    #[error("Domain hook rejected: {0}")]
    HookRejected(String),

    /// Operation needs a connected session.
    #[error("Not connected")]
    NotConnected,

    /// A streaming phase ran before buffers were negotiated.
    #[error("Buffers not allocated")]
    BuffersUnallocated,

    /// The shutdown flag is raised for this connection.
    #[error("Client is shutting down")]
    ShutDown,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimSyncError {
    /// Whether the engine recovers from this condition without the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SimSyncError::RendezvousRejected { .. }
                | SimSyncError::Negotiation(_)
                | SimSyncError::SessionInvalidated
        )
    }
}

/// Result type alias for SimSync operations
pub type Result<T> = std::result::Result<T, SimSyncError>;

/// Reasons a metadata round does not produce agreed buffer sizes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The response hook could not interpret the server's metadata.
    #[error("response meta data rejected by the domain hooks")]
    Rejected,

    /// Client expectation and server declaration disagree.
    #[error(
        "send_buffer_size(server = {}, client = {}), receive_buffer_size(server = {}, client = {})",
        .server.send,
        .client.send,
        .server.receive,
        .client.receive.map_or_else(|| "any".to_string(), |n| n.to_string())
    )]
    SizeMismatch {
        /// Sizes the client expected.
        client: RequestedSizes,
        /// Sizes the server declared.
        server: BufferSizes,
    },

    /// The server declared a buffer without room for the timestamp slot.
    #[error("server declared an empty buffer (send = {}, receive = {})", .server.send, .server.receive)]
    EmptyBuffer {
        /// Sizes the server declared.
        server: BufferSizes,
    },
}

impl From<NegotiationError> for SimSyncError {
    fn from(err: NegotiationError) -> Self {
        SimSyncError::Negotiation(err)
    }
}

impl From<toml::de::Error> for SimSyncError {
    fn from(err: toml::de::Error) -> Self {
        SimSyncError::Config(format!("Failed to parse config: {err}"))
    }
}
