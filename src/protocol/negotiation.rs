//! Buffer size negotiation.
//!
//! Both sides of a metadata round describe the buffers they expect: the client
//! through [`DomainHooks::compute_request_buffer_sizes`], the server through the
//! sizes the hooks extract from the response metadata. A client that leaves
//! its receive size open accepts whatever the server declares; otherwise both
//! sizes must agree exactly.
//!
//! [`DomainHooks::compute_request_buffer_sizes`]: super::DomainHooks::compute_request_buffer_sizes

use serde::{Deserialize, Serialize};

use crate::error::NegotiationError;

/// Buffer lengths (in `f64` slots, timestamp slot included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferSizes {
    /// Outgoing buffer length
    pub send: usize,
    /// Incoming buffer length
    pub receive: usize,
}

impl BufferSizes {
    /// Create a size pair.
    pub fn new(send: usize, receive: usize) -> Self {
        Self { send, receive }
    }

    /// Both buffers have room for slot 0.
    pub fn is_valid(&self) -> bool {
        self.send >= 1 && self.receive >= 1
    }
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Sizes the client expects before seeing the server's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestedSizes {
    /// Expected outgoing buffer length
    pub send: usize,
    /// Expected incoming buffer length, `None` to accept the server's
    pub receive: Option<usize>,
}

impl RequestedSizes {
    /// Create a requested size pair.
    pub fn new(send: usize, receive: Option<usize>) -> Self {
        Self { send, receive }
    }

    /// Accept whatever the server declares.
    pub fn unspecified() -> Self {
        Self {
            send: 1,
            receive: None,
        }
    }
}

impl Default for RequestedSizes {
    fn default() -> Self {
        Self::new(1, Some(1))
    }
}

impl From<BufferSizes> for RequestedSizes {
    fn from(sizes: BufferSizes) -> Self {
        Self::new(sizes.send, Some(sizes.receive))
    }
}

/// Derive the agreed buffer sizes from both sides' declarations.
pub fn negotiate(
    client: RequestedSizes,
    server: BufferSizes,
) -> Result<BufferSizes, NegotiationError> {
    if let Some(receive) = client.receive {
        if server.send != client.send || server.receive != receive {
            return Err(NegotiationError::SizeMismatch { client, server });
        }
    }

    if !server.is_valid() {
        return Err(NegotiationError::EmptyBuffer { server });
    }

    Ok(server)
}
