//! Numeric buffer lifecycle.
//!
//! The manager owns the outgoing and incoming `f64` arrays. They exist only
//! between a successful negotiation and the next renegotiation or teardown.
//! Slot 0 of the outgoing array carries the send timestamp; slot 0 of the
//! incoming array carries the server's validity sentinel.
//!
//! On the wire both arrays are packed little-endian.

use bytes::{Buf, BufMut, BytesMut};

use super::negotiation::BufferSizes;

const SLOT_BYTES: usize = std::mem::size_of::<f64>();

/// Current wall-clock time in seconds, microsecond resolution.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Allocation counters and live sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Successful allocations so far
    pub allocations: u64,
    /// Releases of allocated buffers so far
    pub releases: u64,
    /// Sizes of the live buffers, if any
    pub sizes: Option<BufferSizes>,
}

#[derive(Debug)]
struct Buffers {
    send: Vec<f64>,
    receive: Vec<f64>,
}

/// Owner of the streaming buffers.
#[derive(Debug, Default)]
pub struct BufferManager {
    buffers: Option<Buffers>,
    allocations: u64,
    releases: u64,
}

impl BufferManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate zeroed buffers of the negotiated sizes.
    ///
    /// Live buffers from an earlier round are released first.
    pub fn allocate(&mut self, sizes: BufferSizes) {
        self.release();
        self.buffers = Some(Buffers {
            send: vec![0.0; sizes.send],
            receive: vec![0.0; sizes.receive],
        });
        self.allocations += 1;
    }

    /// Free the buffers. Returns whether anything was allocated.
    pub fn release(&mut self) -> bool {
        if self.buffers.take().is_some() {
            self.releases += 1;
            true
        } else {
            false
        }
    }

    /// Whether buffers are live.
    pub fn is_allocated(&self) -> bool {
        self.buffers.is_some()
    }

    /// Sizes of the live buffers.
    pub fn sizes(&self) -> Option<BufferSizes> {
        self.buffers
            .as_ref()
            .map(|b| BufferSizes::new(b.send.len(), b.receive.len()))
    }

    /// Counters and sizes.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            allocations: self.allocations,
            releases: self.releases,
            sizes: self.sizes(),
        }
    }

    /// Outgoing buffer.
    pub fn send(&self) -> Option<&[f64]> {
        self.buffers.as_ref().map(|b| b.send.as_slice())
    }

    /// Outgoing buffer, mutable for the send hook.
    pub fn send_mut(&mut self) -> Option<&mut [f64]> {
        self.buffers.as_mut().map(|b| b.send.as_mut_slice())
    }

    /// Incoming buffer.
    pub fn receive(&self) -> Option<&[f64]> {
        self.buffers.as_ref().map(|b| b.receive.as_slice())
    }

    /// Overwrite slot 0 of the outgoing buffer and pack it for the wire.
    pub fn stamp_and_encode(&mut self, time: f64) -> Option<Vec<u8>> {
        let buffers = self.buffers.as_mut()?;
        if let Some(slot) = buffers.send.first_mut() {
            *slot = time;
        }

        let mut out = BytesMut::with_capacity(buffers.send.len() * SLOT_BYTES);
        for value in &buffers.send {
            out.put_f64_le(*value);
        }
        Some(out.to_vec())
    }

    /// Unpack a received message into the incoming buffer.
    ///
    /// Fills as many leading slots as the message carries; surplus bytes are
    /// dropped. Returns the number of slots written.
    pub fn decode_receive(&mut self, mut payload: &[u8]) -> Option<usize> {
        let buffers = self.buffers.as_mut()?;

        let mut written = 0;
        for slot in &mut buffers.receive {
            if payload.remaining() < SLOT_BYTES {
                break;
            }
            *slot = payload.get_f64_le();
            written += 1;
        }
        Some(written)
    }

    /// Whether slot 0 of the incoming buffer asks for a resync.
    pub fn is_invalidated(&self) -> bool {
        self.receive()
            .and_then(|r| r.first())
            .is_some_and(|first| first.is_nan() || *first < 0.0)
    }
}
