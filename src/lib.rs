//! # SimSync - Lockstep Simulation Client
//!
//! Client-side engine that keeps one simulation participant (a robot model, a
//! scene, a controller) synchronized with a central simulation server over a
//! request/reply socket.
//!
//! ## Features
//!
//! - **Rendezvous**: the client announces its session address at a well-known
//!   server address and waits for the server to echo it back
//! - **Metadata exchange**: a free-form text round that fixes the sizes of the
//!   numeric buffers for the session
//! - **Lockstep streaming**: one `f64` array out, one back, per simulation tick
//! - **Resync**: the server can invalidate the session mid-stream; the client
//!   rendezvouses again and renegotiates without the caller noticing
//! - **Non-blocking ticks**: rendezvous and metadata run on background units so
//!   the simulation loop never stalls
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                          Server (rendezvous)          Server (session)
//!    |                                   |                            |
//!    |---- "host:port" ----------------->|                            |
//!    |<--- "host:port" ------------------|                            |
//!    |                                   |                            |
//!    |---- request metadata (text) ---------------------------------->|
//!    |<--- response metadata (text) ----------------------------------|
//!    |                                   |                            |
//!    |==== send buffer (f64 LE, slot 0 = time) =====================>|
//!    |<=== receive buffer (f64 LE, slot 0 = validity) ===============|
//!    |          ... once per tick ...    |                            |
//!    |                                   |                            |
//!    |---- "{}" (termination) --------------------------------------->|
//! ```
//!
//! ### State Machine
//!
//! ```text
//!   [None] ──rendezvous──> [StartConnection] ──> [BindRequestMetaData]
//!                                                      │
//!        ┌───────────── metadata unit ─────────────────┘
//!        v
//!   [SendRequestMetaData] ──> [ReceiveResponseMetaData] ──mismatch──> rendezvous, resend
//!                                      │
//!                                      v
//!                             [BindResponseMetaData] ──> [InitSendAndReceiveData]
//!                                                                │
//!        ┌──────────────────────── communicate() ────────────────┘
//!        v
//!   [BindSendData] ──> [SendData] ──> [ReceiveData] ──invalid──> rendezvous, new round
//!        ^                                  │
//!        └──────── [BindReceiveData] <──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use simsync::{BufferSizes, Client, DomainHooks, RequestedSizes, TcpTransport};
//!
//! struct Robot { joints: Vec<f64>, torques: Vec<f64> }
//!
//! impl DomainHooks for Robot {
//!     fn bind_request_meta_data(&mut self) -> String {
//!         r#"{"robot":"arm","joints":6}"#.to_string()
//!     }
//!     fn compute_request_buffer_sizes(&self) -> RequestedSizes {
//!         RequestedSizes::new(7, Some(7))
//!     }
//!     fn compute_response_meta_data(&mut self, response: &str) -> bool {
//!         !response.is_empty()
//!     }
//!     fn compute_response_buffer_sizes(&self) -> BufferSizes {
//!         BufferSizes::new(7, 7)
//!     }
//!     fn bind_send_data(&mut self, send: &mut [f64]) {
//!         send[1..].copy_from_slice(&self.joints);
//!     }
//!     fn bind_receive_data(&mut self, receive: &[f64]) {
//!         self.torques.copy_from_slice(&receive[1..]);
//!     }
//! }
//!
//! let client = Client::new(Robot::default(), TcpTransport::default());
//! client.connect("tcp://127.0.0.1", "5000")?;
//! for _ in 0..1000 {
//!     client.communicate(false)?;
//! }
//! client.disconnect();
//! ```
//!
//! ## Modules
//!
//! - [`client`]: The [`Client`] coordinator, state machine and background units
//! - [`protocol`]: States, buffers, negotiation and the [`DomainHooks`] seam
//! - [`transport`]: Request/reply sockets over TCP or in-process channels
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use client::Client;
pub use config::{ClientConfig, TcpConfig};
pub use error::{NegotiationError, Result, SimSyncError};
pub use protocol::{
    BufferSizes, BufferStats, ClientState, DomainHooks, RequestedSizes, SessionEndpoint,
};
pub use transport::{MemoryNetwork, TcpTransport, Transport, TransportKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
