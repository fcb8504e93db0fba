//! SimSync protocol building blocks.
//!
//! The pieces the client engine is assembled from: the phase enum, session
//! addressing, buffer size negotiation, buffer ownership and the domain hook
//! contract.
//!
//! # Protocol Overview
//!
//! ```text
//! Client                         Rendezvous            Session address
//!    |                                |                       |
//!    |------ own address ----------->|                       |
//!    |<----- own address (echo) -----|                       |
//!    |                                                        |
//!    |------ request metadata ------------------------------>|
//!    |<----- response metadata (buffer sizes) ---------------|
//!    |                                                        |
//!    |====== [time, payload...] (f64) =====================>|
//!    |<===== [valid, payload...] (f64) ======================|
//!    |                 ... one round per tick ...             |
//!    |------ {} (termination) ------------------------------>|
//! ```
//!
//! A server that echoes a different address rejects the rendezvous. A
//! response whose slot 0 is NaN or negative asks the client to start over
//! from the rendezvous.
//!
//! ## Wire Formats
//!
//! | Message      | Payload                                   |
//! |--------------|-------------------------------------------|
//! | Rendezvous   | UTF-8 address string                      |
//! | Metadata     | Opaque string owned by the domain hooks   |
//! | Streaming    | Little-endian `f64` array, slot 0 reserved |
//! | Termination  | `{}`                                      |

mod buffers;
mod endpoint;
mod hooks;
mod negotiation;
mod state;

pub use buffers::{now_seconds, BufferManager, BufferStats};
pub use endpoint::SessionEndpoint;
pub use hooks::DomainHooks;
pub use negotiation::{negotiate, BufferSizes, RequestedSizes};
pub use state::ClientState;

/// Payload sent once when closing a session that holds buffers.
pub const TERMINATION_PAYLOAD: &[u8] = b"{}";

/// Default rendezvous address of the simulation server.
pub const DEFAULT_SERVER_ADDR: &str = "tcp://127.0.0.1:7000";

/// Default client host.
pub const DEFAULT_HOST: &str = "tcp://127.0.0.1";
