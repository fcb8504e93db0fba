//! Domain hooks.
//!
//! The engine never interprets metadata or payload slots itself. A concrete
//! simulation binding supplies one [`DomainHooks`] implementation; the engine
//! calls it at fixed points of the state machine, always from the single
//! thread that currently drives the machine.

use super::negotiation::{BufferSizes, RequestedSizes};

/// Domain-specific operations injected into a [`Client`](crate::Client).
pub trait DomainHooks: Send + 'static {
    /// Prepare domain objects before a connect. `false` aborts the connect.
    fn init_objects(&mut self) -> bool {
        true
    }

    /// Produce the request metadata payload for the next metadata round.
    fn bind_request_meta_data(&mut self) -> String;

    /// Buffer sizes this client expects.
    ///
    /// Leave `receive` as `None` to accept whatever the server declares.
    fn compute_request_buffer_sizes(&self) -> RequestedSizes;

    /// Interpret the server's response metadata. `false` fails the round.
    fn compute_response_meta_data(&mut self, response: &str) -> bool;

    /// Bind the interpreted response to domain state.
    fn bind_response_meta_data(&mut self) {}

    /// Buffer sizes the server declared in its response.
    fn compute_response_buffer_sizes(&self) -> BufferSizes;

    /// One-time setup before the first streaming cycle of a round.
    fn init_send_and_receive_data(&mut self) {}

    /// Fill the outgoing buffer. Slot 0 is overwritten with the send time.
    fn bind_send_data(&mut self, send: &mut [f64]);

    /// Read the incoming buffer. Slot 0 is the server's validity field.
    fn bind_receive_data(&mut self, receive: &[f64]);

    /// Release per-round domain objects.
    fn clean_up(&mut self) {}
}
