//! Connection state machine and rendezvous protocol.
//!
//! [`Machine`] holds everything the protocol phases touch. It lives behind the
//! mutex in [`Shared`], so exactly one thread drives it at a time: the caller
//! (through [`Client`](super::Client)) or one of the two background units.
//!
//! The run loop advances one state per step until it reaches a suspend point
//! or sees the shutdown flag. Suspend points:
//!
//! | After                 | Control goes to                           |
//! |-----------------------|-------------------------------------------|
//! | `BindRequestMetaData` | metadata unit (send + receive metadata)   |
//! | `BindResponseMetaData`| caller, before streaming starts           |
//! | `BindReceiveData`     | caller, after one send/receive cycle      |
//! | invalid `ReceiveData` | connect unit (rendezvous again)           |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::worker::BackgroundUnit;
use crate::config::ClientConfig;
use crate::error::{NegotiationError, Result, SimSyncError};
use crate::protocol::{
    negotiate, now_seconds, BufferManager, BufferSizes, BufferStats, ClientState, DomainHooks,
    SessionEndpoint, TERMINATION_PAYLOAD,
};
use crate::transport::{Socket, TransportContext};

/// State shared between the client handle and its background units.
pub(crate) struct Shared<H: DomainHooks> {
    pub(crate) machine: Mutex<Machine<H>>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) connect_unit: BackgroundUnit,
    pub(crate) meta_data_unit: BackgroundUnit,
    pub(crate) context: Mutex<Option<Arc<dyn TransportContext>>>,
    pub(crate) config: ClientConfig,
}

impl<H: DomainHooks> Shared<H> {
    pub(crate) fn new(hooks: H, config: ClientConfig) -> Self {
        Self {
            machine: Mutex::new(Machine::new(hooks, &config)),
            shutdown: AtomicBool::new(false),
            connect_unit: BackgroundUnit::new("connect"),
            meta_data_unit: BackgroundUnit::new("meta-data"),
            context: Mutex::new(None),
            config,
        }
    }

    pub(crate) fn lock_machine(&self) -> MutexGuard<'_, Machine<H>> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub(crate) fn has_context(&self) -> bool {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Shut the transport context down without releasing it.
    pub(crate) fn interrupt_context(&self) {
        let context = self
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(context) = context {
            context.shutdown();
        }
    }

    /// Spawn the rendezvous/reconnect unit.
    pub(crate) fn start_connect_unit(self: &Arc<Self>) -> Result<()> {
        let shared = Arc::clone(self);
        self.connect_unit.start(move || {
            let mut machine = shared.lock_machine();
            machine.connect_to_server(&shared);
        })
    }

    /// Spawn the metadata unit.
    pub(crate) fn start_meta_data_unit(self: &Arc<Self>) -> Result<()> {
        let shared = Arc::clone(self);
        self.meta_data_unit.start(move || {
            let mut machine = shared.lock_machine();
            machine.send_and_receive_meta_data(&shared);
        })
    }

    /// Join both units, including any one spawns while we wait.
    pub(crate) fn wait_for_units(&self) {
        loop {
            self.connect_unit.wait_for_finish();
            self.meta_data_unit.wait_for_finish();
            if !self.connect_unit.is_pending() && !self.meta_data_unit.is_pending() {
                break;
            }
        }
    }
}

/// Outcome of one state machine step.
enum Flow {
    Continue,
    Suspend,
}

/// Cut `text` to at most `width` characters for diagnostics.
fn clip(text: &str, width: usize) -> &str {
    text.char_indices()
        .nth(width)
        .map_or(text, |(end, _)| &text[..end])
}

/// Protocol engine state.
pub(crate) struct Machine<H: DomainHooks> {
    state: ClientState,
    endpoint: Option<SessionEndpoint>,
    server_addr: String,
    socket: Option<Box<dyn Socket>>,
    buffers: BufferManager,
    hooks: H,
    request_meta_data: String,
    response_meta_data: String,
    log_width: usize,
}

impl<H: DomainHooks> Machine<H> {
    fn new(hooks: H, config: &ClientConfig) -> Self {
        Self {
            state: ClientState::None,
            endpoint: None,
            server_addr: config.server_addr.clone(),
            socket: None,
            buffers: BufferManager::new(),
            hooks,
            request_meta_data: String::new(),
            response_meta_data: String::new(),
            log_width: config.meta_data_log_width,
        }
    }

    pub(crate) fn state(&self) -> ClientState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ClientState) {
        self.state = state;
    }

    pub(crate) fn endpoint(&self) -> Option<&SessionEndpoint> {
        self.endpoint.as_ref()
    }

    pub(crate) fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub(crate) fn request_meta_data(&self) -> &str {
        &self.request_meta_data
    }

    pub(crate) fn response_meta_data(&self) -> &str {
        &self.response_meta_data
    }

    pub(crate) fn buffer_stats(&self) -> BufferStats {
        self.buffers.stats()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.socket.is_some()
    }

    /// Forget the previous session and adopt `endpoint`.
    pub(crate) fn reset(&mut self, endpoint: SessionEndpoint) {
        self.state = ClientState::None;
        self.endpoint = Some(endpoint);
        self.socket = None;
        self.buffers.release();
        self.hooks.clean_up();
    }

    /// Install the socket of a fresh transport context.
    pub(crate) fn attach(&mut self, socket: Box<dyn Socket>) {
        self.socket = Some(socket);
    }

    fn port(&self) -> &str {
        self.endpoint.as_ref().map_or("?", |e| e.port.as_str())
    }

    fn address(&self) -> String {
        self.endpoint
            .as_ref()
            .map(SessionEndpoint::address)
            .unwrap_or_default()
    }

    fn socket(&mut self) -> Result<&mut (dyn Socket + 'static)> {
        self.socket.as_deref_mut().ok_or(SimSyncError::NotConnected)
    }

    /// Drive the machine until a suspend point or shutdown.
    pub(crate) fn run(&mut self, shared: &Arc<Shared<H>>) {
        while !shared.is_shutting_down() {
            match self.step(shared) {
                Ok(Flow::Continue) => {},
                Ok(Flow::Suspend) => return,
                Err(err) => {
                    tracing::error!(
                        "[Client {}] {} in state {}, prepares to disconnect from socket {}.",
                        self.port(),
                        err,
                        self.state,
                        self.address()
                    );
                    shared.request_shutdown();
                },
            }
        }

        self.close();
    }

    fn step(&mut self, shared: &Arc<Shared<H>>) -> Result<Flow> {
        match self.state {
            ClientState::None => return Ok(Flow::Suspend),

            ClientState::StartConnection => {
                let addr = self.address();
                let socket = self.socket()?;
                socket.disconnect(&addr);
                socket.connect(&addr)?;

                self.state = ClientState::BindRequestMetaData;
            },

            ClientState::BindRequestMetaData => {
                // Sizes may change with the new round
                self.buffers.release();
                self.request_meta_data = self.hooks.bind_request_meta_data();

                tracing::info!(
                    "[Client {}] Sending meta data to the server: {}",
                    self.port(),
                    clip(&self.request_meta_data, self.log_width)
                );

                shared.start_meta_data_unit()?;
                return Ok(Flow::Suspend);
            },

            ClientState::SendRequestMetaData => {
                self.send_request_meta_data()?;
                self.state = ClientState::ReceiveResponseMetaData;
            },

            ClientState::ReceiveResponseMetaData => {
                self.receive_response_meta_data()?;

                tracing::info!(
                    "[Client {}] Received meta data from the server: {}",
                    self.port(),
                    clip(&self.response_meta_data, self.log_width)
                );

                if shared.is_shutting_down() {
                    self.state = ClientState::BindResponseMetaData;
                    return Ok(Flow::Continue);
                }

                match self.check_buffer_sizes() {
                    Ok(sizes) => {
                        self.buffers.allocate(sizes);
                        self.state = ClientState::BindResponseMetaData;
                    },
                    Err(err) => {
                        tracing::warn!(
                            "[Client {}] Failed to initialize the buffers {}: {}. Resending the meta data.",
                            self.port(),
                            self.address(),
                            err
                        );
                        self.connect_to_server(shared);
                    },
                }
            },

            ClientState::BindResponseMetaData => {
                self.hooks.bind_response_meta_data();
                self.state = ClientState::InitSendAndReceiveData;
                return Ok(Flow::Suspend);
            },

            ClientState::InitSendAndReceiveData => {
                shared.connect_unit.wait_for_finish();
                shared.meta_data_unit.wait_for_finish();
                self.hooks.clean_up();
                self.hooks.init_send_and_receive_data();

                let sizes = self.buffers.sizes().ok_or(SimSyncError::BuffersUnallocated)?;
                tracing::info!(
                    "[Client {}] Starting the communication (send: {}, receive: {}).",
                    self.port(),
                    sizes.send,
                    sizes.receive
                );

                self.state = ClientState::BindSendData;
            },

            ClientState::BindSendData => {
                let send = self.buffers.send_mut().ok_or(SimSyncError::BuffersUnallocated)?;
                self.hooks.bind_send_data(send);
                self.state = ClientState::SendData;
            },

            ClientState::SendData => {
                let payload = self
                    .buffers
                    .stamp_and_encode(now_seconds())
                    .ok_or(SimSyncError::BuffersUnallocated)?;
                self.socket()?.send(&payload)?;
                self.state = ClientState::ReceiveData;
            },

            ClientState::ReceiveData => {
                let reply = self.socket()?.recv()?;
                let slots = self
                    .buffers
                    .decode_receive(&reply)
                    .ok_or(SimSyncError::BuffersUnallocated)?;
                if reply.len() != slots * std::mem::size_of::<f64>() {
                    tracing::debug!(
                        "[Client {}] Received {} bytes, filled {} slot(s).",
                        self.port(),
                        reply.len(),
                        slots
                    );
                }

                if shared.is_shutting_down() {
                    self.state = ClientState::BindReceiveData;
                    return Ok(Flow::Continue);
                }

                if self.buffers.is_invalidated() {
                    tracing::warn!(
                        "[Client {}] {} on socket {}, returning to resend the meta data.",
                        self.port(),
                        SimSyncError::SessionInvalidated,
                        self.address()
                    );
                    shared.start_connect_unit()?;
                    return Ok(Flow::Suspend);
                }

                self.state = ClientState::BindReceiveData;
            },

            ClientState::BindReceiveData => {
                let receive = self.buffers.receive().ok_or(SimSyncError::BuffersUnallocated)?;
                self.hooks.bind_receive_data(receive);
                self.state = ClientState::BindSendData;
                return Ok(Flow::Suspend);
            },
        }

        Ok(Flow::Continue)
    }

    /// Closing sequence, run once the loop sees the shutdown flag.
    fn close(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        let addr = self.address();

        if self.state.is_receiving() {
            tracing::warn!(
                "[Client {}] Closing the socket {} while a reply is pending ({}).",
                self.port(),
                addr,
                self.state
            );
        } else {
            tracing::info!("[Client {}] Closing the socket {}.", self.port(), addr);

            if self.state.sends_termination() {
                if let Err(err) = socket.send(TERMINATION_PAYLOAD) {
                    tracing::warn!(
                        "[Client {}] Failed to send the termination message to {}: {}",
                        self.port(),
                        addr,
                        err
                    );
                }
            }
        }

        self.buffers.release();
        self.hooks.clean_up();
        socket.disconnect(&addr);
        self.state = ClientState::None;
    }

    /// Metadata unit body, also the explicit metadata round.
    pub(crate) fn send_and_receive_meta_data(&mut self, shared: &Arc<Shared<H>>) {
        if shared.is_shutting_down() || !self.is_attached() {
            return;
        }
        self.state = ClientState::SendRequestMetaData;
        self.run(shared);
    }

    fn send_request_meta_data(&mut self) -> Result<()> {
        let payload = self.request_meta_data.clone().into_bytes();
        self.socket()?.send(&payload)
    }

    fn receive_response_meta_data(&mut self) -> Result<()> {
        let reply = self.socket()?.recv()?;
        self.response_meta_data = String::from_utf8_lossy(&reply).into_owned();
        Ok(())
    }

    /// Ask the hooks for both sides' sizes and agree on one pair.
    fn check_buffer_sizes(&mut self) -> std::result::Result<BufferSizes, NegotiationError> {
        if !self.hooks.compute_response_meta_data(&self.response_meta_data) {
            return Err(NegotiationError::Rejected);
        }

        let client = self.hooks.compute_request_buffer_sizes();
        let server = self.hooks.compute_response_buffer_sizes();
        negotiate(client, server)
    }

    /// Rendezvous with the server and pick the state to resume from.
    pub(crate) fn connect_to_server(&mut self, shared: &Arc<Shared<H>>) {
        let addr = self.address();
        let Some(socket) = self.socket.as_deref_mut() else {
            return;
        };
        socket.disconnect(&addr);

        if shared.is_shutting_down() {
            return;
        }

        if self.state.is_receiving() {
            std::thread::sleep(shared.config.reconnect_delay());
            if shared.is_shutting_down() {
                return;
            }
        }

        let reply = match self.rendezvous(&addr) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(
                    "[Client {}] {}, prepares to disconnect from server socket {}.",
                    self.port(),
                    err,
                    self.server_addr
                );
                shared.request_shutdown();
                return;
            },
        };

        if reply != addr {
            let err = SimSyncError::RendezvousRejected {
                expected: addr,
                received: reply,
            };
            tracing::warn!("[Client {}] {}", self.port(), err);
            self.buffers.release();
            self.state = ClientState::None;
            return;
        }

        match self.state {
            ClientState::None | ClientState::ReceiveData => {
                self.state = ClientState::StartConnection;
                tracing::info!("[Client {}] Opened the socket {}.", self.port(), addr);
                self.run(shared);
            },
            ClientState::ReceiveResponseMetaData => {
                if let Err(err) = self.socket().and_then(|s| s.connect(&addr)) {
                    tracing::error!(
                        "[Client {}] {}, prepares to disconnect from socket {}.",
                        self.port(),
                        err,
                        addr
                    );
                    shared.request_shutdown();
                    return;
                }
                self.state = ClientState::SendRequestMetaData;
            },
            other => {
                tracing::debug!(
                    "[Client {}] Rendezvous finished in state {}, nothing to resume.",
                    self.port(),
                    other
                );
            },
        }
    }

    /// One rendezvous exchange: send our address, read the server's answer.
    fn rendezvous(&mut self, addr: &str) -> Result<String> {
        let server_addr = self.server_addr.clone();
        let socket = self.socket()?;

        socket.connect(&server_addr)?;
        let result = socket.send(addr.as_bytes()).and_then(|()| socket.recv());
        socket.disconnect(&server_addr);

        let reply = result?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}
