//! SimSync client.
//!
//! [`Client`] is the entry point a simulation binding drives: `connect` once,
//! call `communicate` every simulation tick, `disconnect` at the end. Work that
//! would block the tick (rendezvous, metadata exchange) runs on two background
//! units; the tick itself only advances the engine when it is ready to
//! stream.
//!
//! # Lifecycle
//!
//! ```text
//! connect(host, port)
//!     └─ connect unit: rendezvous ─> StartConnection ─> BindRequestMetaData
//!            └─ metadata unit: SendRequestMetaData ─> ... ─> BindResponseMetaData
//! communicate(false)   (each tick once InitSendAndReceiveData is reached)
//!     └─ BindSendData ─> SendData ─> ReceiveData ─> BindReceiveData
//! communicate(true)    (new metadata round, e.g. after the scene changed)
//! disconnect()
//!     └─ closing pass (sends `{}`), context shutdown, units joined
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use simsync::{Client, TcpTransport};
//!
//! let client = Client::new(MyHooks::default(), TcpTransport::default());
//! client.connect("tcp://127.0.0.1", "5000")?;
//!
//! loop {
//!     client.communicate(false)?;
//!     // step the simulation
//! }
//!
//! client.disconnect();
//! ```

mod machine;
mod worker;

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError, TryLockError};

use machine::{Machine, Shared};
use worker::Watchdog;

use crate::config::ClientConfig;
use crate::error::{Result, SimSyncError};
use crate::protocol::{BufferStats, ClientState, DomainHooks, SessionEndpoint};
use crate::transport::{Transport, TransportKind};

/// Client-side protocol engine for one simulation participant.
pub struct Client<H: DomainHooks> {
    shared: Arc<Shared<H>>,
    transport: Arc<dyn Transport>,
}

impl<H: DomainHooks> Client<H> {
    /// Create a client with default configuration.
    pub fn new(hooks: H, transport: impl Transport + 'static) -> Self {
        Self::with_config(hooks, transport, ClientConfig::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(hooks: H, transport: impl Transport + 'static, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(hooks, config)),
            transport: Arc::new(transport),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Start a session for `host:port`.
    ///
    /// Tears down any previous session, asks the hooks to `init_objects`,
    /// opens a fresh transport context and launches the rendezvous in the
    /// background. Returns once the rendezvous unit is running.
    pub fn connect(&self, host: &str, port: &str) -> Result<()> {
        let endpoint = SessionEndpoint::new(host, port)?;
        self.connect_endpoint(endpoint)
    }

    /// [`connect`](Self::connect) using the configured default host.
    pub fn connect_port(&self, port: &str) -> Result<()> {
        let endpoint = SessionEndpoint::new(self.shared.config.host.clone(), port)?;
        self.connect_endpoint(endpoint)
    }

    /// Run the connect sequence again for the last endpoint.
    pub fn reconnect(&self) -> Result<()> {
        let endpoint = self.endpoint().ok_or(SimSyncError::NotConnected)?;
        self.connect_endpoint(endpoint)
    }

    fn connect_endpoint(&self, endpoint: SessionEndpoint) -> Result<()> {
        let address = endpoint.address();
        if let Some(kind) = TransportKind::from_address(&address) {
            if kind != self.transport.kind() {
                return Err(SimSyncError::Config(format!(
                    "Address {address} needs the {kind} transport, client uses {}",
                    self.transport.kind()
                )));
            }
        }

        if self.shared.has_context() {
            self.disconnect();
        }
        // New connection lifetime
        self.shared.shutdown.store(false, Ordering::Release);

        let mut machine = self.shared.lock_machine();
        let port = endpoint.port.clone();
        machine.reset(endpoint);

        if !machine.hooks_mut().init_objects() {
            tracing::warn!("[Client {}] Domain objects failed to initialize.", port);
            return Err(SimSyncError::HookRejected(
                "init_objects returned false".to_string(),
            ));
        }

        let context = self.transport.open_context()?;
        machine.attach(context.socket()?);
        tracing::debug!(
            "[Client {}] Opened {} transport context {}.",
            port,
            self.transport.name(),
            context.id()
        );
        *self
            .shared
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(context);

        self.shared.start_connect_unit()
    }

    /// Force a metadata round on the calling thread.
    pub fn send_and_receive_meta_data(&self) -> Result<()> {
        if self.shared.is_shutting_down() {
            return Err(SimSyncError::ShutDown);
        }

        // A round the metadata unit already owns must not run twice
        self.shared.meta_data_unit.wait_for_finish();

        let mut machine = self.shared.lock_machine();
        if !machine.is_attached()
            || machine.state() == ClientState::None
            || machine.state() == ClientState::StartConnection
            || machine.state().is_receiving()
        {
            return Err(SimSyncError::NotConnected);
        }
        if self.shared.meta_data_unit.is_running() {
            // Spawned while we waited for the lock; its round is this round
            drop(machine);
            self.shared.meta_data_unit.wait_for_finish();
            return self.check_alive();
        }
        machine.send_and_receive_meta_data(&self.shared);
        drop(machine);

        self.check_alive()
    }

    /// Advance the engine by one tick.
    ///
    /// With `resend_meta_data` a fresh metadata round is started (the hooks
    /// are asked to `init_objects` again first). Otherwise one send/receive
    /// cycle runs if the session is streaming. While a background unit owns
    /// the engine the tick does nothing.
    pub fn communicate(&self, resend_meta_data: bool) -> Result<()> {
        if self.shared.is_shutting_down() {
            return Err(SimSyncError::ShutDown);
        }

        let mut machine = match self.shared.machine.try_lock() {
            Ok(machine) => machine,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::trace!("Engine busy in a background unit, skipping tick");
                return Ok(());
            },
        };

        if resend_meta_data {
            if !machine.hooks_mut().init_objects() {
                tracing::warn!("Domain objects failed to initialize for the new meta data round.");
            }
            match machine.state() {
                ClientState::BindSendData => self.restart_meta_data(&mut machine),
                ClientState::InitSendAndReceiveData => {
                    self.shared.meta_data_unit.wait_for_finish();
                    self.restart_meta_data(&mut machine);
                },
                _ => {},
            }
        } else if machine.state().is_streaming_ready() {
            machine.run(&self.shared);
        }
        drop(machine);

        self.check_alive()
    }

    fn restart_meta_data(&self, machine: &mut Machine<H>) {
        machine.hooks_mut().clean_up();
        machine.set_state(ClientState::BindRequestMetaData);
        machine.run(&self.shared);
    }

    fn check_alive(&self) -> Result<()> {
        if self.shared.is_shutting_down() {
            Err(SimSyncError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// End the session.
    ///
    /// Raises the shutdown flag, runs one closing pass (which sends the
    /// termination message when buffers are held), shuts the transport
    /// context down and joins both background units. Once the configured grace
    /// period passes the context is shut down early, which fails whatever
    /// transport call is still blocked, so the call always returns.
    pub fn disconnect(&self) {
        self.shared.request_shutdown();

        let shared = Arc::clone(&self.shared);
        let watchdog = Watchdog::arm("shutdown", self.shared.config.shutdown_grace(), move || {
            tracing::warn!("Shutdown grace period expired, interrupting the transport.");
            shared.interrupt_context();
        });
        if let Err(err) = &watchdog {
            tracing::warn!("Failed to arm the shutdown watchdog: {}", err);
        }

        {
            let mut machine = self.shared.lock_machine();
            machine.run(&self.shared);
        }

        let context = self
            .shared
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(context) = context {
            context.shutdown();
        }
        if let Ok(watchdog) = watchdog {
            watchdog.disarm();
        }

        self.shared.wait_for_units();

        if let Some(endpoint) = self.endpoint() {
            tracing::info!("[Client {}] Disconnected from {}.", endpoint.port, endpoint);
        }
    }

    /// Current protocol state. Blocks while a background unit runs.
    pub fn state(&self) -> ClientState {
        self.shared.lock_machine().state()
    }

    /// Endpoint of the current or last session.
    pub fn endpoint(&self) -> Option<SessionEndpoint> {
        self.shared.lock_machine().endpoint().cloned()
    }

    /// Request metadata of the latest round.
    pub fn request_meta_data(&self) -> String {
        self.shared.lock_machine().request_meta_data().to_string()
    }

    /// Response metadata of the latest round.
    pub fn response_meta_data(&self) -> String {
        self.shared.lock_machine().response_meta_data().to_string()
    }

    /// Buffer allocation counters and live sizes.
    pub fn buffer_stats(&self) -> BufferStats {
        self.shared.lock_machine().buffer_stats()
    }

    /// Whether the shutdown flag is raised.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Whether a transport context is held.
    pub fn is_connected(&self) -> bool {
        self.shared.has_context()
    }

    /// Whether either background unit is executing.
    pub fn has_background_activity(&self) -> bool {
        self.shared.connect_unit.is_running() || self.shared.meta_data_unit.is_running()
    }

    /// Block until both background units have finished.
    pub fn wait_for_background_units(&self) {
        self.shared.wait_for_units();
    }

    /// Run `f` with exclusive access to the hooks.
    pub fn with_hooks<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(self.shared.lock_machine().hooks_mut())
    }
}

impl<H: DomainHooks> Drop for Client<H> {
    fn drop(&mut self) {
        if self.shared.has_context() {
            self.disconnect();
        }
    }
}
