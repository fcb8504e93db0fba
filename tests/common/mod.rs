//! Shared fixtures for the end-to-end tests: a scripted in-process server and
//! counting domain hooks.

#![allow(dead_code)]

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use simsync::transport::MemoryListener;
use simsync::{
    BufferSizes, Client, ClientConfig, ClientState, DomainHooks, MemoryNetwork, RequestedSizes,
};

/// Well-known rendezvous address of the mock server
pub const SERVER_ADDR: &str = "inproc://server";

/// Host the clients announce
pub const CLIENT_HOST: &str = "inproc://sim";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client configuration with short delays for tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        server_addr: SERVER_ADDR.to_string(),
        host: CLIENT_HOST.to_string(),
        reconnect_delay_ms: 10,
        shutdown_grace_ms: 200,
        ..ClientConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Wait for the client to reach `state`.
pub fn wait_for_state<H: DomainHooks>(client: &Client<H>, state: ClientState) -> bool {
    wait_until(Duration::from_secs(5), || client.state() == state)
}

/// How the mock server answers.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Fixed rendezvous answer; `None` echoes the announced address
    pub rendezvous_reply: Option<String>,
    /// `(send, receive)` declared per metadata round; the last entry repeats
    pub meta_replies: Vec<(usize, usize)>,
    /// Data exchange (1-based) whose reply carries a NaN in slot 0
    pub invalidate_tick: Option<usize>,
    /// Drop rendezvous requests without answering
    pub drop_rendezvous: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            rendezvous_reply: None,
            meta_replies: vec![(3, 2)],
            invalidate_tick: None,
            drop_rendezvous: false,
        }
    }
}

/// Everything the mock server saw.
#[derive(Debug, Clone, Default)]
pub struct ServerLog {
    pub rendezvous: Vec<String>,
    pub meta_data: Vec<String>,
    pub data_frames: Vec<Vec<f64>>,
    pub terminations: usize,
}

/// Scripted server on a [`MemoryNetwork`].
pub struct MockServer {
    network: MemoryNetwork,
    log: Arc<Mutex<ServerLog>>,
    sessions: Arc<Mutex<Vec<String>>>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    rendezvous: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start(network: &MemoryNetwork, script: ServerScript) -> Self {
        let listener = network.bind(SERVER_ADDR).unwrap();
        let mut server = Self {
            network: network.clone(),
            log: Arc::default(),
            sessions: Arc::default(),
            threads: Arc::default(),
            rendezvous: None,
        };

        let network = server.network.clone();
        let log = Arc::clone(&server.log);
        let sessions = Arc::clone(&server.sessions);
        let threads = Arc::clone(&server.threads);
        let handle = thread::spawn(move || {
            rendezvous_loop(listener, &network, &script, &log, &sessions, &threads);
        });
        server.rendezvous = Some(handle);
        server
    }

    pub fn log(&self) -> ServerLog {
        self.log.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.network.unbind(SERVER_ADDR);
        if let Some(handle) = self.rendezvous.take() {
            let _ = handle.join();
        }
        for addr in self.sessions.lock().unwrap().drain(..) {
            self.network.unbind(&addr);
        }
        let handles: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn rendezvous_loop(
    mut listener: MemoryListener,
    network: &MemoryNetwork,
    script: &ServerScript,
    log: &Arc<Mutex<ServerLog>>,
    sessions: &Arc<Mutex<Vec<String>>>,
    threads: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    while let Some(request) = listener.recv() {
        let announced = String::from_utf8_lossy(request.payload()).into_owned();
        log.lock().unwrap().rendezvous.push(announced.clone());
        if script.drop_rendezvous {
            drop(request);
            continue;
        }

        let reply = match &script.rendezvous_reply {
            Some(reply) => reply.clone(),
            None => {
                if !network.is_bound(&announced) {
                    let session = network.bind(&announced).unwrap();
                    sessions.lock().unwrap().push(announced.clone());

                    let script = script.clone();
                    let log = Arc::clone(log);
                    let handle = thread::spawn(move || session_loop(session, &script, &log));
                    threads.lock().unwrap().push(handle);
                }
                announced
            },
        };
        request.respond(reply.into_bytes());
    }
}

fn session_loop(mut listener: MemoryListener, script: &ServerScript, log: &Arc<Mutex<ServerLog>>) {
    let mut round = 0;
    let mut receive_size = 0;
    let mut tick = 0;

    while let Some(request) = listener.recv() {
        let payload = request.payload();

        if payload == b"{}" {
            log.lock().unwrap().terminations += 1;
            request.respond(Vec::new());
            continue;
        }

        if serde_json::from_slice::<Value>(payload).is_ok_and(|v| v.is_object()) {
            let text = String::from_utf8_lossy(payload).into_owned();
            log.lock().unwrap().meta_data.push(text);

            let index = round.min(script.meta_replies.len().saturating_sub(1));
            let (send, receive) = script.meta_replies.get(index).copied().unwrap_or((1, 1));
            round += 1;
            receive_size = receive;

            let reply = json!({ "send_size": send, "receive_size": receive });
            request.respond(reply.to_string().into_bytes());
            continue;
        }

        let frame: Vec<f64> = payload
            .chunks_exact(8)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        log.lock().unwrap().data_frames.push(frame);
        tick += 1;

        let mut reply = vec![tick as f64; receive_size];
        if let Some(first) = reply.first_mut() {
            *first = if script.invalidate_tick == Some(tick) { f64::NAN } else { 0.0 };
        }
        let bytes: Vec<u8> = reply.iter().flat_map(|v| v.to_le_bytes()).collect();
        request.respond(bytes);
    }
}

/// How often each hook ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookCounts {
    pub init_objects: usize,
    pub bind_request: usize,
    pub response_meta: usize,
    pub bind_response: usize,
    pub init_streaming: usize,
    pub bind_send: usize,
    pub bind_receive: usize,
    pub clean_up: usize,
}

/// Pauses a hook until the test lets it go.
pub struct HookGate {
    pub entered: mpsc::Sender<()>,
    pub release: mpsc::Receiver<()>,
}

/// Domain hooks that read the sizes from `{"send_size", "receive_size"}`
/// responses and count every call.
pub struct ScriptedHooks {
    pub requested: RequestedSizes,
    pub accept_objects: bool,
    pub server_sizes: BufferSizes,
    pub counts: HookCounts,
    pub last_receive: Vec<f64>,
    /// Held in every `bind_send_data`
    pub send_gate: Option<HookGate>,
    /// Held once, in the next `bind_request_meta_data`
    pub request_gate: Option<HookGate>,
}

impl HookGate {
    fn pass(&self) {
        let _ = self.entered.send(());
        let _ = self.release.recv();
    }
}

impl ScriptedHooks {
    pub fn new(requested: RequestedSizes) -> Self {
        Self {
            requested,
            accept_objects: true,
            server_sizes: BufferSizes::default(),
            counts: HookCounts::default(),
            last_receive: Vec::new(),
            send_gate: None,
            request_gate: None,
        }
    }
}

impl DomainHooks for ScriptedHooks {
    fn init_objects(&mut self) -> bool {
        self.counts.init_objects += 1;
        self.accept_objects
    }

    fn bind_request_meta_data(&mut self) -> String {
        self.counts.bind_request += 1;
        if let Some(gate) = self.request_gate.take() {
            gate.pass();
        }
        json!({ "client": "scripted", "round": self.counts.bind_request }).to_string()
    }

    fn compute_request_buffer_sizes(&self) -> RequestedSizes {
        self.requested
    }

    fn compute_response_meta_data(&mut self, response: &str) -> bool {
        self.counts.response_meta += 1;
        let Ok(value) = serde_json::from_str::<Value>(response) else {
            return false;
        };
        let field = |name: &str| value[name].as_u64().map(|v| v as usize);
        match (field("send_size"), field("receive_size")) {
            (Some(send), Some(receive)) => {
                self.server_sizes = BufferSizes::new(send, receive);
                true
            },
            _ => false,
        }
    }

    fn bind_response_meta_data(&mut self) {
        self.counts.bind_response += 1;
    }

    fn compute_response_buffer_sizes(&self) -> BufferSizes {
        self.server_sizes
    }

    fn init_send_and_receive_data(&mut self) {
        self.counts.init_streaming += 1;
    }

    fn bind_send_data(&mut self, send: &mut [f64]) {
        self.counts.bind_send += 1;
        for (i, slot) in send.iter_mut().enumerate().skip(1) {
            *slot = (self.counts.bind_send * 10 + i) as f64;
        }
        if let Some(gate) = &self.send_gate {
            gate.pass();
        }
    }

    fn bind_receive_data(&mut self, receive: &[f64]) {
        self.counts.bind_receive += 1;
        self.last_receive = receive.to_vec();
    }

    fn clean_up(&mut self) {
        self.counts.clean_up += 1;
    }
}
