//! TCP transport implementation for SimSync.
//!
//! Each message travels as one frame: a big-endian `u32` length followed by
//! the payload bytes. Sockets connect lazily: the stream is opened on the
//! first send and the attempt is repeated until the peer is listening or the
//! context shuts down, so a client may connect before the server has bound
//! the session address.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Buf, BufMut, BytesMut};

use super::{Socket, Transport, TransportContext, TransportKind};
use crate::config::TcpConfig;
use crate::error::{Result, SimSyncError};

const HEADER_LEN: usize = 4;

/// Write `payload` as one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds u32 length prefix", payload.len()),
        )
    })?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);

    writer.write_all(&frame)?;
    writer.flush()
}

/// Read one length-prefixed frame of at most `max_len` bytes.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let len = (&header[..]).get_u32() as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {max_len}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Strip the `tcp://` scheme and resolve the address.
fn resolve(addr: &str) -> Result<SocketAddr> {
    let host = addr.strip_prefix("tcp://").unwrap_or(addr);
    host.to_socket_addrs()
        .map_err(|e| SimSyncError::Transport(format!("Invalid address {addr}: {e}")))?
        .next()
        .ok_or_else(|| SimSyncError::Transport(format!("Address {addr} did not resolve")))
}

/// TCP transport backend.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

impl Transport for TcpTransport {
    fn open_context(&self) -> Result<Arc<dyn TransportContext>> {
        Ok(Arc::new(TcpContext::new(self.config.clone())))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }
}

struct ContextInner {
    id: String,
    config: TcpConfig,
    closed: AtomicBool,
    next_token: AtomicU64,
    /// Clones of every open stream, kept so shutdown can unblock readers
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl ContextInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn register(&self, stream: &TcpStream) -> Result<u64> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, stream.try_clone()?);

        // shutdown() may have swept the table before the insert
        if self.is_closed() {
            self.unregister(token);
            return Err(SimSyncError::ContextTerminated);
        }
        Ok(token)
    }

    fn unregister(&self, token: u64) {
        let stream = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
        if let Some(stream) = stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Context owning the TCP streams of one connection lifetime.
pub struct TcpContext {
    inner: Arc<ContextInner>,
}

impl TcpContext {
    /// Create a context with the given settings.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: uuid::Uuid::new_v4().to_string(),
                config,
                closed: AtomicBool::new(false),
                next_token: AtomicU64::new(0),
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl TransportContext for TcpContext {
    fn socket(&self) -> Result<Box<dyn Socket>> {
        if self.inner.is_closed() {
            return Err(SimSyncError::ContextTerminated);
        }
        Ok(Box::new(TcpSocket {
            ctx: Arc::clone(&self.inner),
            peer: None,
            conn: None,
        }))
    }

    fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let streams: Vec<TcpStream> = self
            .inner
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, stream)| stream)
            .collect();

        tracing::debug!(
            "TCP context {} shutting down {} stream(s)",
            self.inner.id,
            streams.len()
        );
        for stream in streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_shut_down(&self) -> bool {
        self.inner.is_closed()
    }

    fn id(&self) -> &str {
        &self.inner.id
    }
}

struct TcpSocket {
    ctx: Arc<ContextInner>,
    peer: Option<String>,
    conn: Option<(u64, TcpStream)>,
}

impl TcpSocket {
    fn drop_connection(&mut self) {
        if let Some((token, _)) = self.conn.take() {
            self.ctx.unregister(token);
        }
    }

    fn io_error(&mut self, context: &str, err: &io::Error) -> SimSyncError {
        self.drop_connection();
        if self.ctx.is_closed() {
            return SimSyncError::ContextTerminated;
        }
        SimSyncError::Transport(format!(
            "{context} {}: {err}",
            self.peer.as_deref().unwrap_or("<none>")
        ))
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.ctx.is_closed() {
            return Err(SimSyncError::ContextTerminated);
        }

        if self.conn.is_none() {
            let peer = self.peer.clone().ok_or(SimSyncError::NotConnected)?;
            let target = resolve(&peer)?;

            let stream = loop {
                if self.ctx.is_closed() {
                    return Err(SimSyncError::ContextTerminated);
                }
                match TcpStream::connect(target) {
                    Ok(stream) => break stream,
                    Err(e) => {
                        tracing::trace!("Connect to {} failed ({}), retrying", peer, e);
                        std::thread::sleep(self.ctx.config.connect_retry());
                    },
                }
            };
            stream.set_nodelay(true)?;

            let token = self.ctx.register(&stream)?;
            self.conn = Some((token, stream));
        }

        match self.conn.as_mut() {
            Some((_, stream)) => Ok(stream),
            None => Err(SimSyncError::NotConnected),
        }
    }
}

impl Socket for TcpSocket {
    fn connect(&mut self, addr: &str) -> Result<()> {
        if self.ctx.is_closed() {
            return Err(SimSyncError::ContextTerminated);
        }
        if self.peer.as_deref() == Some(addr) {
            return Ok(());
        }

        resolve(addr)?;
        self.drop_connection();
        self.peer = Some(addr.to_string());
        Ok(())
    }

    fn disconnect(&mut self, addr: &str) {
        if self.peer.as_deref() == Some(addr) {
            self.drop_connection();
            self.peer = None;
        }
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let result = write_frame(self.stream()?, payload);
        result.map_err(|e| self.io_error("Send to", &e))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let max_len = self.ctx.config.max_frame_len;
        let stream = match self.conn.as_mut() {
            Some((_, stream)) => stream,
            None if self.ctx.is_closed() => return Err(SimSyncError::ContextTerminated),
            None => return Err(SimSyncError::NotConnected),
        };

        let result = read_frame(stream, max_len);
        result.map_err(|e| self.io_error("Receive from", &e))
    }

    fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        self.drop_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"{}").unwrap();
        assert_eq!(wire, vec![0, 0, 0, 2, b'{', b'}']);

        let payload = read_frame(&mut Cursor::new(wire), 16).unwrap();
        assert_eq!(payload, b"{}");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[7u8; 32]).unwrap();

        let err = read_frame(&mut Cursor::new(wire), 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame_fails() {
        let err = read_frame(&mut Cursor::new(vec![0, 0, 0, 9, 1, 2]), 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_resolve_strips_scheme() {
        let addr = resolve("tcp://127.0.0.1:7000").unwrap();
        assert_eq!(addr.port(), 7000);
        assert!(resolve("tcp://not an address").is_err());
    }

    #[test]
    fn test_socket_after_shutdown() {
        let context = TcpContext::new(TcpConfig::default());
        let mut socket = context.socket().unwrap();
        socket.connect("tcp://127.0.0.1:7000").unwrap();

        context.shutdown();
        assert!(context.is_shut_down());
        assert!(matches!(
            socket.send(b"x"),
            Err(SimSyncError::ContextTerminated)
        ));
        assert!(matches!(
            context.socket(),
            Err(SimSyncError::ContextTerminated)
        ));
    }

    #[test]
    fn test_disconnect_other_peer_is_noop() {
        let context = TcpContext::new(TcpConfig::default());
        let mut socket = context.socket().unwrap();
        socket.connect("tcp://127.0.0.1:7000").unwrap();

        socket.disconnect("tcp://127.0.0.1:7001");
        assert_eq!(socket.peer(), Some("tcp://127.0.0.1:7000"));

        socket.disconnect("tcp://127.0.0.1:7000");
        assert_eq!(socket.peer(), None);
    }
}
