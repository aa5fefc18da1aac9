//! Framed RPC transport: a thread-per-connection TCP server and a
//! pooled client.
//!
//! Every message is a bincode-encoded [`RpcRequest`]/[`RpcResponse`]
//! wrapped in the segment framing of [`framing`](crate::framing). The
//! receive path accumulates bytes until [`check_stream_complete`] says a
//! whole stream arrived; a malformed stream closes the connection.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arachne_common::utils::error::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::framing::{check_stream_complete, frame_payload, unframe_payload, StreamStatus};
use crate::messages::{RpcRequest, RpcResponse};
use crate::produce::ProduceServer;

fn encode_framed<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::RpcDecode(format!("encode: {e}")))?;
    Ok(frame_payload(&payload))
}

fn decode_payload<T: DeserializeOwned>(stream: &[u8]) -> Result<T> {
    let payload = unframe_payload(stream)?;
    let (value, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())
        .map_err(|e| Error::RpcDecode(format!("decode: {e}")))?;
    Ok(value)
}

/// Reads from `stream` until `buffer` holds one complete framed message,
/// then splits it off and returns it. `Ok(None)` means the peer closed
/// cleanly between messages.
fn read_framed(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
    let mut chunk = [0u8; 8192];
    loop {
        if !buffer.is_empty() {
            let info = check_stream_complete(buffer);
            match info.status {
                StreamStatus::Complete => {
                    let rest = buffer.split_off(info.stream_size);
                    let message = std::mem::replace(buffer, rest);
                    return Ok(Some(message));
                }
                StreamStatus::Partial => {}
                StreamStatus::Invalid => {
                    return Err(Error::Framing("invalid stream on connection"));
                }
            }
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(Error::Framing("connection closed mid-stream"));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// The control-plane RPC server of one worker.
///
/// Accepts connections on a listener thread and serves each on its own
/// thread; request handling delegates to the [`ProduceServer`].
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Binds and starts serving. Use port 0 to let the OS pick one;
    /// [`local_addr`](Self::local_addr) reports the result.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot bind.
    pub fn bind(produce: Arc<ProduceServer>, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_shutdown = Arc::clone(&shutdown);
        let accept_handle = std::thread::Builder::new()
            .name("arachne-rpc-accept".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if accept_shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            let produce = Arc::clone(&produce);
                            let spawned = std::thread::Builder::new()
                                .name("arachne-rpc-conn".to_string())
                                .spawn(move || handle_connection(stream, &produce));
                            if let Err(e) = spawned {
                                tracing::warn!("failed to spawn connection thread: {e}");
                            }
                        }
                        Err(e) => tracing::warn!("accept failed: {e}"),
                    }
                }
            })?;

        Ok(Self {
            local_addr,
            shutdown,
            accept_handle: Some(accept_handle),
        })
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections. In-flight connections finish their
    /// current request.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wake the accept loop with a throwaway connection.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_connection(mut stream: TcpStream, produce: &ProduceServer) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    tracing::debug!("connection from {peer}");
    let mut buffer = Vec::new();
    loop {
        let message = match read_framed(&mut stream, &mut buffer) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("closing connection from {peer}: {e}");
                break;
            }
        };
        let response = match decode_payload::<RpcRequest>(&message) {
            Ok(request) => dispatch(produce, request),
            Err(e) => RpcResponse::Failure {
                message: e.to_string(),
            },
        };
        let bytes = match encode_framed(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("failed to encode response for {peer}: {e}");
                break;
            }
        };
        if let Err(e) = stream.write_all(&bytes) {
            tracing::debug!("write to {peer} failed: {e}");
            break;
        }
    }
}

fn dispatch(produce: &ProduceServer, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::RemotePull(req) => RpcResponse::RemotePull(produce.remote_pull(&req)),
        RpcRequest::TransactionCommandAdvanced { tx_id } => {
            produce.transaction_command_advanced(tx_id);
            RpcResponse::TransactionCommandAdvanced
        }
        RpcRequest::OldestActive { tx_id } => {
            produce.clear_transactional_cache(tx_id);
            RpcResponse::OldestActive
        }
    }
}

/// One client connection.
pub struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    /// Connects to a server.
    ///
    /// # Errors
    ///
    /// Fails when the connection cannot be established.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr)?,
            buffer: Vec::new(),
        })
    }

    /// Sends one request and waits for its response.
    ///
    /// # Errors
    ///
    /// Fails on transport, framing or decode errors.
    pub fn call(&mut self, request: &RpcRequest) -> Result<RpcResponse> {
        let bytes = encode_framed(request)?;
        self.stream.write_all(&bytes)?;
        match read_framed(&mut self.stream, &mut self.buffer)? {
            Some(message) => decode_payload(&message),
            None => Err(Error::Framing("server closed the connection")),
        }
    }
}

/// A pool of connections to one server. Checked-out clients return to
/// the pool on success and are dropped on error.
pub struct ClientPool {
    addr: String,
    clients: Mutex<Vec<Client>>,
}

impl ClientPool {
    /// Creates a pool targeting `addr`. Connections are opened lazily.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Runs `f` with a pooled (or fresh) connection.
    ///
    /// # Errors
    ///
    /// Propagates connect errors and whatever `f` fails with.
    pub fn with<T>(&self, f: impl FnOnce(&mut Client) -> Result<T>) -> Result<T> {
        let mut client = match self.clients.lock().pop() {
            Some(client) => client,
            None => Client::connect(&self.addr)?,
        };
        match f(&mut client) {
            Ok(out) => {
                self.clients.lock().push(client);
                Ok(out)
            }
            // The connection may be desynchronized; let it drop.
            Err(e) => Err(e),
        }
    }
}
