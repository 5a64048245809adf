//! Region endpoint: socket service, client, and the allocator seam.
//!
//! The region server publishes a reachable `(address, auth-key)` endpoint.
//! Executor processes connect, present the fixed auth key, and exchange
//! newline-delimited JSON frames to allocate and release segments. The
//! payload bytes themselves never travel over the socket: producers attach
//! read-write by name and copy locally.

use crate::error::{RegionError, RegionResult};
use crate::region::RegionServer;
use comet::config::EndpointConfig;
use comet::value::Scalar;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on the handshake key length.
const MAX_AUTH_KEY_LEN: u32 = 1024;

/// Allocation primitives the tracker client consumes.
///
/// Implemented by [`RegionClient`] (socket path, executor processes) and
/// [`LocalRegion`] (in-process path, single-process deployments and tests).
pub trait RegionAllocator: Send {
    /// Reserve a segment for `size` payload bytes; returns its name.
    fn allocate_segment(&mut self, size: usize) -> RegionResult<String>;

    /// Reserve a segment laid out as a shareable sequence; returns its name.
    fn allocate_sequence(&mut self, items: &[Scalar]) -> RegionResult<String>;

    /// Release a named segment back to the server.
    fn release(&mut self, name: &str) -> RegionResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
enum RegionRequest {
    Allocate { size: usize },
    AllocateSequence { items: Vec<Scalar> },
    Release { name: String },
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
enum RegionResponse {
    Name { name: String },
    Done,
    Error { kind: String, detail: String },
}

fn error_to_wire(e: &RegionError) -> RegionResponse {
    let kind = match e {
        RegionError::OutOfSharedMemory { .. } => "out_of_shared_memory",
        RegionError::NoSuchSegment { .. } => "no_such_segment",
        RegionError::InvalidSize { .. } => "invalid_size",
        RegionError::AlreadyExists { .. } => "already_exists",
        _ => "internal",
    };
    RegionResponse::Error {
        kind: kind.to_string(),
        detail: e.to_string(),
    }
}

fn error_from_wire(kind: &str, detail: String) -> RegionError {
    match kind {
        "out_of_shared_memory" => RegionError::OutOfSharedMemory { requested: 0 },
        "no_such_segment" => RegionError::NoSuchSegment { name: detail },
        "invalid_size" => RegionError::InvalidSize { size: 0 },
        _ => RegionError::Protocol { detail },
    }
}

/// Socket front-end for a [`RegionServer`].
pub struct RegionService {
    server: Arc<Mutex<RegionServer>>,
    auth_key: Vec<u8>,
    stop: Arc<AtomicBool>,
}

impl RegionService {
    /// Wrap a server with the auth key clients must present.
    pub fn new(server: Arc<Mutex<RegionServer>>, auth_key: Vec<u8>) -> Self {
        Self {
            server,
            auth_key,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind the listener for the configured endpoint.
    pub fn bind(endpoint: &EndpointConfig) -> RegionResult<TcpListener> {
        let listener = TcpListener::bind(endpoint.address())?;
        info!(address = %endpoint.address(), "region endpoint listening");
        Ok(listener)
    }

    /// Flag used to stop the accept loop from outside.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Accept-and-serve loop. Returns once a `Shutdown` frame arrives or
    /// the stop flag is raised; every owned segment is released before
    /// returning.
    pub fn serve(&self, listener: TcpListener) -> RegionResult<()> {
        listener.set_nonblocking(true)?;

        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "region client connected");
                    let server = Arc::clone(&self.server);
                    let auth_key = self.auth_key.clone();
                    let stop = Arc::clone(&self.stop);
                    std::thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, server, &auth_key, &stop) {
                            debug!(error = %e, "region connection closed");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(RegionError::Io { source: e }),
            }
        }

        self.server.lock().shutdown();
        Ok(())
    }
}

fn handle_connection(
    mut stream: TcpStream,
    server: Arc<Mutex<RegionServer>>,
    auth_key: &[u8],
    stop: &AtomicBool,
) -> RegionResult<()> {
    stream.set_nonblocking(false)?;

    // Handshake: length-prefixed key, single ack byte.
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let key_len = u32::from_le_bytes(len_bytes);
    if key_len > MAX_AUTH_KEY_LEN {
        return Err(RegionError::AuthRejected);
    }
    let mut presented = vec![0u8; key_len as usize];
    stream.read_exact(&mut presented)?;
    if presented != auth_key {
        warn!("region client rejected: bad auth key");
        stream.write_all(&[0])?;
        return Err(RegionError::AuthRejected);
    }
    stream.write_all(&[1])?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(()); // client hung up
        }
        let request: RegionRequest = serde_json::from_str(line.trim_end())?;

        let response = match request {
            RegionRequest::Allocate { size } => {
                match server.lock().allocate_segment(size) {
                    // The buffer is dropped here; the producer attaches
                    // read-write by name to fill the payload.
                    Ok((name, _buffer)) => RegionResponse::Name { name },
                    Err(e) => error_to_wire(&e),
                }
            }
            RegionRequest::AllocateSequence { items } => {
                match server.lock().allocate_sequence(&items) {
                    Ok((name, _buffer)) => RegionResponse::Name { name },
                    Err(e) => error_to_wire(&e),
                }
            }
            RegionRequest::Release { name } => match server.lock().release(&name) {
                Ok(()) => RegionResponse::Done,
                Err(e) => error_to_wire(&e),
            },
            RegionRequest::Shutdown => {
                stop.store(true, Ordering::Release);
                write_frame(reader.get_mut(), &RegionResponse::Done)?;
                return Ok(());
            }
        };

        write_frame(reader.get_mut(), &response)?;
    }
}

fn write_frame(stream: &mut TcpStream, response: &RegionResponse) -> RegionResult<()> {
    let mut frame = serde_json::to_string(response)?;
    frame.push('\n');
    stream.write_all(frame.as_bytes())?;
    Ok(())
}

/// Socket client for the region endpoint.
pub struct RegionClient {
    reader: BufReader<TcpStream>,
}

impl RegionClient {
    /// Connect and authenticate against the endpoint.
    pub fn connect(endpoint: &EndpointConfig) -> RegionResult<Self> {
        let mut stream = TcpStream::connect(endpoint.address())?;

        stream.write_all(&(endpoint.auth_key.len() as u32).to_le_bytes())?;
        stream.write_all(&endpoint.auth_key)?;
        let mut ack = [0u8; 1];
        stream.read_exact(&mut ack)?;
        if ack[0] != 1 {
            return Err(RegionError::AuthRejected);
        }

        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    fn exchange(&mut self, request: &RegionRequest) -> RegionResult<RegionResponse> {
        let mut frame = serde_json::to_string(request)?;
        frame.push('\n');
        self.reader.get_mut().write_all(frame.as_bytes())?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(RegionError::Protocol {
                detail: "endpoint closed connection".to_string(),
            });
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    fn expect_name(&mut self, request: &RegionRequest) -> RegionResult<String> {
        match self.exchange(request)? {
            RegionResponse::Name { name } => Ok(name),
            RegionResponse::Error { kind, detail } => Err(error_from_wire(&kind, detail)),
            RegionResponse::Done => Err(RegionError::Protocol {
                detail: "expected a segment name".to_string(),
            }),
        }
    }

    /// Ask the server to shut down, releasing every segment it owns.
    pub fn shutdown_server(&mut self) -> RegionResult<()> {
        match self.exchange(&RegionRequest::Shutdown)? {
            RegionResponse::Done => Ok(()),
            RegionResponse::Error { kind, detail } => Err(error_from_wire(&kind, detail)),
            RegionResponse::Name { .. } => Err(RegionError::Protocol {
                detail: "unexpected name reply to shutdown".to_string(),
            }),
        }
    }
}

impl RegionAllocator for RegionClient {
    fn allocate_segment(&mut self, size: usize) -> RegionResult<String> {
        self.expect_name(&RegionRequest::Allocate { size })
    }

    fn allocate_sequence(&mut self, items: &[Scalar]) -> RegionResult<String> {
        self.expect_name(&RegionRequest::AllocateSequence {
            items: items.to_vec(),
        })
    }

    fn release(&mut self, name: &str) -> RegionResult<()> {
        match self.exchange(&RegionRequest::Release {
            name: name.to_string(),
        })? {
            RegionResponse::Done => Ok(()),
            RegionResponse::Error { kind, detail } => Err(error_from_wire(&kind, detail)),
            RegionResponse::Name { .. } => Err(RegionError::Protocol {
                detail: "unexpected name reply to release".to_string(),
            }),
        }
    }
}

/// In-process allocator sharing a [`RegionServer`] directly.
#[derive(Clone)]
pub struct LocalRegion {
    inner: Arc<Mutex<RegionServer>>,
}

impl LocalRegion {
    /// Wrap a fresh server.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegionServer::new())),
        }
    }

    /// Shared handle to the underlying server.
    pub fn server(&self) -> Arc<Mutex<RegionServer>> {
        Arc::clone(&self.inner)
    }

    /// Release every owned segment.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown();
    }
}

impl Default for LocalRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionAllocator for LocalRegion {
    fn allocate_segment(&mut self, size: usize) -> RegionResult<String> {
        let (name, _buffer) = self.inner.lock().allocate_segment(size)?;
        Ok(name)
    }

    fn allocate_sequence(&mut self, items: &[Scalar]) -> RegionResult<String> {
        let (name, _buffer) = self.inner.lock().allocate_sequence(items)?;
        Ok(name)
    }

    fn release(&mut self, name: &str) -> RegionResult<()> {
        self.inner.lock().release(name)
    }
}
