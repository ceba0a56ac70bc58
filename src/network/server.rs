//! RPC Server dengan thread-per-connection
//!
//! Accept loop memakai mio supaya bisa dibangunkan untuk shutdown
//! (`Waker`), sedangkan setiap koneksi dilayani oleh worker thread
//! dengan socket blocking dan snapshot registry miliknya sendiri.
//!
//! Snapshot diambil saat koneksi di-accept. Registrasi setelah itu
//! hanya terlihat oleh koneksi yang di-accept belakangan.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::TcpListener as MioTcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use super::Connection;
use crate::config::ServerConfig;
use crate::core::{Handler, Registry};
use crate::error::{Result, RpcError};
use crate::protocol::{Handle, Payload, RequestType, Status};

const SERVER_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);
const EVENTS_CAPACITY: usize = 128;
/// Poll timeout selama ada worker yang sudah signal exit tapi belum finished
const REAP_RETRY: Duration = Duration::from_millis(10);

/// What the worker loop does after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// RPC Server
///
/// - Listening: accept loop, tidak pernah menunggu worker
/// - Worker: satu thread per koneksi, request diproses serial
/// - Reaping: worker yang selesai membangunkan accept loop lewat `Waker`, lalu di-join
pub struct Server {
    poll: Poll,
    listener: MioTcpListener,
    local_addr: SocketAddr,
    registry: Arc<RwLock<Registry>>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    workers: Vec<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
    exited: Arc<AtomicUsize>,
    reaped: usize,
    next_conn_id: u64,
    config: ServerConfig,
}

/// Cloneable control handle for a server that may be running on another thread
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<RwLock<Registry>>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    live: Arc<AtomicUsize>,
    local_addr: SocketAddr,
}

/// Dropped when a worker thread ends, panic included
struct ExitSignal {
    exited: Arc<AtomicUsize>,
    waker: Arc<Waker>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.exited.fetch_add(1, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake accept loop");
        }
    }
}

impl Server {
    /// Bind ke `config.host:config.port`.
    ///
    /// Semua kegagalan di sini adalah startup failure; tidak ada server
    /// setengah jalan yang tertinggal.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.listen_addr()?;
        let listener = TcpListener::bind(addr).map_err(|e| RpcError::connection_failed(&addr, e))?;
        Self::from_listener(listener, config)
    }

    /// Serve on a listener the caller already bound. `config.host`/`port` are ignored.
    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let mut listener = MioTcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            poll,
            listener,
            local_addr,
            registry: Arc::new(RwLock::new(Registry::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
            workers: Vec::new(),
            live: Arc::new(AtomicUsize::new(0)),
            exited: Arc::new(AtomicUsize::new(0)),
            reaped: 0,
            next_conn_id: 0,
            config,
        })
    }

    /// Register atau replace function
    pub fn register<H: Handler>(&self, name: &str, handler: H) -> Result<Handle> {
        register_into(&self.registry, name, handler)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
            live: Arc::clone(&self.live),
            local_addr: self.local_addr,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Workers not yet reaped
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Run the accept loop on a dedicated thread
    pub fn spawn(mut self) -> Result<(ServerHandle, JoinHandle<Result<()>>)> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name("pigeon-accept".to_string())
            .spawn(move || self.serve())?;
        Ok((handle, join))
    }

    /// Run server accept loop sampai `ServerHandle::shutdown` dipanggil
    pub fn serve(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        info!(addr = %self.local_addr, "RPC server listening");

        while !self.shutdown.load(Ordering::Acquire) {
            // Worker signals exit sedikit sebelum thread-nya finished
            let timeout = self.exits_pending().then_some(REAP_RETRY);
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                if event.token() == SERVER_TOKEN {
                    self.accept_connections();
                }
            }

            self.reap_workers();
        }

        info!(
            addr = %self.local_addr,
            workers = self.workers.len(),
            "RPC server stopped accepting"
        );
        Ok(())
    }

    /// Accept semua koneksi yang pending
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.spawn_worker(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Per-connection failures (e.g. ECONNABORTED) must not stop the server
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn spawn_worker(&mut self, stream: mio::net::TcpStream, addr: SocketAddr) {
        let id = self.next_conn_id;
        self.next_conn_id += 1;

        // Convert mio TcpStream to std TcpStream
        #[cfg(unix)]
        let std_stream = {
            use std::os::unix::io::{FromRawFd, IntoRawFd};
            // SAFETY: into_raw_fd transfers sole ownership of the descriptor
            unsafe { TcpStream::from_raw_fd(stream.into_raw_fd()) }
        };

        #[cfg(windows)]
        let std_stream = {
            use std::os::windows::io::{FromRawSocket, IntoRawSocket};
            // SAFETY: into_raw_socket transfers sole ownership of the socket
            unsafe { TcpStream::from_raw_socket(stream.into_raw_socket()) }
        };

        let snapshot = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let nodelay = self.config.nodelay;
        let max_payload_len = self.config.max_payload_len;
        let exited = Arc::clone(&self.exited);
        let waker = Arc::clone(&self.waker);

        let spawned = thread::Builder::new()
            .name(format!("pigeon-conn-{}", id))
            .spawn(move || {
                let _exit = ExitSignal { exited, waker };
                run_worker(id, std_stream, snapshot, nodelay, max_payload_len)
            });

        match spawned {
            Ok(handle) => {
                debug!(conn = id, peer = %addr, "Accepted connection");
                self.workers.push(handle);
                self.live.fetch_add(1, Ordering::Release);
            }
            Err(e) => {
                // Socket is dropped (closed) together with the failed closure
                error!(conn = id, peer = %addr, error = %e, "Failed to spawn worker");
            }
        }
    }

    /// Join worker yang sudah selesai tanpa blocking
    fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.workers.drain(..).partition(|h| h.is_finished());
        self.workers = running;

        for handle in finished {
            self.reaped += 1;
            self.live.fetch_sub(1, Ordering::Release);
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }

    fn exits_pending(&self) -> bool {
        self.exited.load(Ordering::Acquire) > self.reaped
    }
}

impl ServerHandle {
    /// Registrasi saat server berjalan; hanya terlihat oleh koneksi baru
    pub fn register<H: Handler>(&self, name: &str, handler: H) -> Result<Handle> {
        register_into(&self.registry, name, handler)
    }

    /// Hentikan accept loop. Worker yang sedang berjalan tetap selesai sendiri.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake accept loop");
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Worker threads spawned and not yet joined by the accept loop
    pub fn active_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

fn register_into<H: Handler>(
    registry: &RwLock<Registry>,
    name: &str,
    handler: H,
) -> Result<Handle> {
    registry
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, handler)
}

fn run_worker(id: u64, stream: TcpStream, registry: Registry, nodelay: bool, max_payload_len: u32) {
    let mut conn = match Connection::from_tcp(stream, nodelay, max_payload_len) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(conn = id, error = %e, "Failed to set up connection");
            return;
        }
    };

    let served = serve_connection(&mut conn, &registry);
    conn.shutdown();

    debug!(conn = id, requests = served, "Connection finished");
}

/// Request loop for one connection. Returns the number of requests answered.
pub(crate) fn serve_connection<S: Read + Write>(
    conn: &mut Connection<S>,
    registry: &Registry,
) -> u64 {
    let mut served = 0;
    loop {
        match handle_request(conn, registry) {
            Ok(Flow::Continue) => served += 1,
            Ok(Flow::Close) => {
                debug!("Client requested close");
                break;
            }
            Err(RpcError::ConnectionClosed) => {
                debug!("Connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Ending connection");
                break;
            }
        }
    }
    served
}

/// Handle satu request.
///
/// `Err` berarti koneksi harus diakhiri; failure biasa (not found,
/// payload invalid) dibalas dengan failure status dan tetap `Ok`.
pub(crate) fn handle_request<S: Read + Write>(
    conn: &mut Connection<S>,
    registry: &Registry,
) -> Result<Flow> {
    let prefix = conn.read_u32()?;
    match RequestType::from_u32(prefix) {
        Some(RequestType::Find) => handle_find(conn, registry).map(|_| Flow::Continue),
        Some(RequestType::Call) => handle_call(conn, registry).map(|_| Flow::Continue),
        Some(RequestType::Close) => Ok(Flow::Close),
        None => Err(RpcError::UnknownRequestType(prefix)),
    }
}

fn handle_find<S: Read + Write>(conn: &mut Connection<S>, registry: &Registry) -> Result<()> {
    let found = match conn.read_name() {
        Ok(name) => {
            let handle = registry.find_name(&name);
            if handle.is_none() {
                debug!(name = %name, "Function not found");
            }
            handle
        }
        Err(e @ RpcError::InvalidName { .. }) => {
            debug!(error = %e, "Rejected FIND");
            None
        }
        Err(e) => return Err(e),
    };

    match found {
        Some(handle) => {
            conn.queue_status(Status::Success);
            conn.queue_u32(handle.index());
        }
        None => conn.queue_status(Status::Failure),
    }
    conn.flush_write_buffer()
}

fn handle_call<S: Read + Write>(conn: &mut Connection<S>, registry: &Registry) -> Result<()> {
    let index = conn.read_u32()?;
    let input = match conn.read_payload() {
        Ok(payload) => Some(payload),
        Err(e) if e.is_transport() => return Err(e),
        Err(e) => {
            debug!(handle = index, error = %e, "Rejected CALL payload");
            None
        }
    };

    let output = input.and_then(|input| invoke(registry, index, &input));

    match output {
        Some(out) => {
            conn.queue_status(Status::Success);
            conn.queue_payload(&out)?;
        }
        None => conn.queue_status(Status::Failure),
    }
    conn.flush_write_buffer()
}

/// Resolve + invoke. `None` untuk handle invalid, handler gagal,
/// handler panic, atau hasil yang melanggar invariant payload.
fn invoke(registry: &Registry, index: u32, input: &Payload) -> Option<Payload> {
    let Some(func) = registry.resolve(index) else {
        debug!(handle = index, "Invalid handle");
        return None;
    };

    let output = match panic::catch_unwind(AssertUnwindSafe(|| func.invoke(input))) {
        Ok(output) => output,
        Err(_) => {
            error!(name = %func.name(), "Handler panicked");
            return None;
        }
    };

    match output {
        Some(out) => match out.validate() {
            Ok(()) => Some(out),
            Err(e) => {
                warn!(name = %func.name(), error = %e, "Handler returned invalid payload");
                None
            }
        },
        None => {
            debug!(name = %func.name(), "Handler reported failure");
            None
        }
    }
}
