//! RPC Client
//!
//! Satu koneksi fisik, dibuka lazily saat `find`/`call` pertama dan
//! dipakai ulang sampai `close`. Setiap call adalah satu round trip
//! blocking; tidak ada retry, timeout, atau call paralel.

use std::net::TcpStream;

use tracing::{debug, warn};

use super::Connection;
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{Handle, Name, Payload, RequestType, Status};

/// Client session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

pub struct Client {
    config: ClientConfig,
    conn: Option<Connection<TcpStream>>,
}

impl Client {
    /// Validasi address dan port. Belum ada koneksi yang dibuka.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_config(ClientConfig::new(host, port))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, conn: None })
    }

    pub fn state(&self) -> SessionState {
        if self.conn.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Cari function by name, hasilnya handle untuk `call`
    pub fn find(&mut self, name: &str) -> Result<Handle> {
        let name = Name::new(name)?;

        let conn = self.connect()?;
        conn.queue_request(RequestType::Find);
        conn.queue_name(&name);

        let res = exchange(conn, |conn| match conn.read_status()? {
            Status::Success => Ok(Some(Handle::new(conn.read_u32()?))),
            Status::Failure => Ok(None),
        });

        match self.settle(res)? {
            Some(handle) => {
                debug!(name = %name, handle = %handle, "Found function");
                Ok(handle)
            }
            None => Err(RpcError::FunctionNotFound(name.to_string())),
        }
    }

    /// Panggil function remote
    pub fn call(&mut self, handle: Handle, payload: &Payload) -> Result<Payload> {
        // Reject before any byte is sent
        payload.validate()?;

        let conn = self.connect()?;
        conn.queue_request(RequestType::Call);
        conn.queue_u32(handle.index());
        if let Err(e) = conn.queue_payload(payload) {
            conn.discard_queued();
            return Err(e);
        }

        let res = exchange(conn, |conn| match conn.read_status()? {
            Status::Success => conn.read_payload().map(Some),
            Status::Failure => Ok(None),
        });

        self.settle(res)?.ok_or(RpcError::CallFailed)
    }

    /// Tutup sesi. CLOSE dikirim best-effort; state selalu jadi Closed.
    pub fn close(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        conn.queue_request(RequestType::Close);
        if let Err(e) = conn.flush_write_buffer() {
            debug!(error = %e, "CLOSE not delivered");
        }
        conn.shutdown();
        debug!("Session closed");
    }

    /// Open the session if it is closed
    fn connect(&mut self) -> Result<&mut Connection<TcpStream>> {
        if self.conn.is_none() {
            let conn = self.open()?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| RpcError::InvalidInput("session not open".into()))
    }

    /// Connect ke kandidat address pertama yang berhasil
    fn open(&self) -> Result<Connection<TcpStream>> {
        let addrs = self.config.resolve()?;

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    debug!(addr = %addr, "Connected");
                    return Connection::from_tcp(
                        stream,
                        self.config.nodelay,
                        self.config.max_payload_len,
                    );
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(RpcError::ConnectionFailed {
            addr: format!("{}:{}", self.config.host, self.config.port),
            source: last_err,
        })
    }

    /// Transport error menandai sesi rusak: buang koneksi tanpa CLOSE
    fn settle<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if e.is_transport() || matches!(e, RpcError::InvalidPrefix(_)) {
                warn!(error = %e, "Session dropped");
                if let Some(conn) = self.conn.take() {
                    conn.shutdown();
                }
            }
        }
        res
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Flush the queued request, then read the response
fn exchange<T>(
    conn: &mut Connection<TcpStream>,
    read_response: impl FnOnce(&mut Connection<TcpStream>) -> Result<T>,
) -> Result<T> {
    conn.flush_write_buffer()?;
    read_response(conn)
}
