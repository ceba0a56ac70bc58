//! Connection handling dengan buffered I/O
//!
//! Dipakai oleh server worker dan client. Request/response selalu
//! half-duplex: frame ditulis ke write buffer, di-flush sekali, lalu
//! response dibaca lewat read buffer.

use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::error::{Result, RpcError};
use crate::protocol::{Decoder, Encoder, Name, Payload, RequestType, Status};

/// Buffer sizes - cukup untuk frame FIND/CALL kecil tanpa realokasi
const READ_BUFFER_SIZE: usize = 8 * 1024;
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Framed connection over any blocking byte stream
pub struct Connection<S: Read + Write> {
    decoder: Decoder<BufReader<S>>,
    write_buffer: Encoder,
    max_payload_len: u32,
}

impl Connection<TcpStream> {
    /// Wrap TcpStream, blocking mode
    pub fn from_tcp(stream: TcpStream, nodelay: bool, max_payload_len: u32) -> Result<Self> {
        // Accepted sockets may inherit non-blocking mode from the listener
        stream.set_nonblocking(false)?;
        // Disable Nagle's algorithm untuk lower latency
        stream.set_nodelay(nodelay)?;
        Ok(Self::new(stream, max_payload_len))
    }

    /// Close both directions, ignoring errors
    pub fn shutdown(&self) {
        let _ = self.stream().shutdown(Shutdown::Both);
    }
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S, max_payload_len: u32) -> Self {
        Self {
            decoder: Decoder::new(BufReader::with_capacity(READ_BUFFER_SIZE, stream)),
            write_buffer: Encoder::new(WRITE_BUFFER_SIZE),
            max_payload_len,
        }
    }

    #[inline]
    pub fn queue_request(&mut self, request: RequestType) {
        self.write_buffer.put_request(request);
    }

    #[inline]
    pub fn queue_status(&mut self, status: Status) {
        self.write_buffer.put_status(status);
    }

    #[inline]
    pub fn queue_u32(&mut self, v: u32) {
        self.write_buffer.put_u32(v);
    }

    #[inline]
    pub fn queue_name(&mut self, name: &Name) {
        self.write_buffer.put_name(name);
    }

    /// Queue payload. Payload invalid ditolak tanpa menyentuh buffer.
    #[inline]
    pub fn queue_payload(&mut self, payload: &Payload) -> Result<()> {
        self.write_buffer.put_payload(payload)
    }

    /// Drop anything queued but not yet flushed
    #[inline]
    pub fn discard_queued(&mut self) {
        self.write_buffer.reset();
    }

    /// Flush write buffer ke socket
    pub fn flush_write_buffer(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        let stream = self.decoder.get_mut().get_mut();
        let res = stream
            .write_all(self.write_buffer.as_bytes())
            .and_then(|_| stream.flush());
        self.write_buffer.reset();
        res.map_err(RpcError::from)
    }

    /// Bytes pending in write buffer
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.decoder.read_u32()
    }

    #[inline]
    pub fn read_name(&mut self) -> Result<Name> {
        self.decoder.read_name()
    }

    #[inline]
    pub fn read_payload(&mut self) -> Result<Payload> {
        self.decoder.read_payload(self.max_payload_len)
    }

    /// Read a response status word
    pub fn read_status(&mut self) -> Result<Status> {
        let raw = self.decoder.read_u32()?;
        Status::from_u32(raw).ok_or(RpcError::InvalidPrefix(raw))
    }

    /// Get underlying stream
    pub fn stream(&self) -> &S {
        self.decoder.get_ref().get_ref()
    }
}
