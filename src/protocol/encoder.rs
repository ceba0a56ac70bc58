//! Frame Encoder/Decoder
//!
//! Encoder menulis frame lengkap ke buffer internal dulu, baru dikirim
//! dengan satu `write_all`. Decoder membaca langsung dari stream apa saja
//! yang implement `Read`.

use std::io::{self, Read};

use super::message::{
    Handle, Name, Payload, RequestType, Status, PAYLOAD_HEADER_SIZE, U16_SIZE, U32_SIZE,
    U64_SIZE,
};
use crate::error::{Result, RpcError};

/// Initial allocation cap when reading data2, grown as bytes actually arrive
const READ_CHUNK: usize = 64 * 1024;

/// Reusable frame buffer
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Encoder {
    /// Membuat encoder dengan kapasitas awal tertentu
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Reset encoder untuk reuse
    #[inline(always)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    #[inline(always)]
    pub fn put_u16(&mut self, v: u16) {
        self.buffer.extend_from_slice(&v.to_be_bytes());
    }

    #[inline(always)]
    pub fn put_u32(&mut self, v: u32) {
        self.buffer.extend_from_slice(&v.to_be_bytes());
    }

    #[inline(always)]
    pub fn put_u64(&mut self, v: u64) {
        self.buffer.extend_from_slice(&v.to_be_bytes());
    }

    #[inline(always)]
    pub fn put_request(&mut self, request: RequestType) {
        self.put_u32(request as u32);
    }

    #[inline(always)]
    pub fn put_status(&mut self, status: Status) {
        self.put_u32(status as u32);
    }

    /// u16 length + raw bytes, no terminator
    pub fn put_name(&mut self, name: &Name) {
        // Name::new already bounds the length to u16
        self.put_u16(name.len() as u16);
        self.buffer.extend_from_slice(name.as_str().as_bytes());
    }

    /// Encode payload. Invariant dicek sebelum ada byte yang ditulis.
    pub fn put_payload(&mut self, payload: &Payload) -> Result<()> {
        payload.validate()?;

        self.buffer.reserve(PAYLOAD_HEADER_SIZE + payload.data2_len());
        self.put_u64(payload.data1 as u64);
        self.put_u32(payload.data2_len() as u32);
        if let Some(data2) = &payload.data2 {
            self.buffer.extend_from_slice(data2);
        }
        Ok(())
    }

    /// FIND request frame
    pub fn encode_find(&mut self, name: &Name) -> &[u8] {
        self.reset();
        self.put_request(RequestType::Find);
        self.put_name(name);
        self.as_bytes()
    }

    /// CALL request frame
    pub fn encode_call(&mut self, handle: Handle, payload: &Payload) -> Result<&[u8]> {
        self.reset();
        self.put_request(RequestType::Call);
        self.put_u32(handle.index());
        self.put_payload(payload)?;
        Ok(self.as_bytes())
    }

    /// CLOSE request frame (prefix only)
    pub fn encode_close(&mut self) -> &[u8] {
        self.reset();
        self.put_request(RequestType::Close);
        self.as_bytes()
    }

    /// Get current buffer content
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Blocking decoder over a byte stream
///
/// Short read (peer closed) jadi `RpcError::ConnectionClosed`,
/// error lain jadi `RpcError::Io`.
pub struct Decoder<R> {
    reader: R,
}

impl<R: Read> Decoder<R> {
    #[inline(always)]
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; U16_SIZE];
        self.reader.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; U32_SIZE];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; U64_SIZE];
        self.reader.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a length-prefixed name.
    ///
    /// The full body is consumed before validation, so an invalid name
    /// leaves the stream positioned at the next frame.
    pub fn read_name(&mut self) -> Result<Name> {
        let len = self.read_u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.reader.read_exact(&mut bytes)?;
        Name::from_bytes(bytes)
    }

    /// Read a payload whose data2 may not exceed `max_len` bytes.
    ///
    /// Oversized data2 is drained from the stream before
    /// `PayloadTooLarge` is returned.
    pub fn read_payload(&mut self, max_len: u32) -> Result<Payload> {
        let data1 = self.read_u64()? as i64;
        let len = self.read_u32()?;

        if len > max_len {
            self.discard(len as u64)?;
            return Err(RpcError::PayloadTooLarge {
                len: len as u64,
                limit: max_len as u64,
            });
        }

        let data2 = if len == 0 {
            None
        } else {
            let mut buf = Vec::with_capacity((len as usize).min(READ_CHUNK));
            let read = (&mut self.reader).take(len as u64).read_to_end(&mut buf)?;
            if read < len as usize {
                return Err(RpcError::ConnectionClosed);
            }
            Some(buf)
        };

        let payload = Payload { data1, data2 };
        payload.validate()?;
        Ok(payload)
    }

    /// Skip `n` bytes
    pub fn discard(&mut self, n: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.reader).take(n), &mut io::sink())?;
        if skipped < n {
            return Err(RpcError::ConnectionClosed);
        }
        Ok(())
    }
}
