//! Wire Message Format
//!
//! Semua integer big-endian (network byte order).
//!
//! ```text
//! Request prefix   u32  1=FIND 2=CALL 3=CLOSE
//! FIND body        u16 name_len | name bytes
//! FIND response    u32 status   | u32 handle (success only)
//! CALL body        u32 handle   | Payload
//! CALL response    u32 status   | Payload (success only)
//! Payload          u64 data1    | u32 data2_len | data2 bytes (iff len > 0)
//! ```

use std::fmt;

use crate::error::{Result, RpcError};

pub const U16_SIZE: usize = 2;
pub const U32_SIZE: usize = 4;
pub const U64_SIZE: usize = 8;

/// Fixed part of a payload: data1 + data2_len
pub const PAYLOAD_HEADER_SIZE: usize = U64_SIZE + U32_SIZE;

pub const MIN_NAME_LEN: usize = 1;
pub const MAX_NAME_LEN: usize = u16::MAX as usize;
pub const MIN_NAME_CHAR: u8 = 32;
pub const MAX_NAME_CHAR: u8 = 126;
pub const MAX_DATA2_LEN: u64 = u32::MAX as u64;

/// Tipe request dari client
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Lookup function by name
    Find = 1,
    /// Invoke function by handle
    Call = 2,
    /// Client menutup koneksi, tanpa response
    Close = 3,
}

impl RequestType {
    #[inline(always)]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Find),
            2 => Some(Self::Call),
            3 => Some(Self::Close),
            _ => None,
        }
    }
}

/// Status response dari server
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Failure = 1,
    Success = 2,
}

impl Status {
    #[inline(always)]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Failure),
            2 => Some(Self::Success),
            _ => None,
        }
    }
}

/// Nama procedure: 1..=65535 bytes, printable ASCII [32,126]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(String);

impl Name {
    /// Validasi dan bungkus nama
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(name.as_bytes())?;
        Ok(Self(name))
    }

    /// Build from raw wire bytes. Same rules as [`Name::new`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        validate_name(&bytes)?;
        // Printable ASCII is always valid UTF-8
        String::from_utf8(bytes)
            .map(Self)
            .map_err(|_| RpcError::invalid_name("not ASCII"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_name(bytes: &[u8]) -> Result<()> {
    if bytes.len() < MIN_NAME_LEN {
        return Err(RpcError::invalid_name("empty"));
    }
    if bytes.len() > MAX_NAME_LEN {
        return Err(RpcError::invalid_name(format!(
            "length {} exceeds {}",
            bytes.len(),
            MAX_NAME_LEN
        )));
    }
    if let Some(pos) = bytes
        .iter()
        .position(|&b| !(MIN_NAME_CHAR..=MAX_NAME_CHAR).contains(&b))
    {
        return Err(RpcError::invalid_name(format!(
            "byte 0x{:02x} at offset {} is not printable ASCII",
            bytes[pos], pos
        )));
    }
    Ok(())
}

/// Call envelope: scalar `data1` plus optional byte buffer `data2`.
///
/// Invariant: `data2` is `None` iff its length is zero. `Some(vec![])` is
/// representable but rejected by [`Payload::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data1: i64,
    pub data2: Option<Vec<u8>>,
}

impl Payload {
    /// Payload tanpa data2
    pub fn scalar(data1: i64) -> Self {
        Self { data1, data2: None }
    }

    /// Payload dengan data2. Buffer kosong dinormalisasi jadi `None`.
    pub fn with_data(data1: i64, data2: Vec<u8>) -> Self {
        let data2 = if data2.is_empty() { None } else { Some(data2) };
        Self { data1, data2 }
    }

    /// Panjang data2 seperti yang dikirim di wire
    #[inline(always)]
    pub fn data2_len(&self) -> usize {
        self.data2.as_ref().map_or(0, Vec::len)
    }

    /// Cek invariant sebelum encode atau setelah decode
    pub fn validate(&self) -> Result<()> {
        match &self.data2 {
            None => Ok(()),
            Some(buf) if buf.is_empty() => Err(RpcError::InvalidPayload(
                "data2 present with zero length".into(),
            )),
            Some(buf) if buf.len() as u64 > MAX_DATA2_LEN => Err(RpcError::PayloadTooLarge {
                len: buf.len() as u64,
                limit: MAX_DATA2_LEN,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Total encoded size
    #[inline(always)]
    pub fn encoded_len(&self) -> usize {
        PAYLOAD_HEADER_SIZE + self.data2_len()
    }
}

/// Opaque handle ke function yang terdaftar di server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index di registry server
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
