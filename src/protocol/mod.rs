//! Protocol Layer: Big-Endian Binary Framing
//!
//! Prinsip desain:
//! - Fixed byte order: semua integer big-endian, tidak tergantung host
//! - Length-prefixed: nama dan data2 selalu diawali panjangnya
//! - Validate before write: frame invalid tidak pernah menyentuh socket

mod encoder;
mod message;

pub use encoder::{Decoder, Encoder};
pub use message::{
    Handle, Name, Payload, RequestType, Status, MAX_DATA2_LEN, MAX_NAME_CHAR, MAX_NAME_LEN,
    MIN_NAME_CHAR, MIN_NAME_LEN,
};
