//! Network Layer: Blocking TCP Transport
//!
//! - Server: accept loop berbasis mio (bisa di-shutdown), worker thread per koneksi
//! - Client: satu koneksi blocking, request/response serial
//! - Connection: framing + buffered I/O yang dipakai kedua sisi

mod client;
mod connection;
mod server;

pub use client::{Client, SessionState};
pub use connection::Connection;
pub use server::{Server, ServerHandle};
