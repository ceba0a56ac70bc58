//! Pigeon - Minimal Binary RPC over TCP
//!
//! Arsitektur:
//! - Protocol: big-endian framing, length-prefixed names, fixed payload envelope
//! - Core: index-stable function registry
//! - Network: thread-per-connection server, single-session blocking client
//!
//! ```no_run
//! use pigeon::{Client, Payload, Server, ServerConfig};
//!
//! fn add2(input: &Payload) -> Option<Payload> {
//!     let rhs = *input.data2.as_ref()?.first()? as i8;
//!     Some(Payload::scalar(input.data1 + rhs as i64))
//! }
//!
//! # fn main() -> pigeon::Result<()> {
//! let server = Server::bind(ServerConfig::with_port(3000))?;
//! server.register("add2", add2)?;
//! let (handle, _join) = server.spawn()?;
//!
//! let mut client = Client::new("::1", 3000)?;
//! let add = client.find("add2")?;
//! let out = client.call(add, &Payload::with_data(5, vec![100]))?;
//! assert_eq!(out.data1, 105);
//!
//! client.close();
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

pub use crate::config::{ClientConfig, ServerConfig};
pub use crate::core::{Handler, Registry};
pub use crate::error::{Result, RpcError};
pub use crate::network::{Client, Server, ServerHandle, SessionState};
pub use crate::protocol::{Handle, Name, Payload};
