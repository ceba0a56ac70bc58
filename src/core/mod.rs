//! Core module: Function Registry
//!
//! Prinsip desain:
//! - Index-stable: slot hanya di-append atau di-replace, tidak pernah dihapus
//! - Snapshot-friendly: clone registry murah, handler di-share lewat `Arc`
//! - Typed handlers: `Handler` trait menggantikan raw function pointer

mod registry;

pub use registry::{Handler, RegisteredFunction, Registry};
