//! HTTP transport boundary.
//!
//! The transport is the only layer that sees raw status codes and headers;
//! everything above it consumes the classified [`crate::Error`] taxonomy.

pub mod http;

pub use http::{HttpTransport, TransportError};
