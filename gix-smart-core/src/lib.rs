//! gix-smart-core: Wire-level building blocks for smart protocol clients.
//!
//! This crate provides the typed packet layer, capability detection and
//! stream adapters that `gix-smart-transport` drives during a fetch or push
//! session. The raw length-prefixed framing comes from `gix-packetline`;
//! everything here is about what the frames *mean*.
//!
#![deny(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod capabilities;
pub mod error;
pub mod packet;
pub mod reader;
pub mod sideband;

pub use error::{Error, Result};
