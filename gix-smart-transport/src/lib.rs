//! Client-side smart protocol transport.
//!
//! This crate implements the session layer a fetch or push runs on top of:
//! it connects to a remote through a pluggable [`SmartSubtransport`],
//! parses the ref advertisement, detects capabilities and then steps
//! through negotiation or hands out the push stream. One state machine
//! serves both stateless request/response transports (each phase is its
//! own exchange, as over HTTP) and stateful ones (one connection spans all
//! phases, as over a pipe or socket).
//!
//! # Example
//!
//! ```no_run
//! use gix_smart_transport::{Direction, Service, SmartStream, SmartTransport, TransportFlags};
//! # struct Stub;
//! # impl gix_smart_transport::SmartSubtransport for Stub {
//! #     fn action(&mut self, _url: &str, _service: Service) -> gix_smart_transport::Result<Box<dyn SmartStream>> {
//! #         unimplemented!("example only")
//! #     }
//! #     fn close(&mut self) -> gix_smart_transport::Result<()> { Ok(()) }
//! #     fn is_stateless(&self) -> bool { true }
//! # }
//!
//! let mut session = SmartTransport::new(Stub);
//! session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;
//! session.list_refs(|r| {
//!     println!("{} {}", r.id, r.name);
//!     true
//! })?;
//! # Ok::<(), gix_smart_transport::Error>(())
//! ```

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod interrupt;
pub mod subtransport;
pub mod transport;

/// Re-export of the wire-level primitives used in this crate's API.
pub use gix_smart_core as wire;

pub use error::{Error, Result};
pub use interrupt::CancellationFlag;
pub use subtransport::{Service, SmartStream, SmartSubtransport};
pub use transport::{Direction, MessageCallback, SmartTransport, TransportFlags};

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
