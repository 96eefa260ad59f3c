//! The contract between the smart session and a concrete transport.
//!
//! A subtransport supplies one byte stream per logical service request,
//! whether that is a spawned process, a raw socket or an HTTP exchange.
//! The session only distinguishes stateless implementations (one exchange
//! per phase) from stateful ones (one connection spanning all phases).

use std::fmt;
use std::io::{Read, Write};

use crate::Result;

/// The logical service requested when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Ref advertisement for fetch.
    UploadPackLs,
    /// Fetch negotiation and pack transfer.
    UploadPack,
    /// Ref advertisement for push.
    ReceivePackLs,
    /// Pack upload and ref updates.
    ReceivePack,
}

impl Service {
    /// The service name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Service::UploadPackLs | Service::UploadPack => "git-upload-pack",
            Service::ReceivePackLs | Service::ReceivePack => "git-receive-pack",
        }
    }

    /// `true` for the advertisement-only variants.
    pub fn is_listing(&self) -> bool {
        matches!(self, Service::UploadPackLs | Service::ReceivePackLs)
    }
}

/// One bidirectional byte stream obtained for a service request.
///
/// Releasing a stream is dropping it. For stateful subtransports that must
/// not tear down the shared connection; only [`SmartSubtransport::close`]
/// does that.
pub trait SmartStream: Read + Write {}

impl<T: Read + Write> SmartStream for T {}

impl fmt::Debug for dyn SmartStream + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn SmartStream")
    }
}

/// A factory for service streams against one remote endpoint.
pub trait SmartSubtransport {
    /// Open a stream for `service` against `url`.
    ///
    /// A stateful implementation must hand out streams backed by its one
    /// persistent connection; returning an unrelated connection while a
    /// session still holds an earlier stream is a contract violation, not
    /// a recoverable condition.
    fn action(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>>;

    /// Close the underlying connection, if any.
    fn close(&mut self) -> Result<()>;

    /// `true` if each phase is an independent request/response exchange
    /// (e.g. HTTP) rather than part of one persistent connection.
    fn is_stateless(&self) -> bool;
}
