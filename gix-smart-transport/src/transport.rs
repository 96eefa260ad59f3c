//! The transport session state machine.
//!
//! One [`SmartTransport`] drives a fetch or push session over a
//! subtransport: connect and parse the ref advertisement, expose the refs,
//! then step through negotiation or hand out the push stream. The single
//! `rpc` branch point decides at every phase transition whether the
//! current stream persists or is torn down and reopened.

use std::io::{Read, Write};
use std::sync::Arc;

use bstr::{BStr, ByteSlice};
use gix_smart_core::{
    capabilities::CapabilitySet,
    packet::{Packet, RefRecord},
    reader::{CountingReader, PacketReader, SharedProgress},
    sideband::{MessageHandler, SidebandReader},
};

use crate::{
    interrupt::CancellationFlag,
    subtransport::{Service, SmartStream, SmartSubtransport},
    Error, Result,
};

/// The direction of a session, fixed at [`SmartTransport::connect`] time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Download refs and objects from the remote.
    Fetch,
    /// Upload objects and update remote refs.
    Push,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Fetch => "fetch",
            Direction::Push => "push",
        })
    }
}

/// Connection flags captured at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportFlags {
    /// Skip verification of the server certificate, where the subtransport
    /// supports the notion.
    pub no_check_certificate: bool,
}

/// Callback invoked with progress or error text received from the remote.
pub type MessageCallback = Box<dyn FnMut(&BStr)>;

#[derive(Default)]
struct Callbacks {
    progress: Option<MessageCallback>,
    error: Option<MessageCallback>,
    bytes: Option<SharedProgress>,
}

/// A smart protocol client session over a pluggable subtransport.
///
/// The session owns at most one stream at a time; every transition that
/// opens a new one releases the previous one first. All operations are
/// synchronous and must be driven from one thread; only
/// [`cancel`](Self::cancel) is safe to call from another.
pub struct SmartTransport<T: SmartSubtransport> {
    subtransport: T,
    /// `true` for stateless request/response transports.
    rpc: bool,
    url: Option<String>,
    direction: Option<Direction>,
    flags: TransportFlags,
    connected: bool,
    have_refs: bool,
    cancel: Arc<CancellationFlag>,
    refs: Vec<Packet>,
    common: Vec<Packet>,
    caps: CapabilitySet,
    stream: Option<Box<dyn SmartStream>>,
    callbacks: Callbacks,
}

impl<T: SmartSubtransport> SmartTransport<T> {
    /// Create a session over `subtransport`, not yet connected.
    pub fn new(subtransport: T) -> Self {
        let rpc = subtransport.is_stateless();
        Self {
            subtransport,
            rpc,
            url: None,
            direction: None,
            flags: TransportFlags::default(),
            connected: false,
            have_refs: false,
            cancel: Arc::new(CancellationFlag::new()),
            refs: Vec::new(),
            common: Vec::new(),
            caps: CapabilitySet::default(),
            stream: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Register observers: remote progress text, remote error text, and a
    /// sink for raw received-byte counts.
    pub fn set_callbacks(
        &mut self,
        progress: Option<MessageCallback>,
        error: Option<MessageCallback>,
        bytes: Option<SharedProgress>,
    ) {
        self.callbacks = Callbacks {
            progress,
            error,
            bytes,
        };
    }

    /// Handle for requesting cancellation from another thread.
    pub fn cancellation(&self) -> Arc<CancellationFlag> {
        Arc::clone(&self.cancel)
    }

    /// Request cancellation of the in-flight operation.
    ///
    /// Never interrupts a blocking read or write; the operation unwinds at
    /// its next poll point with a cancellation outcome.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Connect to `url` and load the ref advertisement.
    ///
    /// Selects the listing service from `direction` and reads the
    /// advertisement up to its flush markers: two on stateless transports,
    /// where a leading comment packet frames the exchange, one on stateful
    /// ones. Detects capabilities from the first advertised ref and drops
    /// the zero-id `capabilities^{}` placeholder an empty repository
    /// advertises. Reconnecting resets all session state including the
    /// cancellation flag.
    pub fn connect(&mut self, url: &str, direction: Direction, flags: TransportFlags) -> Result<()> {
        if url.is_empty() {
            return Err(Error::Argument("url must not be empty"));
        }
        self.reset_stream(true)?;
        self.refs.clear();
        self.common.clear();
        self.caps = CapabilitySet::default();
        self.connected = false;
        self.have_refs = false;
        self.cancel.reset();

        self.url = Some(url.to_owned());
        self.direction = Some(direction);
        self.flags = flags;

        let service = match direction {
            Direction::Fetch => Service::UploadPackLs,
            Direction::Push => Service::ReceivePackLs,
        };
        tracing::debug!(url = %url, service = service.name(), rpc = self.rpc, "connecting");

        self.stream = Some(self.subtransport.action(url, service)?);
        self.load_refs()?;

        if self.rpc {
            match self.refs.first() {
                Some(Packet::Comment(_)) => {
                    self.refs.remove(0);
                }
                _ => return Err(Error::Protocol("invalid response")),
            }
        }
        self.have_refs = true;

        let caps = CapabilitySet::detect(self.refs.iter().find_map(Packet::as_ref_record));
        self.caps = caps;

        // An empty repository advertises a single placeholder ref that only
        // carries the capability listing.
        let placeholder_only = matches!(
            self.refs.as_slice(),
            [Packet::Ref(first)] if first.name == "capabilities^{}" && first.id.is_null()
        );
        if placeholder_only {
            self.refs.clear();
        }

        if self.rpc {
            // No connection to keep; the next phase is its own exchange.
            self.reset_stream(false)?;
        }
        self.connected = true;
        tracing::debug!(refs = self.refs.len(), "connected");
        Ok(())
    }

    /// Consume the advertisement up to the required number of flush
    /// markers, collecting packets into the session.
    fn load_refs(&mut self) -> Result<()> {
        let flushes_needed = if self.rpc { 2 } else { 1 };
        let Self {
            stream,
            refs,
            callbacks,
            cancel,
            ..
        } = self;
        let stream = stream.as_mut().expect("connect installed a stream");
        let mut reader = PacketReader::new(CountingReader::new(
            &mut **stream,
            callbacks.bytes.clone(),
        ));

        let mut flushes = 0;
        while flushes < flushes_needed {
            cancel.check()?;
            match reader.read_packet()? {
                Some(Packet::Flush) => flushes += 1,
                Some(Packet::Err(message)) => {
                    if let Some(cb) = callbacks.error.as_mut() {
                        cb(message.as_bstr());
                    }
                    return Err(Error::Remote(message));
                }
                Some(packet) => refs.push(packet),
                None => return Err(Error::Protocol("unexpected end of stream before flush packet")),
            }
        }
        Ok(())
    }

    /// Visit each advertised ref in advertisement order.
    ///
    /// The visitor returns `true` to keep going; `false` aborts the walk,
    /// which surfaces as [`Error::Cancelled`]. The cancellation flag is
    /// polled before and during the walk.
    pub fn list_refs(&self, mut visit: impl FnMut(&RefRecord) -> bool) -> Result<()> {
        if !self.have_refs {
            return Err(Error::RefsNotLoaded);
        }
        self.cancel.check()?;
        for packet in &self.refs {
            let record = match packet.as_ref_record() {
                Some(record) => record,
                None => continue,
            };
            self.cancel.check()?;
            if !visit(record) {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

    /// Open the negotiation phase of a fetch session and send `payload`.
    ///
    /// Stateless transports get a fresh exchange; stateful ones continue
    /// on the connection established by [`connect`](Self::connect).
    pub fn begin_negotiation(&mut self, payload: &[u8]) -> Result<()> {
        if self.direction != Some(Direction::Fetch) {
            return Err(Error::WrongDirection(Direction::Fetch));
        }
        if self.rpc {
            self.reset_stream(false)?;
        }
        let stream = self.open_service_stream(Service::UploadPack)?;
        stream.write_all(payload)?;
        stream.flush()?;
        Ok(())
    }

    /// Read the next negotiation answer.
    ///
    /// `ACK` packets carrying a multi-ack status are recorded in the
    /// session's common list. The caller drives the have/done loop and
    /// decides when the final answer has arrived; the cancellation flag is
    /// polled on every call.
    pub fn read_acknowledgement(&mut self) -> Result<Packet> {
        self.cancel.check()?;
        let Self {
            stream,
            common,
            callbacks,
            ..
        } = self;
        let stream = stream
            .as_mut()
            .ok_or(Error::Protocol("no stream open for negotiation"))?;
        let mut reader = PacketReader::new(CountingReader::new(
            &mut **stream,
            callbacks.bytes.clone(),
        ));
        match reader.read_packet()? {
            Some(Packet::Err(message)) => {
                if let Some(cb) = callbacks.error.as_mut() {
                    cb(message.as_bstr());
                }
                Err(Error::Remote(message))
            }
            Some(packet @ Packet::Ack { status: Some(_), .. }) => {
                common.push(packet.clone());
                Ok(packet)
            }
            Some(packet @ (Packet::Ack { .. } | Packet::Nak | Packet::Flush)) => Ok(packet),
            Some(_) => Err(Error::Protocol("unexpected packet during negotiation")),
            None => Err(Error::Protocol("unexpected end of stream during negotiation")),
        }
    }

    /// Hand back the raw response stream following negotiation, for the
    /// pack consumer to read.
    ///
    /// When the peer negotiated a side-band capability the stream is
    /// demultiplexed: progress and error text go to the registered
    /// callbacks and only pack bytes are yielded.
    pub fn pack_stream(&mut self) -> Result<Box<dyn Read + '_>> {
        self.cancel.check()?;
        let sideband = self.caps.contains("side-band") || self.caps.contains("side-band-64k");
        let bytes = self.callbacks.bytes.clone();
        let Self {
            stream, callbacks, ..
        } = self;
        let stream = stream
            .as_mut()
            .ok_or(Error::Protocol("no stream open for download"))?;
        let reader = CountingReader::new(&mut **stream, bytes);
        if sideband {
            let Callbacks {
                progress, error, ..
            } = callbacks;
            let handler: MessageHandler<'_> = Box::new(move |is_error, text| {
                let cb = if is_error {
                    error.as_mut()
                } else {
                    progress.as_mut()
                };
                if let Some(cb) = cb {
                    cb(text);
                }
            });
            Ok(Box::new(SidebandReader::new(reader, handler)))
        } else {
            Ok(Box::new(reader))
        }
    }

    /// Open the push phase and return the writable stream for the caller
    /// to send its ref-update commands and pack.
    pub fn push_stream(&mut self) -> Result<&mut dyn SmartStream> {
        if self.direction != Some(Direction::Push) {
            return Err(Error::WrongDirection(Direction::Push));
        }
        if self.rpc {
            self.reset_stream(false)?;
        }
        let stream = self.open_service_stream(Service::ReceivePack)?;
        Ok(&mut **stream)
    }

    /// `true` after a successful [`connect`](Self::connect).
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The flags captured at connect time.
    pub fn flags(&self) -> TransportFlags {
        self.flags
    }

    /// The capability set detected from the advertisement.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    /// The objects recorded as common during negotiation.
    pub fn common(&self) -> &[Packet] {
        &self.common
    }

    /// Tear down the session.
    ///
    /// Idempotent. Releases the stream and the underlying connection,
    /// frees the advertisement and negotiation state and clears the
    /// connected flag. Resources are released even when closing the
    /// connection fails; that error is returned afterwards.
    pub fn close(&mut self) -> Result<()> {
        let result = self.reset_stream(true);
        self.refs.clear();
        self.common.clear();
        self.url = None;
        self.connected = false;
        self.have_refs = false;
        tracing::debug!(ok = result.is_ok(), "session closed");
        result
    }

    /// Open a stream for `service`, replacing the current one.
    fn open_service_stream(&mut self, service: Service) -> Result<&mut Box<dyn SmartStream>> {
        let url = self
            .url
            .clone()
            .ok_or(Error::Protocol("session is not connected"))?;
        // A stateful subtransport keeps its one connection across phases
        // and must hand back a stream onto it here.
        debug_assert!(
            self.rpc || self.stream.is_some(),
            "stateful subtransport lost its connection between phases"
        );
        tracing::debug!(service = service.name(), "opening service stream");
        let stream = self.subtransport.action(&url, service)?;
        self.stream = Some(stream);
        Ok(self.stream.as_mut().expect("stream was just installed"))
    }

    /// Release the current stream; optionally also close the underlying
    /// subtransport connection.
    fn reset_stream(&mut self, close_subtransport: bool) -> Result<()> {
        self.stream = None;
        if close_subtransport {
            self.subtransport.close()?;
        }
        Ok(())
    }
}

impl<T: SmartSubtransport> Drop for SmartTransport<T> {
    fn drop(&mut self) {
        // Errors during implicit teardown have nowhere to go.
        let _ = self.close();
    }
}
