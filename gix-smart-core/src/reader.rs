//! Bridging a raw byte stream to a stream of typed packets.

use std::io::Read;
use std::sync::Arc;

use gix_packetline::{PacketLineRef, StreamingPeekableIter};

use crate::{packet::Packet, Error, Result};

/// Observer notified about every chunk of bytes read off the wire.
///
/// Counts are per-read; the observer accumulates. Used to feed transfer
/// progress displays.
pub trait ProgressSink {
    /// Called after every successful nonzero read with the byte count.
    fn bytes_received(&self, count: usize);
}

/// Shared handle to a progress sink, cheap to hand to each phase stream.
pub type SharedProgress = Arc<dyn ProgressSink + Send + Sync>;

/// A reader forwarding to the active stream while reporting read sizes.
///
/// Short reads are passed through unchanged; streams may deliver partial
/// chunks. `Ok(0)` means end-of-stream.
pub struct CountingReader<R> {
    inner: R,
    progress: Option<SharedProgress>,
}

impl<R: Read> CountingReader<R> {
    /// Wrap `inner`, reporting reads to `progress` if one is given.
    pub fn new(inner: R, progress: Option<SharedProgress>) -> Self {
        Self { inner, progress }
    }

    /// Return the wrapped stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count > 0 {
            if let Some(progress) = &self.progress {
                progress.bytes_received(count);
            }
        }
        Ok(count)
    }
}

/// Reads typed [`Packet`]s from a pkt-line stream.
///
/// Flush packets are surfaced as [`Packet::Flush`] and reading continues
/// into the following block, so callers can count the markers bounding an
/// advertisement. `Ok(None)` signals end-of-stream; whether that is legal
/// at this point is for the caller to decide.
pub struct PacketReader<R: Read> {
    lines: StreamingPeekableIter<R>,
    saw_first: bool,
}

impl<R: Read> PacketReader<R> {
    /// Create a reader over `input`.
    pub fn new(input: R) -> Self {
        Self {
            lines: StreamingPeekableIter::new(input, &[PacketLineRef::Flush], false),
            saw_first: false,
        }
    }

    /// Read the next packet, or `None` at end-of-stream.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        match self.lines.read_line() {
            // Streams end with a flush; a frame cut short by EOF is simply
            // the end of the stream as far as framing is concerned.
            Some(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Some(line) => {
                let line = line?.map_err(Error::Decode)?;
                match line {
                    PacketLineRef::Data(data) => {
                        let first = !self.saw_first;
                        self.saw_first = true;
                        Packet::from_line(data, first).map(Some)
                    }
                    // v1 peers never send v2 delimiters; treat any as a block end.
                    PacketLineRef::Flush
                    | PacketLineRef::Delimiter
                    | PacketLineRef::ResponseEnd => Ok(Some(Packet::Flush)),
                }
            }
            None => {
                if matches!(self.lines.stopped_at(), Some(PacketLineRef::Flush)) {
                    self.lines.reset_with(&[PacketLineRef::Flush]);
                    Ok(Some(Packet::Flush))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Return the wrapped stream, dropping buffered framing state.
    pub fn into_inner(self) -> R {
        self.lines.into_inner()
    }
}
