//! Demultiplexing of side-band multiplexed streams.
//!
//! Peers that negotiated `side-band`/`side-band-64k` interleave pack data
//! with progress and error text; the first payload byte of each frame
//! selects the channel. This reader hands channel 1 through as the raw
//! byte stream and routes the text channels to a handler. A flush packet
//! ends the stream.

use std::io::{self, Read};

use bstr::{BStr, ByteSlice};
use gix_packetline::{PacketLineRef, StreamingPeekableIter};

/// Handler for the text channels of a multiplexed stream.
///
/// Invoked with `true` for channel 3 (fatal remote error) and `false` for
/// channel 2 (progress text).
pub type MessageHandler<'a> = Box<dyn FnMut(bool, &BStr) + 'a>;

/// A `Read` yielding the channel-1 payload of a side-band stream.
pub struct SidebandReader<'a, R: Read> {
    lines: StreamingPeekableIter<R>,
    handle_message: MessageHandler<'a>,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<'a, R: Read> SidebandReader<'a, R> {
    /// Create a demultiplexing reader over `input`.
    pub fn new(input: R, handle_message: MessageHandler<'a>) -> Self {
        Self {
            lines: StreamingPeekableIter::new(input, &[PacketLineRef::Flush], false),
            handle_message,
            buf: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Pull frames until one carries data for the caller, copying its
    /// payload into the internal buffer.
    fn fill(&mut self) -> io::Result<()> {
        loop {
            let line = match self.lines.read_line() {
                Some(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    self.done = true;
                    return Ok(());
                }
                Some(line) => line?.map_err(|err| io::Error::new(io::ErrorKind::Other, err))?,
                None => {
                    self.done = true;
                    return Ok(());
                }
            };
            let frame = match line.as_slice() {
                Some(frame) => frame,
                None => continue,
            };
            match frame.split_first() {
                Some((&1, data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    self.buf.clear();
                    self.buf.extend_from_slice(data);
                    self.pos = 0;
                    return Ok(());
                }
                Some((&2, text)) => (self.handle_message)(false, text.as_bstr()),
                Some((&3, text)) => {
                    (self.handle_message)(true, text.as_bstr());
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("remote error: {}", text.as_bstr()),
                    ));
                }
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "side-band frame without a channel byte",
                    ))
                }
            }
        }
    }
}

impl<'a, R: Read> Read for SidebandReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.buf.len() {
            if self.done {
                return Ok(0);
            }
            self.fill()?;
            if self.done {
                return Ok(0);
            }
        }
        let available = &self.buf[self.pos..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.pos += count;
        Ok(count)
    }
}
