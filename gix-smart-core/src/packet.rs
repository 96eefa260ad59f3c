//! Typed packets of the v1 smart protocol.
//!
//! `gix-packetline` supplies the length-prefixed framing; this module gives
//! the frames their protocol meaning: advertised refs, service comments,
//! negotiation acknowledgements and the flush markers bounding logical
//! blocks. Each parsed packet is a value owned by exactly one container.

use bstr::{BString, ByteSlice};
use gix_hash::ObjectId;
use std::io::Write;

use crate::{Error, Result};

/// A reference as advertised by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    /// The object id the reference points to.
    pub id: ObjectId,
    /// The fully qualified reference name.
    pub name: BString,
    /// The capability listing following the NUL separator.
    ///
    /// Only ever present on the first advertised ref.
    pub capabilities: Option<BString>,
}

impl RefRecord {
    /// Create a new reference record without capabilities.
    pub fn new(id: ObjectId, name: impl Into<BString>) -> Self {
        Self {
            id,
            name: name.into(),
            capabilities: None,
        }
    }
}

/// The multi-ack status carried by an `ACK` during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The server found a common object and wants more `have`s.
    Continue,
    /// The server recorded the object as common.
    Common,
    /// The server can generate a pack; further `have`s are pointless.
    Ready,
}

impl AckStatus {
    fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Continue => "continue",
            AckStatus::Common => "common",
            AckStatus::Ready => "ready",
        }
    }
}

/// A single protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// The zero-length packet ending a logical block.
    Flush,
    /// An advertised reference.
    Ref(RefRecord),
    /// A `#`-prefixed comment line, e.g. the service header of a
    /// stateless exchange.
    Comment(BString),
    /// A negotiation acknowledgement.
    Ack {
        /// The acknowledged object id.
        id: ObjectId,
        /// The multi-ack status, absent on a final plain `ACK`.
        status: Option<AckStatus>,
    },
    /// The negative acknowledgement ending a negotiation round.
    Nak,
    /// A fatal error reported by the remote.
    Err(BString),
    /// An uninterpreted data line.
    Data(Vec<u8>),
}

impl Packet {
    /// Parse the payload of one data frame into its typed form.
    ///
    /// `first_packet` relaxes parsing for the leading line of a stream:
    /// servers may put a service header there, and anything that is not a
    /// ref is carried as a comment. Later lines that match no known type
    /// are carried as [`Packet::Data`].
    pub fn from_line(line: &[u8], first_packet: bool) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if line.first() == Some(&b'#') {
            return Ok(Packet::Comment(line[1..].as_bstr().to_owned()));
        }
        if line == b"NAK" {
            return Ok(Packet::Nak);
        }
        if let Some(rest) = line.strip_prefix(b"ACK ") {
            return parse_ack(rest);
        }
        if let Some(rest) = line.strip_prefix(b"ERR ") {
            return Ok(Packet::Err(rest.as_bstr().to_owned()));
        }
        match parse_ref(line) {
            Some(record) => Ok(Packet::Ref(record)),
            None if first_packet => Ok(Packet::Comment(line.as_bstr().to_owned())),
            None => Ok(Packet::Data(line.to_vec())),
        }
    }

    /// Return the contained ref record, if this is a ref packet.
    pub fn as_ref_record(&self) -> Option<&RefRecord> {
        match self {
            Packet::Ref(record) => Some(record),
            _ => None,
        }
    }

    /// Write this packet as one pkt-line frame.
    pub fn write_to(&self, mut out: impl Write) -> std::io::Result<()> {
        use gix_packetline::encode;
        match self {
            Packet::Flush => encode::flush_to_write(&mut out).map(|_| ()),
            Packet::Ref(record) => {
                let mut line = Vec::with_capacity(48 + record.name.len());
                line.extend_from_slice(record.id.to_hex().to_string().as_bytes());
                line.push(b' ');
                line.extend_from_slice(&record.name);
                if let Some(caps) = &record.capabilities {
                    line.push(0);
                    line.extend_from_slice(caps);
                }
                line.push(b'\n');
                encode::data_to_write(&line, &mut out).map(|_| ())
            }
            Packet::Comment(text) => {
                let mut line = Vec::with_capacity(2 + text.len());
                line.push(b'#');
                line.extend_from_slice(text);
                line.push(b'\n');
                encode::data_to_write(&line, &mut out).map(|_| ())
            }
            Packet::Ack { id, status } => {
                let line = match status {
                    Some(status) => format!("ACK {} {}\n", id.to_hex(), status.as_str()),
                    None => format!("ACK {}\n", id.to_hex()),
                };
                encode::data_to_write(line.as_bytes(), &mut out).map(|_| ())
            }
            Packet::Nak => encode::data_to_write(b"NAK\n", &mut out).map(|_| ()),
            Packet::Err(message) => {
                let mut line = Vec::with_capacity(5 + message.len());
                line.extend_from_slice(b"ERR ");
                line.extend_from_slice(message);
                encode::data_to_write(&line, &mut out).map(|_| ())
            }
            Packet::Data(data) => encode::data_to_write(data, &mut out).map(|_| ()),
        }
    }
}

fn parse_ack(rest: &[u8]) -> Result<Packet> {
    let (hex, status) = match rest.iter().position(|b| *b == b' ') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };
    let id = ObjectId::from_hex(hex)?;
    let status = match status {
        None => None,
        Some(s) if s == b"continue" => Some(AckStatus::Continue),
        Some(s) if s == b"common" => Some(AckStatus::Common),
        Some(s) if s == b"ready" => Some(AckStatus::Ready),
        Some(_) => {
            return Err(Error::Malformed {
                kind: "ACK",
                line: rest.as_bstr().to_owned(),
            })
        }
    };
    Ok(Packet::Ack { id, status })
}

/// `<40-hex> <name>[NUL<capabilities>]`, or `None` if the line is no ref.
fn parse_ref(line: &[u8]) -> Option<RefRecord> {
    if line.len() < 42 {
        return None;
    }
    let (hex, rest) = line.split_at(40);
    if rest.first() != Some(&b' ') {
        return None;
    }
    let id = ObjectId::from_hex(hex).ok()?;
    let rest = &rest[1..];
    let (name, capabilities) = match rest.iter().position(|b| *b == 0) {
        Some(pos) => (&rest[..pos], Some(rest[pos + 1..].as_bstr().to_owned())),
        None => (rest, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(RefRecord {
        id,
        name: name.as_bstr().to_owned(),
        capabilities,
    })
}
