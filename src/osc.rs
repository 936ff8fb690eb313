//! OSC wire codec.
//!
//! Everything on the wire is big-endian. Strings are NUL terminated and
//! padded to a multiple of four bytes; blobs carry a 4-byte length prefix
//! followed by the raw bytes (unpadded, matching what the board firmware
//! decodes).

use std::fmt;

use thiserror::Error;

mod command;
mod decode;
mod encode;

pub use command::infer_argument;
pub use decode::decode_packet;
pub use encode::{encode_message, encode_packet, padded_len};

pub(crate) use encode::put_bundle_header;

/// Literal that opens every bundle.
pub const BUNDLE_TAG: &str = "#bundle";

/// `"#bundle\0"` plus the 8-byte timetag.
pub const BUNDLE_HEADER_SIZE: usize = 16;

/// Default upper bound on an encoded packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2048;

/// Bundles nested deeper than this are rejected while decoding.
pub const MAX_BUNDLE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
}

impl Argument {
    /// Type tag character for this argument.
    pub fn tag(&self) -> char {
        match self {
            Argument::Int(_) => 'i',
            Argument::Float(_) => 'f',
            Argument::String(_) => 's',
            Argument::Blob(_) => 'b',
        }
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::String(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::String(v)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(v: Vec<u8>) -> Self {
        Argument::Blob(v)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int(v) => write!(f, "{v}"),
            Argument::Float(v) => write!(f, "{v}"),
            Argument::String(v) => write!(f, "{v}"),
            Argument::Blob(v) => {
                f.write_str("<")?;
                for (i, b) in v.iter().enumerate() {
                    if i != 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{b:02x}")?;
                }
                f.write_str(">")
            }
        }
    }
}

/// An address pattern plus its ordered, typed arguments.
///
/// The type tag is always derived from `args`, so the two cannot disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: String,
    pub args: Vec<Argument>,
}

impl Message {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I>(address: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = Argument>,
    {
        Self {
            address: address.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Builder-style append.
    pub fn arg(mut self, arg: impl Into<Argument>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<Argument>) {
        self.args.push(arg.into());
    }

    /// `","` followed by one tag character per argument.
    pub fn type_tag(&self) -> String {
        let mut tag = String::with_capacity(self.args.len() + 1);
        tag.push(',');
        tag.extend(self.args.iter().map(Argument::tag));
        tag
    }

    /// Encode as a bare (unbundled) packet.
    pub fn encode(&self) -> Result<Vec<u8>, OscError> {
        let mut dst = bytes::BytesMut::new();
        encode_message(self, &mut dst)?;
        if dst.len() > DEFAULT_MAX_PACKET_SIZE {
            return Err(OscError::Oversize {
                size: dst.len(),
                max: DEFAULT_MAX_PACKET_SIZE,
            });
        }
        Ok(dst.to_vec())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// NTP-style timetag: seconds in the high 32 bits, fraction in the low.
    pub timetag: u64,
    pub packets: Vec<Packet>,
}

impl Bundle {
    pub fn new(timetag: u64) -> Self {
        Self {
            timetag,
            packets: Vec::new(),
        }
    }

    pub fn push(&mut self, packet: impl Into<Packet>) {
        self.packets.push(packet.into());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// All messages in wire order, with nested bundles flattened.
    pub fn messages(&self) -> Vec<&Message> {
        let mut out = Vec::new();
        collect_messages(self, &mut out);
        out
    }

    pub fn encode(&self, max_packet_size: usize) -> Result<Vec<u8>, OscError> {
        encode_packet(self, max_packet_size)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OscError> {
        decode_packet(bytes)
    }
}

fn collect_messages<'a>(packet: &'a Packet, out: &mut Vec<&'a Message>) {
    match packet {
        Packet::Message(m) => out.push(m),
        Packet::Bundle(b) => {
            for p in &b.packets {
                collect_messages(p, out);
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(m: Message) -> Self {
        Packet::Message(m)
    }
}

impl From<Bundle> for Packet {
    fn from(b: Bundle) -> Self {
        Packet::Bundle(b)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("empty packet")]
    Empty,

    #[error("packets must start with '/' (message) or '#bundle' (bundle), got 0x{0:02X}")]
    UnknownPacketKind(u8),

    #[error("no type tag")]
    NoTypeTag,

    #[error("unknown type tag '{0}'")]
    UnknownTypeTag(char),

    #[error("{0} is not valid UTF-8")]
    NotUtf8(&'static str),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("bundles nested deeper than {MAX_BUNDLE_DEPTH}")]
    TooDeep,

    #[error("{0} unread bytes after the last argument")]
    TrailingBytes(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OscError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("truncated packet: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("packet too large ({size} bytes, max {max})")]
    Oversize { size: usize, max: usize },
}
