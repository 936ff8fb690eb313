//! Outgoing message batching.
//!
//! Messages are appended to one pending bundle until the next one would not
//! fit, then the pending bundle goes out and a new one starts. Flushing a
//! batch that holds a single message sends that message bare.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::osc::{
    encode_message, put_bundle_header, Message, OscError, BUNDLE_HEADER_SIZE,
    DEFAULT_MAX_PACKET_SIZE,
};
use crate::transport::{ByteTransport, TransportError};

const ELEMENT_LEN_SIZE: usize = 4;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("message {address} is {size} bytes, larger than a packet can hold ({max})")]
    OversizeMessage {
        address: String,
        size: usize,
        max: usize,
    },

    #[error("encode: {0}")]
    Encode(#[from] OscError),

    #[error("send: {0}")]
    Transport(#[from] TransportError),
}

pub struct OutgoingBatch {
    buf: BytesMut,
    count: usize,
    max_packet_size: usize,
    timetag: u64,
}

impl Default for OutgoingBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl OutgoingBatch {
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_packet_size),
            count: 0,
            max_packet_size,
            // Boards treat every timetag as "now"; zero is what they expect.
            timetag: 0,
        }
    }

    /// Messages waiting in the pending bundle.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn fits(&self, encoded_len: usize) -> bool {
        let header = if self.count == 0 { BUNDLE_HEADER_SIZE } else { 0 };
        self.buf.len() + header + ELEMENT_LEN_SIZE + encoded_len <= self.max_packet_size
    }

    /// Queue `msg`, flushing the pending bundle through `transport` first if
    /// `msg` would push it past the size limit.
    pub fn append<T>(&mut self, msg: &Message, transport: &mut T) -> Result<(), BatchError>
    where
        T: ByteTransport + ?Sized,
    {
        let mut encoded = BytesMut::new();
        encode_message(msg, &mut encoded)?;

        if !self.fits(encoded.len()) && self.count > 0 {
            self.flush(transport)?;
        }
        if !self.fits(encoded.len()) {
            return Err(BatchError::OversizeMessage {
                address: msg.address.clone(),
                size: encoded.len(),
                max: self.max_packet_size,
            });
        }

        if self.count == 0 {
            put_bundle_header(&mut self.buf, self.timetag);
        }
        self.buf.put_u32(encoded.len() as u32);
        self.buf.put_slice(&encoded);
        self.count += 1;
        Ok(())
    }

    /// Send whatever is pending. A no-op when empty. The batch is reset even
    /// when the send fails, so one bad write never resends stale messages.
    pub fn flush<T>(&mut self, transport: &mut T) -> Result<(), BatchError>
    where
        T: ByteTransport + ?Sized,
    {
        if self.count == 0 {
            return Ok(());
        }

        let payload: &[u8] = if self.count == 1 {
            &self.buf[BUNDLE_HEADER_SIZE + ELEMENT_LEN_SIZE..]
        } else {
            &self.buf[..]
        };
        tracing::trace!(messages = self.count, bytes = payload.len(), "flush batch");
        let res = transport.send(payload);

        self.buf.clear();
        self.count = 0;
        res.map_err(BatchError::from)
    }
}
