//! Control session with a running board.
//!
//! One session owns one transport and one outgoing batch. The wire protocol
//! has no request ids, so a session is strictly single-writer; talk to
//! several boards with several sessions.

use crate::batch::{BatchError, OutgoingBatch};
use crate::osc::{decode_packet, Message, OscError, Packet, DEFAULT_MAX_PACKET_SIZE};
use crate::transport::{ByteTransport, TransportError};

/// One receive attempt that produced something.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Packet(Packet),
    /// Bytes arrived but did not decode; the packet is dropped.
    Malformed(OscError),
}

pub struct OscSession<T> {
    transport: T,
    batch: OutgoingBatch,
    recv_buf: Vec<u8>,
}

impl<T: ByteTransport> OscSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_max_packet_size(transport, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(transport: T, max_packet_size: usize) -> Self {
        Self {
            transport,
            batch: OutgoingBatch::with_max_packet_size(max_packet_size),
            recv_buf: vec![0u8; max_packet_size],
        }
    }

    pub fn open(&mut self) -> Result<(), TransportError> {
        self.transport.open()
    }

    /// Flush anything pending, then close the transport.
    pub fn close(&mut self) -> Result<(), BatchError> {
        let flushed = self.batch.flush(&mut self.transport);
        self.transport.close()?;
        flushed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Queue `msg`; it goes out on the next [`OscSession::flush`] or when the
    /// pending bundle fills up.
    pub fn send(&mut self, msg: &Message) -> Result<(), BatchError> {
        self.batch.append(msg, &mut self.transport)
    }

    pub fn flush(&mut self) -> Result<(), BatchError> {
        self.batch.flush(&mut self.transport)
    }

    pub fn send_now(&mut self, msg: &Message) -> Result<(), BatchError> {
        self.send(msg)?;
        self.flush()
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// One non-blocking receive. `Ok(None)` means nothing this tick; a
    /// transport timeout counts as nothing.
    pub fn poll(&mut self) -> Result<Option<Incoming>, TransportError> {
        let n = match self.read_one() {
            Ok(n) => n,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(None);
        }

        match decode_packet(&self.recv_buf[..n]) {
            Ok(packet) => Ok(Some(Incoming::Packet(packet))),
            Err(e) => {
                tracing::warn!(
                    device = %self.transport.describe(),
                    bytes = n,
                    "dropping malformed packet: {e}"
                );
                Ok(Some(Incoming::Malformed(e)))
            }
        }
    }

    fn read_one(&mut self) -> Result<usize, TransportError> {
        if !self.transport.has_data_waiting()? {
            return Ok(0);
        }
        self.transport.receive(&mut self.recv_buf)
    }
}
