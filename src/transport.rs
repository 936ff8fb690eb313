//! Byte transports.
//!
//! Protocol code only ever sees [`ByteTransport`]. Which concrete transport
//! backs a session (SLIP over USB-CDC/serial, UDP, or the raw SAM-BA monitor
//! port) is decided once, by whoever builds the session.

use std::io;

use thiserror::Error;

pub mod monitor;
pub mod serial;
pub mod slip;
pub mod udp;

#[cfg(test)]
pub(crate) mod mock;

pub use monitor::MonitorTransport;
pub use serial::{SerialConfig, SlipSerialTransport};
pub use udp::{UdpConfig, UdpTransport};

pub trait ByteTransport {
    fn open(&mut self) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;

    /// Send one buffer. Packet transports treat it as one packet; the monitor
    /// transport writes it to the stream as-is.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking: is anything ready for [`ByteTransport::receive`]?
    fn has_data_waiting(&mut self) -> Result<bool, TransportError>;

    /// Copy whatever is waiting into `buf`; `Ok(0)` means nothing arrived.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Human readable key for logs and events (port name, host:port).
    fn describe(&self) -> String;
}

impl<T: ByteTransport + ?Sized> ByteTransport for &mut T {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn has_data_waiting(&mut self) -> Result<bool, TransportError> {
        (**self).has_data_waiting()
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).receive(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn has_data_waiting(&mut self) -> Result<bool, TransportError> {
        (**self).has_data_waiting()
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).receive(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,

    #[error("serial port '{port}': {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out")]
    Timeout,

    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },
}

impl TransportError {
    /// Timeouts are "nothing this tick" for control polling and fatal for flashing.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classification() {
        assert!(TransportError::Timeout.is_timeout());
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_timeout());
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::WouldBlock)).is_timeout());
        assert!(!TransportError::NotOpen.is_timeout());
        assert!(!TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_timeout());
    }
}
