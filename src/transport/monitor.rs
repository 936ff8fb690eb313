use std::io::{Read, Write};

use serialport::SerialPort;

use super::serial::serial_err;
use super::{ByteTransport, SerialConfig, TransportError};

/// Raw serial link to the SAM-BA boot monitor. No framing: commands and
/// file data go out verbatim, replies come back as a byte stream.
pub struct MonitorTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl MonitorTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl ByteTransport for MonitorTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            let port = self.config.open_port()?;
            // Stale bytes from a previous session would be read as a reply.
            if let Err(e) = port.clear(serialport::ClearBuffer::All) {
                tracing::debug!(port = %self.config.port_name, "clear failed: {e}");
            }
            self.port = Some(port);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.port = None;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn has_data_waiting(&mut self) -> Result<bool, TransportError> {
        let name = self.config.port_name.clone();
        let waiting = self
            .port()?
            .bytes_to_read()
            .map_err(|e| serial_err(&name, e))?;
        Ok(waiting > 0)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.config.port_name.clone()
    }
}
