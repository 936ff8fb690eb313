use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::slip::{encode_frame, SlipDecoder};
use super::{ByteTransport, TransportError};
use crate::osc::DEFAULT_MAX_PACKET_SIZE;

/// How to open a USB-CDC / serial port.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// Read timeout handed to the OS driver.
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(100),
        }
    }

    pub(crate) fn open_port(&self) -> Result<Box<dyn SerialPort>, TransportError> {
        serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| TransportError::Serial {
                port: self.port_name.clone(),
                source: e,
            })
    }
}

pub(crate) fn serial_err(port: &str, source: serialport::Error) -> TransportError {
    TransportError::Serial {
        port: port.to_string(),
        source,
    }
}

/// OSC over USB-CDC: each packet travels as one SLIP frame.
pub struct SlipSerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    decoder: SlipDecoder,
    frames: VecDeque<Vec<u8>>,
    max_frame: usize,
}

impl SlipSerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self::with_max_frame(config, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_frame(config: SerialConfig, max_frame: usize) -> Self {
        Self {
            config,
            port: None,
            decoder: SlipDecoder::new(max_frame),
            frames: VecDeque::new(),
            max_frame,
        }
    }

    /// Drain whatever the driver has buffered into the decoder.
    fn pump(&mut self) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        let waiting = port
            .bytes_to_read()
            .map_err(|e| serial_err(&self.config.port_name, e))? as usize;
        if waiting == 0 {
            return Ok(());
        }

        let mut raw = vec![0u8; waiting];
        let n = match port.read(&mut raw) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };

        for &b in &raw[..n] {
            match self.decoder.push(b) {
                Ok(Some(frame)) => self.frames.push_back(frame),
                Ok(None) => {}
                Err(e) => tracing::warn!(port = %self.config.port_name, "dropping frame: {e}"),
            }
        }
        Ok(())
    }
}

impl ByteTransport for SlipSerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            let port = self.config.open_port()?;
            tracing::debug!(
                port = %self.config.port_name,
                baud = self.config.baud_rate,
                "opened serial port"
            );
            self.port = Some(port);
            self.decoder.reset();
            self.frames.clear();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.port = None;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() > self.max_frame {
            return Err(TransportError::PacketTooLarge {
                size: bytes.len(),
                max: self.max_frame,
            });
        }
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(&encode_frame(bytes))?;
        port.flush()?;
        Ok(())
    }

    fn has_data_waiting(&mut self) -> Result<bool, TransportError> {
        if self.frames.is_empty() {
            self.pump()?;
        }
        Ok(!self.frames.is_empty())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.frames.is_empty() {
            self.pump()?;
        }
        let Some(frame) = self.frames.pop_front() else {
            return Ok(0);
        };
        if frame.len() > buf.len() {
            return Err(TransportError::PacketTooLarge {
                size: frame.len(),
                max: buf.len(),
            });
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn describe(&self) -> String {
        self.config.port_name.clone()
    }
}
