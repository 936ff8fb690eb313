//! SAM-BA boot monitor client.
//!
//! The monitor speaks a tiny ASCII command set over a raw serial link. There
//! is no flow control and no request id: after each command (and each file
//! chunk) the host waits a fixed delay, and any reply belongs to the last
//! command sent. Those delays keep the monitor from dropping bytes, so they
//! are part of the protocol, not tuning.

use std::time::Duration;

use thiserror::Error;

use crate::clock::Clock;
use crate::transport::{ByteTransport, TransportError};

/// Where the second-stage loader is staged, and where `G` jumps to run it.
pub const LOADER_ADDR: u32 = 0x0020_1600;

/// SRAM buffer the loader copies into flash.
pub const PAGE_BUFFER_ADDR: u32 = 0x0020_1400;

/// Embedded flash controller status register (MC_FSR) and its ready bit.
pub const EFC_STATUS_ADDR: u32 = 0xFFFF_FF68;
pub const EFC_READY: u32 = 0x1;

/// Embedded flash controller command register (MC_FCR).
pub const EFC_COMMAND_ADDR: u32 = 0xFFFF_FF64;

/// Key 0x5A, set GPNVM bit 2: boot from flash.
pub const EFC_SET_BOOT_FROM_FLASH: u32 = 0x5A00_020B;

/// Reset controller (RSTC_CR) and key 0xA5 with PROCRST, PERRST and EXTRST.
pub const RSTC_CR_ADDR: u32 = 0xFFFF_FD00;
pub const RSTC_RESET_ALL: u32 = 0xA500_000D;

/// Upper bound on stale bytes thrown away after `N#`.
const MAX_DISCARD: usize = 256;

/// Word holding the page index for the loader, just past the page buffer.
pub fn page_index_addr(page_size: u32) -> u32 {
    PAGE_BUFFER_ADDR + page_size
}

#[derive(Debug, Clone)]
pub struct SambaTiming {
    /// Pause after every command.
    pub command_delay: Duration,
    /// Pause after every file chunk.
    pub chunk_delay: Duration,
    pub chunk_size: usize,
    /// Bound for replies that must arrive (read word).
    pub reply_timeout: Duration,
    /// Bound for the optional reply to `N#`.
    pub ident_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SambaTiming {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_millis(2),
            chunk_delay: Duration::from_millis(2),
            chunk_size: 64,
            reply_timeout: Duration::from_secs(3),
            ident_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
        }
    }
}

#[derive(Error, Debug)]
pub enum SambaError {
    #[error("{command}: {source}")]
    Transport {
        command: String,
        #[source]
        source: TransportError,
    },

    #[error("{command}: got {got} of {expected} reply bytes within {timeout_ms} ms")]
    Timeout {
        command: String,
        expected: usize,
        got: usize,
        timeout_ms: u64,
    },
}

impl SambaError {
    pub fn is_timeout(&self) -> bool {
        match self {
            SambaError::Timeout { .. } => true,
            SambaError::Transport { source, .. } => source.is_timeout(),
        }
    }
}

pub struct SambaMonitor<T, C> {
    transport: T,
    clock: C,
    timing: SambaTiming,
}

impl<T: ByteTransport, C: Clock> SambaMonitor<T, C> {
    pub fn new(transport: T, clock: C, timing: SambaTiming) -> Self {
        Self {
            transport,
            clock,
            timing,
        }
    }

    pub fn timing(&self) -> &SambaTiming {
        &self.timing
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn into_parts(self) -> (T, C) {
        (self.transport, self.clock)
    }

    fn command(&mut self, cmd: &str) -> Result<(), SambaError> {
        tracing::trace!(cmd, "samba");
        self.transport
            .send(cmd.as_bytes())
            .map_err(|source| SambaError::Transport {
                command: cmd.to_string(),
                source,
            })?;
        let d = self.timing.command_delay;
        self.clock.sleep(d);
        Ok(())
    }

    /// Poll until `buf` is full or `timeout` elapses; returns bytes read.
    /// A transport that reports data but yields none still counts against
    /// the deadline.
    fn read_reply(
        &mut self,
        cmd: &str,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SambaError> {
        let start = self.clock.now();
        let mut got = 0;
        let wrap = |source| SambaError::Transport {
            command: cmd.to_string(),
            source,
        };

        while got < buf.len() {
            let n = if self.transport.has_data_waiting().map_err(wrap)? {
                self.transport.receive(&mut buf[got..]).map_err(wrap)?
            } else {
                0
            };
            got += n;
            if got >= buf.len() || self.clock.now().duration_since(start) >= timeout {
                break;
            }
            if n == 0 {
                let d = self.timing.poll_interval;
                self.clock.sleep(d);
            }
        }
        Ok(got)
    }

    /// Throw away whatever is still buffered, up to `MAX_DISCARD` bytes.
    fn discard_pending(&mut self, cmd: &str) -> Result<usize, SambaError> {
        let wrap = |source| SambaError::Transport {
            command: cmd.to_string(),
            source,
        };
        let mut scratch = [0u8; 64];
        let mut dropped = 0;
        while dropped < MAX_DISCARD && self.transport.has_data_waiting().map_err(wrap)? {
            let n = self.transport.receive(&mut scratch).map_err(wrap)?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        Ok(dropped)
    }

    /// Send `N#` (switch the monitor to binary replies). Older monitors do
    /// not answer, so a missing reply is not an error; returns whether one came.
    ///
    /// Whatever the monitor sends beyond the first bytes (a longer prompt, or
    /// a reply that straddles the ident bound) is discarded so it cannot be
    /// read back as the next command's reply.
    pub fn identify(&mut self) -> Result<bool, SambaError> {
        self.command("N#")?;
        let mut scratch = [0u8; 2];
        let timeout = self.timing.ident_timeout;
        let got = self.read_reply("N#", &mut scratch, timeout)?;

        let d = self.timing.command_delay;
        self.clock.sleep(d);
        let dropped = self.discard_pending("N#")?;
        if dropped > 0 {
            tracing::debug!(dropped, "discarded trailing N# reply bytes");
        }
        Ok(got > 0 || dropped > 0)
    }

    /// `w<addr>,4#`: the monitor answers with the word in little-endian order.
    pub fn read_word(&mut self, addr: u32) -> Result<u32, SambaError> {
        let cmd = format!("w{addr:08X},4#");
        self.command(&cmd)?;

        let mut reply = [0u8; 4];
        let timeout = self.timing.reply_timeout;
        let got = self.read_reply(&cmd, &mut reply, timeout)?;
        if got < reply.len() {
            return Err(SambaError::Timeout {
                command: cmd,
                expected: reply.len(),
                got,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let d = self.timing.command_delay;
        self.clock.sleep(d);
        Ok(u32::from_le_bytes(reply))
    }

    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), SambaError> {
        self.command(&format!("W{addr:08X},{value:08X}#"))
    }

    /// `S<addr>,<len>#` followed by `data` in fixed-size chunks.
    pub fn send_file(&mut self, addr: u32, data: &[u8]) -> Result<(), SambaError> {
        let cmd = format!("S{addr:X},{:X}#", data.len());
        self.command(&cmd)?;

        let chunk_size = self.timing.chunk_size.max(1);
        let delay = self.timing.chunk_delay;
        for chunk in data.chunks(chunk_size) {
            self.transport
                .send(chunk)
                .map_err(|source| SambaError::Transport {
                    command: cmd.clone(),
                    source,
                })?;
            self.clock.sleep(delay);
        }
        Ok(())
    }

    pub fn go(&mut self, addr: u32) -> Result<(), SambaError> {
        self.command(&format!("G{addr:08X}#"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::mock::MockTransport;

    fn monitor(t: MockTransport) -> SambaMonitor<MockTransport, ManualClock> {
        SambaMonitor::new(t, ManualClock::new(), SambaTiming::default())
    }

    #[test]
    fn command_strings_are_uppercase_hex_without_prefix() {
        let mut m = monitor(MockTransport::new());
        m.write_word(0x0020_1500, 5).unwrap();
        m.go(LOADER_ADDR).unwrap();
        m.send_file(0x0020_1400, &[0u8; 3]).unwrap();

        assert_eq!(
            m.transport_mut().commands(),
            vec!["W00201500,00000005#", "G00201600#", "S201400,3#"]
        );
    }

    #[test]
    fn read_word_decodes_little_endian_reply() {
        let t = MockTransport::new().with_responder(|cmd| {
            (cmd == b"wFFFFF240,4#").then(|| 0x275B_0940u32.to_le_bytes().to_vec())
        });
        let mut m = monitor(t);
        assert_eq!(m.read_word(0xFFFF_F240).unwrap(), 0x275B_0940);
    }

    #[test]
    fn read_word_times_out_after_reply_bound() {
        let t = MockTransport::new().with_responder(|_| Some(vec![0xAA, 0xBB]));
        let mut m = monitor(t);
        let err = m.read_word(0xFFFF_FF68).unwrap_err();
        match err {
            SambaError::Timeout {
                expected,
                got,
                timeout_ms,
                ..
            } => {
                assert_eq!((expected, got, timeout_ms), (4, 2, 3000));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(m.clock_mut().slept >= Duration::from_secs(3));
    }

    #[test]
    fn identify_tolerates_silent_monitor() {
        let mut m = monitor(MockTransport::new());
        assert!(!m.identify().unwrap());
        // Waited at most the short ident bound, not the full reply timeout.
        assert!(m.clock_mut().slept < Duration::from_millis(200));

        let t = MockTransport::new().with_responder(|c| (c == b"N#").then(|| b"\n\r".to_vec()));
        let mut m = monitor(t);
        assert!(m.identify().unwrap());
    }

    #[test]
    fn read_word_times_out_when_transport_reports_data_but_yields_none() {
        let mut m = monitor(MockTransport::new().stalled());
        let err = m.read_word(0xFFFF_F240).unwrap_err();
        assert!(
            matches!(err, SambaError::Timeout { got: 0, expected: 4, .. }),
            "{err:?}"
        );
        let slept = m.clock_mut().slept;
        assert!(slept >= Duration::from_secs(3));
        assert!(slept < Duration::from_secs(4));
    }

    #[test]
    fn long_ident_reply_does_not_leak_into_chip_id_read() {
        let t = MockTransport::new().with_responder(|cmd| match cmd {
            b"N#" => Some(b"\n\r>\n\r>".to_vec()),
            b"wFFFFF240,4#" => Some(0x275B_0940u32.to_le_bytes().to_vec()),
            _ => None,
        });
        let mut m = monitor(t);
        assert!(m.identify().unwrap());
        assert!(m.transport_mut().incoming.is_empty());
        assert_eq!(m.read_word(0xFFFF_F240).unwrap(), 0x275B_0940);
    }

    #[test]
    fn send_file_chunks_with_a_delay_after_each_chunk() {
        let mut m = monitor(MockTransport::new());
        let data: Vec<u8> = (0..=199u8).collect();
        m.send_file(PAGE_BUFFER_ADDR, &data).unwrap();

        let sent = &m.transport_mut().sent;
        assert_eq!(sent[0], b"S201400,C8#");
        let sizes: Vec<usize> = sent[1..].iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![64, 64, 64, 8]);
        assert_eq!(sent[1..].concat(), data);

        // One command delay plus one delay per chunk.
        assert_eq!(m.clock_mut().slept, Duration::from_millis(2 * 5));
    }

    #[test]
    fn transport_failure_names_the_command() {
        let t = MockTransport::new().fail_when(|c| c.starts_with(b"G"));
        let mut m = monitor(t);
        let err = m.go(LOADER_ADDR).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "G00201600#: timed out");
    }
}
