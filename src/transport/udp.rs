use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::{ByteTransport, TransportError};
use crate::osc::DEFAULT_MAX_PACKET_SIZE;

/// Port the board listens on, and replies from.
pub const DEFAULT_CONTROL_PORT: u16 = 10000;

/// Port used by the factory test fixture.
pub const FACTORY_TEST_PORT: u16 = 12000;

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub remote_host: String,
    pub send_port: u16,
    pub listen_port: u16,
}

impl UdpConfig {
    pub fn new(remote_host: impl Into<String>) -> Self {
        Self {
            remote_host: remote_host.into(),
            send_port: DEFAULT_CONTROL_PORT,
            listen_port: DEFAULT_CONTROL_PORT,
        }
    }

    /// Talk to the factory test fixture, which sends and listens on its own port.
    pub fn factory_test(remote_host: impl Into<String>) -> Self {
        Self {
            remote_host: remote_host.into(),
            send_port: FACTORY_TEST_PORT,
            listen_port: FACTORY_TEST_PORT,
        }
    }
}

/// One OSC packet per datagram.
pub struct UdpTransport {
    config: UdpConfig,
    socket: Option<UdpSocket>,
    remote: Option<SocketAddr>,
    pending: Option<Vec<u8>>,
}

impl UdpTransport {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            socket: None,
            remote: None,
            pending: None,
        }
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let host = format!("{}:{}", self.config.remote_host, self.config.send_port);
        let mut addrs = host
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: host.clone(),
                source,
            })?;
        addrs.next().ok_or_else(|| TransportError::Resolve {
            host,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        })
    }

    /// Pull one datagram off the socket into `pending`, if there is one.
    fn fill(&mut self) -> Result<(), TransportError> {
        if self.pending.is_some() {
            return Ok(());
        }
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let mut buf = vec![0u8; DEFAULT_MAX_PACKET_SIZE];
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                tracing::trace!(%from, bytes = n, "datagram");
                buf.truncate(n);
                self.pending = Some(buf);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl ByteTransport for UdpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let remote = self.resolve()?;
        let socket = UdpSocket::bind(("0.0.0.0", self.config.listen_port))?;
        socket.set_nonblocking(true)?;
        tracing::debug!(%remote, listen = self.config.listen_port, "udp socket bound");
        self.socket = Some(socket);
        self.remote = Some(remote);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        self.pending = None;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let remote = self.remote.ok_or(TransportError::NotOpen)?;
        socket.send_to(bytes, remote)?;
        Ok(())
    }

    fn has_data_waiting(&mut self) -> Result<bool, TransportError> {
        self.fill()?;
        Ok(self.pending.is_some())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.fill()?;
        let Some(datagram) = self.pending.take() else {
            return Ok(0);
        };
        if datagram.len() > buf.len() {
            return Err(TransportError::PacketTooLarge {
                size: datagram.len(),
                max: buf.len(),
            });
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.config.remote_host, self.config.send_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_test_config_uses_the_fixture_port_both_ways() {
        let c = UdpConfig::factory_test("192.168.0.204");
        assert_eq!(c.remote_host, "192.168.0.204");
        assert_eq!((c.send_port, c.listen_port), (12000, 12000));
        assert_ne!(c.send_port, UdpConfig::new("x").send_port);
    }

    #[test]
    fn loopback_datagram_roundtrip() {
        // Bind a peer on an ephemeral port and point the transport at it.
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_port = peer.local_addr().unwrap().port();

        let mut t = UdpTransport::new(UdpConfig {
            remote_host: "127.0.0.1".into(),
            send_port: peer_port,
            listen_port: 0,
        });
        t.open().unwrap();
        t.send(b"/ping\0\0\0,\0\0\0").unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"/ping\0\0\0,\0\0\0");

        peer.send_to(b"/pong\0\0\0,\0\0\0", from).unwrap();
        let mut got = 0;
        for _ in 0..200 {
            got = t.receive(&mut buf).unwrap();
            if got > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(&buf[..got], b"/pong\0\0\0,\0\0\0");
    }

    #[test]
    fn closed_transport_rejects_send() {
        let mut t = UdpTransport::new(UdpConfig::new("127.0.0.1"));
        assert!(matches!(t.send(b"x"), Err(TransportError::NotOpen)));
        assert_eq!(t.describe(), "127.0.0.1:10000");
    }
}
