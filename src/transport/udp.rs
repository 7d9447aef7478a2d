//! UDP Transportation.
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::Result;

use super::Transport;

pub struct UdpTransport {
    socket: UdpSocket,
    buffer: Box<[u8; MAX_DATAGRAM_SIZE]>,
}

impl UdpTransport {
    /// Bind to an ephemeral port on all interfaces.
    pub fn open() -> Result<Self> {
        Self::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
    }

    pub fn bind(local: SocketAddrV4) -> Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_broadcast(false)?;
        log::debug!("UDP socket bound to {}", socket.local_addr()?);
        Ok(UdpTransport {
            socket,
            buffer: Box::new([0u8; MAX_DATAGRAM_SIZE]),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, datagram: &[u8], dest: SocketAddrV4) -> Result<()> {
        let sent = self.socket.send_to(datagram, dest)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, datagram.len()),
            )
            .into());
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddrV4)>> {
        // a zero read timeout is rejected by the socket API
        if timeout.is_zero() {
            return Ok(None);
        }
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv_from(&mut self.buffer[..]) {
            Ok((len, SocketAddr::V4(source))) => Ok(Some((self.buffer[..len].to_vec(), source))),
            Ok((_, source)) => {
                log::debug!("dropping datagram from {}", source);
                Ok(None)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_broadcast(&mut self, enabled: bool) -> Result<()> {
        self.socket.set_broadcast(enabled)?;
        Ok(())
    }
}
