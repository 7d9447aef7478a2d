//! Abstract datagram transport interface.
use std::net::SocketAddrV4;
use std::time::Duration;

use crate::error::Result;

pub use self::udp::UdpTransport;

mod udp;

/// Abstraction of the transport layer.
///
/// Only moves datagrams around. Retries and correlation are handled by the
/// [`Session`](crate::session::Session) on top of it.
pub trait Transport {
    fn send(&mut self, datagram: &[u8], dest: SocketAddrV4) -> Result<()>;

    /// Wait at most `timeout` for a datagram. `None` when nothing arrived.
    fn receive(&mut self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddrV4)>>;

    /// Allow sending to the limited broadcast address.
    fn set_broadcast(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, datagram: &[u8], dest: SocketAddrV4) -> Result<()> {
        (**self).send(datagram, dest)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddrV4)>> {
        (**self).receive(timeout)
    }

    fn set_broadcast(&mut self, enabled: bool) -> Result<()> {
        (**self).set_broadcast(enabled)
    }
}
