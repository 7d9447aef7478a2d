//! Programming over the network bootloader protocol.
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::constants::{MAX_READ_SIZE, WRITE_PAYLOAD_SIZE};
use crate::device::{BootloaderInfo, DeviceDb, DeviceDescriptor};
use crate::error::{Error, ErrorKind, ProtocolFault, Result, ResultExt, Violation};
use crate::programmer::{Programmer, ProgrammerDescriptor, Strategy};
use crate::protocol::{
    ChecksumReply, DiscoverReply, EraseWrite, NetworkConfig, Operation, Write,
};
use crate::session::{Session, SessionConfig};
use crate::transport::Transport;

const DESCRIPTOR: ProgrammerDescriptor = ProgrammerDescriptor {
    max_read: MAX_READ_SIZE,
    max_write: WRITE_PAYLOAD_SIZE,
};

/// The device a session is bound to after a successful handshake.
#[derive(Debug, Clone)]
struct Target {
    bootloader: BootloaderInfo,
    device: DeviceDescriptor,
}

pub struct NetworkProgrammer<'db, T> {
    session: Session<T>,
    devices: &'db DeviceDb,
    target: Option<Target>,
}

impl<'db, T: Transport> NetworkProgrammer<'db, T> {
    pub fn new(transport: T, devices: &'db DeviceDb, config: SessionConfig) -> Self {
        NetworkProgrammer {
            session: Session::new(transport, config),
            devices,
            target: None,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn bootloader(&self) -> Option<&BootloaderInfo> {
        self.target.as_ref().map(|t| &t.bootloader)
    }

    /// Where requests go, once connected.
    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.session.peer()
    }

    /// Discover a device on the local network.
    pub fn discover(&mut self, port: u16) -> Result<BootloaderInfo> {
        self.session
            .tx_mut()
            .select_operation(Operation::Discover, 0, 0);
        self.handshake(SocketAddrV4::new(Ipv4Addr::BROADCAST, port), Operation::Discover)
    }

    /// Configure the network of a device and bind to it.
    pub fn configure(&mut self, ip: Ipv4Addr, mac: [u8; 6], port: u16) -> Result<BootloaderInfo> {
        self.session.tx_mut().stage(&NetworkConfig {
            mac_address: mac,
            ip_address: ip,
        })?;
        self.handshake(SocketAddrV4::new(Ipv4Addr::BROADCAST, port), Operation::NetConfig)
    }

    /// Bind to a device with a known address.
    pub fn connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<BootloaderInfo> {
        self.session
            .tx_mut()
            .select_operation(Operation::Discover, 0, 0);
        self.handshake(SocketAddrV4::new(ip, port), Operation::Discover)
    }

    fn handshake(&mut self, dest: SocketAddrV4, operation: Operation) -> Result<BootloaderInfo> {
        self.target = None;
        let broadcast = dest.ip().is_broadcast();
        if broadcast {
            self.session.transport_mut().set_broadcast(true)?;
        }
        self.session.set_peer(dest);

        let reply = self.session.communicate().and_then(|rx| {
            let info = rx.payload::<DiscoverReply>(operation)?;
            Ok((info, rx.source()))
        });
        if broadcast {
            let disabled = self.session.transport_mut().set_broadcast(false);
            if reply.is_ok() {
                disabled?;
            }
        }
        let (info, source) = reply?;

        // broadcast replies tell us who to talk to from now on
        self.session.set_peer(source);
        log::info!("Detected target @ {}", source);

        let bootloader = BootloaderInfo {
            address: info.bootloader_address,
            version: info.version,
            device_id: info.device_id,
        };
        log::info!("Device ID.........: {:04X}", bootloader.device_id);
        log::info!(
            "Bootloader version: {}.{:02}",
            bootloader.version >> 8,
            bootloader.version & 0xff
        );
        log::info!("Bootloader address: 0x{:06X}", bootloader.address);

        let device = self
            .devices
            .find(bootloader.device_id)
            .ok_or(ErrorKind::UnknownDevice(bootloader.device_id))?;
        log::info!("Device............: {}", device);

        self.target = Some(Target { bootloader, device });
        Ok(bootloader)
    }

    fn check_connection(&self) -> Result<()> {
        if self.target.is_none() {
            return Err(Violation::NotConnected.into());
        }
        Ok(())
    }

    fn request_length(size: usize) -> Result<u16> {
        u16::try_from(size).map_err(|_| {
            Error::from(Violation::SizeLimit {
                size,
                limit: u16::MAX as usize,
            })
        })
    }
}

impl<T: Transport> Strategy for NetworkProgrammer<'_, T> {
    fn descriptor(&self) -> &ProgrammerDescriptor {
        &DESCRIPTOR
    }

    fn device(&self) -> Option<&DeviceDescriptor> {
        self.target.as_ref().map(|t| &t.device)
    }

    fn read(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        self.check_connection()?;
        let length = Self::request_length(size)?;

        self.session
            .tx_mut()
            .select_operation(Operation::Read, address, length);
        let data = self.session.communicate()?.data(Operation::Read)?;
        if data.len() < size {
            return Err(ProtocolFault::ShortPayload {
                needed: size,
                available: data.len(),
            }
            .into());
        }
        Ok(data[..size].to_vec())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.check_connection()?;
        self.session.tx_mut().stage(&Write::new(address, data)?)?;
        self.session.communicate()?;
        Ok(())
    }

    fn erase(&mut self, address: u32) -> Result<()> {
        self.check_connection()?;
        self.session
            .tx_mut()
            .select_operation(Operation::Erase, address, 0);
        self.session.communicate()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.check_connection()?;
        self.session
            .tx_mut()
            .select_operation(Operation::Reset, 0, 0);
        self.session.communicate()?;
        log::info!("Device reset");
        Ok(())
    }

    fn checksum(&mut self, address: u32, size: usize) -> Result<u32> {
        self.check_connection()?;
        let length = Self::request_length(size)?;

        self.session
            .tx_mut()
            .select_operation(Operation::Checksum, address, length);
        let reply = self
            .session
            .communicate()?
            .payload::<ChecksumReply>(Operation::Checksum)?;
        Ok(reply.checksum)
    }

    fn chip_erase(&mut self) -> Result<()> {
        self.check_connection()?;
        self.session
            .tx_mut()
            .select_operation(Operation::ChipErase, 0, 0);
        self.session.communicate()?;
        Ok(())
    }

    fn erase_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.check_connection()?;
        self.session
            .tx_mut()
            .stage(&EraseWrite(Write::new(address, data)?))?;
        self.session.communicate()?;
        Ok(())
    }
}

impl<T: Transport> Programmer<NetworkProgrammer<'_, T>> {
    /// Broadcast a discovery request and bind to whoever answers first.
    pub fn discover(&mut self, port: u16) -> Result<BootloaderInfo> {
        self.strategy_mut()
            .discover(port)
            .with_context(|| "Unable to discover a target.")
    }

    pub fn configure(&mut self, ip: Ipv4Addr, mac: [u8; 6], port: u16) -> Result<BootloaderInfo> {
        self.strategy_mut()
            .configure(ip, mac, port)
            .with_context(|| "Unable to configure network connection.")
    }

    pub fn connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<BootloaderInfo> {
        self.strategy_mut()
            .connect(ip, port)
            .with_context(|| "Unable to connect to a target.")
    }
}
