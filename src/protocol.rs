//! The underlying binary protocol of the network bootloader.
//!
//! Every multi-byte field is big-endian, except [`DiscoverReply::device_id`].

use std::fmt;
use std::net::Ipv4Addr;

use scroll::{Pread, Pwrite, BE, LE};

use crate::constants::{
    operations, status, PROTOCOL_VERSION, REPLY_HEADER_SIZE, REQUEST_HEADER_SIZE,
    WRITE_PAYLOAD_SIZE,
};
use crate::error::{ProtocolFault, Result, Violation};

/// Bootloader operation, the third byte of every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Reply: [`DiscoverReply`]
    Discover = operations::DISCOVER,
    /// Request: [`NetworkConfig`], reply: [`DiscoverReply`]
    NetConfig = operations::NET_CONFIG,
    /// Reply: raw memory contents
    Read = operations::READ,
    /// Request: [`Write`]
    Write = operations::WRITE,
    Erase = operations::ERASE,
    Reset = operations::RESET,
    /// Request: [`EraseWrite`]
    EraseWrite = operations::ERASE_WRITE,
    ChipErase = operations::CHIP_ERASE,
    /// Reply: [`ChecksumReply`]
    Checksum = operations::CHECKSUM,
}

impl Operation {
    /// Operations the target may acknowledge with `InProgress` before finishing.
    pub fn may_be_in_progress(self) -> bool {
        matches!(
            self,
            Operation::Read
                | Operation::Write
                | Operation::Erase
                | Operation::EraseWrite
                | Operation::ChipErase
                | Operation::Checksum
        )
    }
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        Ok(match code {
            operations::DISCOVER => Operation::Discover,
            operations::NET_CONFIG => Operation::NetConfig,
            operations::READ => Operation::Read,
            operations::WRITE => Operation::Write,
            operations::ERASE => Operation::Erase,
            operations::RESET => Operation::Reset,
            operations::ERASE_WRITE => Operation::EraseWrite,
            operations::CHIP_ERASE => Operation::ChipErase,
            operations::CHECKSUM => Operation::Checksum,
            other => return Err(other),
        })
    }
}

/// Frame status, the fourth byte of every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Outbound frame, never valid in a reply
    Request = status::REQUEST,
    Ok = status::OK,
    InProgress = status::IN_PROGRESS,
    InvalidOperation = status::INV_OP,
    InvalidParameter = status::INV_PARAM,
    InvalidLength = status::INV_LENGTH,
    InvalidAddress = status::INV_ADDR,
    ProtectedAddress = status::PROTECTED_ADDR,
    /// Sender isn't permitted to perform this operation - discover first
    InvalidSource = status::INV_SRC,
    InvalidPacketSize = status::PKT_SIZE,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        Ok(match code {
            status::REQUEST => Status::Request,
            status::OK => Status::Ok,
            status::IN_PROGRESS => Status::InProgress,
            status::INV_OP => Status::InvalidOperation,
            status::INV_PARAM => Status::InvalidParameter,
            status::INV_LENGTH => Status::InvalidLength,
            status::INV_ADDR => Status::InvalidAddress,
            status::PROTECTED_ADDR => Status::ProtectedAddress,
            status::INV_SRC => Status::InvalidSource,
            status::PKT_SIZE => Status::InvalidPacketSize,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub version: u8,
    pub sequence: u8,
    pub operation: Operation,
    pub status: Status,
    pub address: u32,
    pub length: u16,
}

impl RequestHeader {
    pub const SIZE: usize = REQUEST_HEADER_SIZE;

    pub fn new(operation: Operation) -> Self {
        RequestHeader {
            version: PROTOCOL_VERSION,
            sequence: 0,
            operation,
            status: Status::Request,
            address: 0,
            length: 0,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        buf.pwrite_with(self.version, 0, BE)?;
        buf.pwrite_with(self.sequence, 1, BE)?;
        buf.pwrite_with(self.operation as u8, 2, BE)?;
        buf.pwrite_with(self.status as u8, 3, BE)?;
        buf.pwrite_with(self.address, 4, BE)?;
        buf.pwrite_with(self.length, 8, BE)?;
        Ok(())
    }

    /// Decodes a request as the target sees it. Unknown codes are rejected.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        let operation = buf.pread_with::<u8>(2, BE)?;
        let status = buf.pread_with::<u8>(3, BE)?;
        Ok(RequestHeader {
            version: buf.pread_with(0, BE)?,
            sequence: buf.pread_with(1, BE)?,
            operation: Operation::try_from(operation).map_err(|code| {
                ProtocolFault::Malformed(format!("unknown operation 0x{:02X}", code))
            })?,
            status: Status::try_from(status).map_err(|code| {
                ProtocolFault::Malformed(format!("unknown status 0x{:02X}", code))
            })?,
            address: buf.pread_with(4, BE)?,
            length: buf.pread_with(8, BE)?,
        })
    }
}

/// Reply header. Operation and status stay raw so that a reply can be
/// inspected before it is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub version: u8,
    pub sequence: u8,
    pub operation: u8,
    pub status: u8,
}

impl ReplyHeader {
    pub const SIZE: usize = REPLY_HEADER_SIZE;

    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        buf.pwrite_with(self.version, 0, BE)?;
        buf.pwrite_with(self.sequence, 1, BE)?;
        buf.pwrite_with(self.operation, 2, BE)?;
        buf.pwrite_with(self.status, 3, BE)?;
        Ok(())
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        Ok(ReplyHeader {
            version: buf.pread_with(0, BE)?,
            sequence: buf.pread_with(1, BE)?,
            operation: buf.pread_with(2, BE)?,
            status: buf.pread_with(3, BE)?,
        })
    }
}

/// A fixed size structure following a header.
pub trait Payload: Sized {
    const SIZE: usize;

    fn write_to(&self, buf: &mut [u8]) -> Result<()>;
    fn read_from(buf: &[u8]) -> Result<Self>;
}

/// A payload sent to the target, which selects the request operation.
pub trait RequestPayload: Payload {
    const OPERATION: Operation;
}

/// Answer to `Discover` and `NetConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverReply {
    /// Major in the high byte, minor in the low byte
    pub version: u16,
    pub bootloader_address: u32,
    /// Little-endian on the wire, as read from the device id registers.
    pub device_id: u16,
}

impl Payload for DiscoverReply {
    const SIZE: usize = 8;

    fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        buf.pwrite_with(self.version, 0, BE)?;
        buf.pwrite_with(self.bootloader_address, 2, BE)?;
        buf.pwrite_with(self.device_id, 6, LE)?;
        Ok(())
    }

    fn read_from(buf: &[u8]) -> Result<Self> {
        Ok(DiscoverReply {
            version: buf.pread_with(0, BE)?,
            bootloader_address: buf.pread_with(2, BE)?,
            device_id: buf.pread_with(6, LE)?,
        })
    }
}

/// New network identity for the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mac_address: [u8; 6],
    pub ip_address: Ipv4Addr,
}

impl Payload for NetworkConfig {
    const SIZE: usize = 10;

    fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < Self::SIZE {
            return Err(scroll::Error::TooBig {
                size: Self::SIZE,
                len: buf.len(),
            }
            .into());
        }
        buf[..6].copy_from_slice(&self.mac_address);
        buf[6..10].copy_from_slice(&self.ip_address.octets());
        Ok(())
    }

    fn read_from(buf: &[u8]) -> Result<Self> {
        let mut mac_address = [0u8; 6];
        for (i, byte) in mac_address.iter_mut().enumerate() {
            *byte = buf.pread_with(i, BE)?;
        }
        let ip = buf.pread_with::<u32>(6, BE)?;
        Ok(NetworkConfig {
            mac_address,
            ip_address: Ipv4Addr::from(ip),
        })
    }
}

impl RequestPayload for NetworkConfig {
    const OPERATION: Operation = Operation::NetConfig;
}

/// One block of code flash to program.
#[derive(Clone, PartialEq, Eq)]
pub struct Write {
    pub address: u32,
    pub data: [u8; WRITE_PAYLOAD_SIZE],
}

impl Write {
    /// Short blocks are padded with the erased flash value.
    pub fn new(address: u32, data: &[u8]) -> Result<Self> {
        if data.len() > WRITE_PAYLOAD_SIZE {
            return Err(Violation::SizeLimit {
                size: data.len(),
                limit: WRITE_PAYLOAD_SIZE,
            }
            .into());
        }
        let mut block = [0xff; WRITE_PAYLOAD_SIZE];
        block[..data.len()].copy_from_slice(data);
        Ok(Write {
            address,
            data: block,
        })
    }
}

impl fmt::Debug for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Write({:#06x})[{}]", self.address, hex::encode(self.data))
    }
}

impl Payload for Write {
    const SIZE: usize = 4 + WRITE_PAYLOAD_SIZE;

    fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        buf.pwrite_with(self.address, 0, BE)?;
        if buf.len() < Self::SIZE {
            return Err(scroll::Error::TooBig {
                size: Self::SIZE,
                len: buf.len(),
            }
            .into());
        }
        buf[4..Self::SIZE].copy_from_slice(&self.data);
        Ok(())
    }

    fn read_from(buf: &[u8]) -> Result<Self> {
        let address = buf.pread_with(0, BE)?;
        let data = buf
            .get(4..Self::SIZE)
            .ok_or(scroll::Error::TooBig {
                size: Self::SIZE,
                len: buf.len(),
            })?;
        Write::new(address, data)
    }
}

impl RequestPayload for Write {
    const OPERATION: Operation = Operation::Write;
}

/// Same layout as [`Write`], the target erases the sector first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseWrite(pub Write);

impl Payload for EraseWrite {
    const SIZE: usize = Write::SIZE;

    fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        self.0.write_to(buf)
    }

    fn read_from(buf: &[u8]) -> Result<Self> {
        Write::read_from(buf).map(EraseWrite)
    }
}

impl RequestPayload for EraseWrite {
    const OPERATION: Operation = Operation::EraseWrite;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumReply {
    pub checksum: u32,
}

impl Payload for ChecksumReply {
    const SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        buf.pwrite_with(self.checksum, 0, BE)?;
        Ok(())
    }

    fn read_from(buf: &[u8]) -> Result<Self> {
        Ok(ChecksumReply {
            checksum: buf.pread_with(0, BE)?,
        })
    }
}
