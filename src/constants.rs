use std::time::Duration;

/// Default UDP port of the bootloader.
pub const PORT: u16 = 666;
pub const PROTOCOL_VERSION: u8 = 1;

/// How long to wait for a reply to a single transmission.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(100);
/// Transmissions of one request before giving up.
pub const ATTEMPTS: u32 = 3;

pub const REQUEST_HEADER_SIZE: usize = 10;
pub const REPLY_HEADER_SIZE: usize = 4;

pub const TX_BUFFER_SIZE: usize = 128;
/// 1500 byte Ethernet MTU minus IPv4 and UDP headers.
pub const MAX_DATAGRAM_SIZE: usize = 1500 - 20 - 8;
pub const MAX_READ_SIZE: usize = MAX_DATAGRAM_SIZE - REPLY_HEADER_SIZE;
/// Data bytes carried by a single write request.
pub const WRITE_PAYLOAD_SIZE: usize = 64;

/// Low bits of a device id holding the silicon revision.
pub const REVISION_MASK: u16 = 0x1f;

pub mod operations {
    pub const DISCOVER: u8 = 0x00;
    pub const NET_CONFIG: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x03;
    pub const ERASE: u8 = 0x04;
    pub const RESET: u8 = 0x05;
    pub const ERASE_WRITE: u8 = 0x06;
    pub const CHIP_ERASE: u8 = 0x07;
    pub const CHECKSUM: u8 = 0x08;
}

pub mod status {
    pub const REQUEST: u8 = 0x00;
    pub const OK: u8 = 0x01;
    pub const IN_PROGRESS: u8 = 0x02;
    pub const INV_OP: u8 = 0x03;
    pub const INV_PARAM: u8 = 0x04;
    pub const INV_LENGTH: u8 = 0x05;
    pub const INV_ADDR: u8 = 0x06;
    pub const PROTECTED_ADDR: u8 = 0x07;
    pub const INV_SRC: u8 = 0x08;
    pub const PKT_SIZE: u8 = 0x09;
}
