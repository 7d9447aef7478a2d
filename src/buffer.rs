//! Transmit and receive frame buffers.
use std::fmt;
use std::net::SocketAddrV4;

use crate::constants::TX_BUFFER_SIZE;
use crate::error::{ProtocolFault, Result};
use crate::protocol::{Operation, Payload, ReplyHeader, RequestHeader, RequestPayload};

/// Staging area for the next request.
///
/// The sequence number lives in the header and is bumped every time the
/// frame is taken for sending, so each datagram on the wire is unique.
pub struct TransmitBuffer {
    header: RequestHeader,
    size: usize,
    buffer: [u8; TX_BUFFER_SIZE],
}

impl TransmitBuffer {
    pub fn new() -> Self {
        TransmitBuffer {
            header: RequestHeader::new(Operation::Discover),
            size: RequestHeader::SIZE,
            buffer: [0; TX_BUFFER_SIZE],
        }
    }

    /// Select an operation without payload.
    pub fn select_operation(&mut self, operation: Operation, address: u32, length: u16) {
        self.header.operation = operation;
        self.header.address = address;
        self.header.length = length;
        self.size = RequestHeader::SIZE;
    }

    /// Reserve room for `T` after the header and return it for filling in.
    pub fn prepare_payload<T: RequestPayload>(&mut self) -> &mut [u8] {
        const {
            assert!(RequestHeader::SIZE + T::SIZE <= TX_BUFFER_SIZE, "Tx buffer too small");
        }
        self.header.operation = T::OPERATION;
        self.header.address = 0;
        self.header.length = 0;
        self.size = RequestHeader::SIZE + T::SIZE;
        &mut self.buffer[RequestHeader::SIZE..self.size]
    }

    /// Prepare and encode `payload` in one go.
    pub fn stage<T: RequestPayload>(&mut self, payload: &T) -> Result<()> {
        payload.write_to(self.prepare_payload::<T>())
    }

    pub fn operation(&self) -> Operation {
        self.header.operation
    }

    /// Sequence number of the last frame handed out by [`Self::frame`].
    pub fn sequence(&self) -> u8 {
        self.header.sequence
    }

    /// Bytes of the prepared frame, with a fresh sequence number.
    pub fn frame(&mut self) -> Result<&[u8]> {
        self.header.sequence = self.header.sequence.wrapping_add(1);
        self.header.write_to(&mut self.buffer[..RequestHeader::SIZE])?;
        Ok(&self.buffer[..self.size])
    }
}

impl Default for TransmitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A single datagram received from the target.
pub struct ReceiveBuffer {
    header: ReplyHeader,
    source: SocketAddrV4,
    buffer: Vec<u8>,
}

impl ReceiveBuffer {
    pub fn new(buffer: Vec<u8>, source: SocketAddrV4) -> Result<Self> {
        if buffer.len() < ReplyHeader::SIZE {
            return Err(ProtocolFault::Truncated { len: buffer.len() }.into());
        }
        let header = ReplyHeader::read_from(&buffer)?;
        Ok(ReceiveBuffer {
            header,
            source,
            buffer,
        })
    }

    pub fn version(&self) -> u8 {
        self.header.version
    }

    pub fn sequence(&self) -> u8 {
        self.header.sequence
    }

    pub fn operation(&self) -> u8 {
        self.header.operation
    }

    pub fn status(&self) -> u8 {
        self.header.status
    }

    /// Address the datagram came from.
    pub fn source(&self) -> SocketAddrV4 {
        self.source
    }

    /// Decode the fixed size payload of a reply to `operation`.
    pub fn payload<T: Payload>(&self, operation: Operation) -> Result<T> {
        if ReplyHeader::SIZE + T::SIZE > self.buffer.len() {
            return Err(ProtocolFault::ShortPayload {
                needed: T::SIZE,
                available: self.buffer.len() - ReplyHeader::SIZE,
            }
            .into());
        }
        self.check_operation(operation)?;
        T::read_from(&self.buffer[ReplyHeader::SIZE..])
    }

    /// Everything after the header of a reply to `operation`.
    pub fn data(&self, operation: Operation) -> Result<&[u8]> {
        self.check_operation(operation)?;
        Ok(&self.buffer[ReplyHeader::SIZE..])
    }

    fn check_operation(&self, operation: Operation) -> Result<()> {
        if self.header.operation != operation as u8 {
            return Err(ProtocolFault::PayloadMismatch {
                expected: operation,
                stored: self.header.operation,
            }
            .into());
        }
        Ok(())
    }
}

impl fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.source, hex::encode(&self.buffer))
    }
}
