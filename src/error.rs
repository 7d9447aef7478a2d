//! Error types shared by every layer of the programmer.
//!
//! An [`Error`] is a root cause ([`ErrorKind`]) plus the context each layer
//! added while the error travelled up, outermost last. Rendering joins the
//! context from the outside in and ends with the root cause, so a failed
//! write reads like:
//!
//! ```text
//! Write 64 bytes at address 0x0401 failed. Address 0x0401 isn't aligned to 64 bytes.
//! ```

use std::fmt;

use crate::constants::status;
use crate::protocol::Operation;

/// Alias for `Result<T, netisp::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Local checks that failed before anything was put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("Not connected to a target.")]
    NotConnected,
    #[error("Address {address:#06X} isn't aligned to {alignment} bytes.")]
    UnalignedAddress { address: u32, alignment: u32 },
    #[error("Size {size} isn't a multiple of {alignment} bytes.")]
    UnalignedSize { size: usize, alignment: u32 },
    #[error("Size {size} exceeds the limit of {limit} bytes.")]
    SizeLimit { size: usize, limit: usize },
    #[error("Nothing to write.")]
    EmptyBuffer,
    #[error("{size} bytes at address {address:#06X} don't fit in {flash_size} bytes of flash.")]
    OutOfRange {
        address: u32,
        size: usize,
        flash_size: u32,
    },
}

/// The target sent something that breaks the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolFault {
    #[error("A truncated frame of {len} bytes was received.")]
    Truncated { len: usize },
    #[error("Unsupported protocol version {0}.")]
    UnsupportedVersion(u8),
    #[error("Invalid operation code 0x{received:02X} in response to {expected:?}.")]
    OperationMismatch { expected: Operation, received: u8 },
    #[error("Received unexpected status 0x{status:02X} for {operation:?}.")]
    UnexpectedStatus { operation: Operation, status: u8 },
    #[error("Not enough data in the reply: {needed} bytes needed, {available} available.")]
    ShortPayload { needed: usize, available: usize },
    #[error("The reply carries operation 0x{stored:02X}, not {expected:?}.")]
    PayloadMismatch { expected: Operation, stored: u8 },
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// The target explicitly refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Operation not supported by the target.")]
    InvalidOperation,
    #[error("The target detected an invalid parameter.")]
    InvalidParameter,
    #[error("Invalid operation length.")]
    InvalidLength,
    #[error("Invalid operation address.")]
    InvalidAddress,
    #[error("Forbidden operation address.")]
    ProtectedAddress,
    #[error("Sender isn't permitted to perform this operation.")]
    InvalidSource,
    #[error("The target reported invalid packet size.")]
    InvalidPacketSize,
    #[error("Target reported an invalid status 0x{0:02X}.")]
    InvalidStatus(u8),
}

impl Rejection {
    /// Category of a reply status that is neither `Ok` nor `InProgress`.
    pub fn from_status(code: u8) -> Self {
        match code {
            status::INV_OP => Rejection::InvalidOperation,
            status::INV_PARAM => Rejection::InvalidParameter,
            status::INV_LENGTH => Rejection::InvalidLength,
            status::INV_ADDR => Rejection::InvalidAddress,
            status::PROTECTED_ADDR => Rejection::ProtectedAddress,
            status::INV_SRC => Rejection::InvalidSource,
            status::PKT_SIZE => Rejection::InvalidPacketSize,
            other => Rejection::InvalidStatus(other),
        }
    }

    /// Wire status code, if the rejection corresponds to one.
    pub fn code(&self) -> u8 {
        match self {
            Rejection::InvalidOperation => status::INV_OP,
            Rejection::InvalidParameter => status::INV_PARAM,
            Rejection::InvalidLength => status::INV_LENGTH,
            Rejection::InvalidAddress => status::INV_ADDR,
            Rejection::ProtectedAddress => status::PROTECTED_ADDR,
            Rejection::InvalidSource => status::INV_SRC,
            Rejection::InvalidPacketSize => status::PKT_SIZE,
            Rejection::InvalidStatus(code) => *code,
        }
    }
}

/// Root cause of an [`Error`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error(transparent)]
    Validation(#[from] Violation),

    #[error("Transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolFault),

    #[error(transparent)]
    Device(#[from] Rejection),

    #[error("The target did not respond within the specified time.")]
    Timeout,

    #[error("Operation is not supported.")]
    Unsupported,

    #[error("Unknown device id 0x{0:04X}.")]
    UnknownDevice(u16),

    #[error("Verification failed at address {address:#06X}.")]
    VerifyMismatch { address: u32 },
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    // innermost first
    context: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            context: Vec::new(),
        }
    }

    pub fn timeout() -> Self {
        Error::new(ErrorKind::Timeout)
    }

    pub fn unsupported() -> Self {
        Error::new(ErrorKind::Unsupported)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Context messages from the outermost layer inwards.
    pub fn context(&self) -> impl Iterator<Item = &str> {
        self.context.iter().rev().map(String::as_str)
    }

    /// Prepend a description of what the caller was doing.
    pub fn wrap(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Only a missing reply is worth repeating at a higher level.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self.kind {
            ErrorKind::Device(rejection) => Some(rejection),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for context in self.context() {
            write!(f, "{} ", context)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<Violation> for Error {
    fn from(e: Violation) -> Self {
        Error::new(e.into())
    }
}

impl From<ProtocolFault> for Error {
    fn from(e: ProtocolFault) -> Self {
        Error::new(e.into())
    }
}

impl From<Rejection> for Error {
    fn from(e: Rejection) -> Self {
        Error::new(e.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(e.into())
    }
}

impl From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        ProtocolFault::Malformed(e.to_string()).into()
    }
}

/// Adds context to the error of a [`Result`].
pub trait ResultExt<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.wrap(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_renders_outermost_first() {
        let err = Error::from(Violation::UnalignedAddress {
            address: 0x401,
            alignment: 64,
        })
        .wrap("Write 64 bytes at address 0x0401 failed.")
        .wrap("Flashing failed.");

        assert_eq!(
            err.to_string(),
            "Flashing failed. Write 64 bytes at address 0x0401 failed. \
             Address 0x0401 isn't aligned to 64 bytes."
        );
        assert!(matches!(err.kind(), ErrorKind::Validation(_)));
    }

    #[test]
    fn with_context_keeps_kind() {
        let res: Result<()> = Err(Error::timeout());
        let err = res.with_context(|| "Unable to reset device.").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Unable to reset device. The target did not respond within the specified time."
        );
    }

    #[test]
    fn rejections_have_distinct_messages() {
        let addr = Error::from(Rejection::InvalidAddress);
        let param = Error::from(Rejection::InvalidParameter);
        assert_ne!(addr.to_string(), param.to_string());
        assert_eq!(addr.rejection(), Some(Rejection::InvalidAddress));
        assert!(!addr.is_retryable());
    }

    #[test]
    fn status_codes_map_to_rejections() {
        assert_eq!(Rejection::from_status(status::INV_ADDR), Rejection::InvalidAddress);
        assert_eq!(Rejection::from_status(status::INV_SRC).code(), status::INV_SRC);
        // a request status in a reply is as bad as an unknown code
        assert_eq!(
            Rejection::from_status(status::REQUEST),
            Rejection::InvalidStatus(status::REQUEST)
        );
        assert_eq!(Rejection::from_status(0x42), Rejection::InvalidStatus(0x42));
    }
}
