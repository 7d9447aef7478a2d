//! Network bootloader programming protocol implementation.

pub mod buffer;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod network;
pub mod programmer;
pub mod protocol;
pub mod session;
pub mod transport;

pub use self::device::{BootloaderInfo, DeviceDb, DeviceDescriptor};
pub use self::error::{Error, ErrorKind, Result};
pub use self::network::NetworkProgrammer;
pub use self::programmer::{Programmer, ProgrammerDescriptor, Strategy};
pub use self::protocol::{Operation, Status};
pub use self::session::{InProgressPolicy, SessionConfig};
pub use self::transport::{Transport, UdpTransport};
