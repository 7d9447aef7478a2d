//! Device-agnostic programming interface.
//!
//! [`Programmer`] checks every request against the bound device geometry and
//! the limits of the [`Strategy`] carrying it out, then delegates. Errors
//! coming back are wrapped with a description of the attempted operation.

use crate::device::DeviceDescriptor;
use crate::error::{Error, Result, ResultExt, Violation};

/// Capability limits of a strategy, in bytes per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammerDescriptor {
    pub max_read: usize,
    pub max_write: usize,
}

/// Backend implementing the actual memory operations.
///
/// Optional operations fail with [`ErrorKind::Unsupported`](crate::error::ErrorKind::Unsupported)
/// unless overridden.
pub trait Strategy {
    fn descriptor(&self) -> &ProgrammerDescriptor;

    /// The connected device, if any.
    fn device(&self) -> Option<&DeviceDescriptor>;

    fn read(&mut self, address: u32, size: usize) -> Result<Vec<u8>>;

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Erase one erase block.
    fn erase(&mut self, address: u32) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    fn checksum(&mut self, _address: u32, _size: usize) -> Result<u32> {
        Err(Error::unsupported())
    }

    fn chip_erase(&mut self) -> Result<()> {
        Err(Error::unsupported())
    }

    /// Erase the block at `address` and program it.
    fn erase_write(&mut self, _address: u32, _data: &[u8]) -> Result<()> {
        Err(Error::unsupported())
    }
}

fn check_address(address: u32, alignment: u32) -> Result<()> {
    if alignment != 0 && address % alignment != 0 {
        return Err(Violation::UnalignedAddress { address, alignment }.into());
    }
    Ok(())
}

fn check_size(size: usize, alignment: u32) -> Result<()> {
    if alignment != 0 && size % alignment as usize != 0 {
        return Err(Violation::UnalignedSize { size, alignment }.into());
    }
    Ok(())
}

fn check_not_empty(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Violation::EmptyBuffer.into());
    }
    Ok(())
}

fn check_limit(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(Violation::SizeLimit { size, limit }.into());
    }
    Ok(())
}

pub struct Programmer<S> {
    strategy: S,
}

impl<S: Strategy> Programmer<S> {
    pub fn new(strategy: S) -> Self {
        Programmer { strategy }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    pub fn into_inner(self) -> S {
        self.strategy
    }

    pub fn descriptor(&self) -> &ProgrammerDescriptor {
        self.strategy.descriptor()
    }

    pub fn device(&self) -> Result<&DeviceDescriptor> {
        Ok(self.strategy.device().ok_or(Violation::NotConnected)?)
    }

    /// Read a device's memory
    pub fn read(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        let max_read = self.descriptor().max_read;
        check_limit(size, max_read)
            .and_then(|_| self.strategy.read(address, size))
            .with_context(|| format!("Unable to read {} bytes from address {:#06X}.", size, address))
    }

    /// Write a device's memory
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let max_write = self.descriptor().max_write;
        check_not_empty(data)
            .and_then(|_| self.device())
            .and_then(|device| {
                check_address(address, device.write_size)?;
                check_size(data.len(), device.write_size)
            })
            .and_then(|_| check_limit(data.len(), max_write))
            .and_then(|_| self.strategy.write(address, data))
            .with_context(|| {
                format!("Write {} bytes at address {:#06X} failed.", data.len(), address)
            })
    }

    /// Erase a device's memory
    pub fn erase(&mut self, address: u32) -> Result<()> {
        self.device()
            .and_then(|device| check_address(address, device.erase_size))
            .and_then(|_| self.strategy.erase(address))
            .with_context(|| format!("Erase device memory at address {:#06X} failed.", address))
    }

    /// Erase sector and write it
    pub fn erase_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let max_write = self.descriptor().max_write;
        check_not_empty(data)
            .and_then(|_| self.device())
            .and_then(|device| {
                check_address(address, device.erase_size)?;
                check_size(data.len(), device.write_size)?;
                check_limit(data.len(), device.erase_size as usize)
            })
            .and_then(|_| check_limit(data.len(), max_write))
            .and_then(|_| self.strategy.erase_write(address, data))
            .with_context(|| {
                format!(
                    "Erase and write {} bytes at address {:#06X} failed.",
                    data.len(),
                    address
                )
            })
    }

    /// Erase whole device memory
    pub fn chip_erase(&mut self) -> Result<()> {
        self.strategy
            .chip_erase()
            .with_context(|| "Chip erase failed.")
    }

    pub fn reset(&mut self) -> Result<()> {
        self.strategy
            .reset()
            .with_context(|| "Unable to reset device.")
    }

    /// Calculate a checksum of a device's memory
    pub fn checksum(&mut self, address: u32, size: usize) -> Result<u32> {
        self.strategy.checksum(address, size).with_context(|| {
            format!(
                "Unable to checksum memory region {:#X} - {:#X}.",
                address,
                (address as u64 + size as u64).saturating_sub(1)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Records what reached the backend.
    #[derive(Default)]
    struct Recorder {
        device: Option<DeviceDescriptor>,
        calls: Vec<String>,
    }

    const LIMITS: ProgrammerDescriptor = ProgrammerDescriptor {
        max_read: 256,
        max_write: 4096,
    };

    impl Strategy for Recorder {
        fn descriptor(&self) -> &ProgrammerDescriptor {
            &LIMITS
        }

        fn device(&self) -> Option<&DeviceDescriptor> {
            self.device.as_ref()
        }

        fn read(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
            self.calls.push(format!("read {:#x} {}", address, size));
            Ok(vec![0; size])
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
            self.calls.push(format!("write {:#x} {}", address, data.len()));
            Ok(())
        }

        fn erase(&mut self, address: u32) -> Result<()> {
            self.calls.push(format!("erase {:#x}", address));
            Ok(())
        }

        fn reset(&mut self) -> Result<()> {
            Err(Error::timeout())
        }
    }

    fn connected() -> Programmer<Recorder> {
        Programmer::new(Recorder {
            device: Some(DeviceDescriptor {
                name: "PIC18F97J60".into(),
                family: "PIC18FxxJ60".into(),
                device_id: 0x18c1,
                revision: 1,
                write_size: 64,
                erase_size: 1024,
                flash_size: 128 * 1024,
            }),
            calls: Vec::new(),
        })
    }

    fn is_validation(err: &Error) -> bool {
        matches!(err.kind(), ErrorKind::Validation(_))
    }

    #[test]
    fn unaligned_write_never_reaches_backend() {
        let mut prog = connected();
        let err = prog.write(0x401, &[0; 64]).unwrap_err();
        assert!(is_validation(&err));
        assert_eq!(
            err.to_string(),
            "Write 64 bytes at address 0x0401 failed. Address 0x0401 isn't aligned to 64 bytes."
        );

        assert!(is_validation(&prog.write(0x400, &[0; 65]).unwrap_err()));
        assert!(is_validation(&prog.write(0x400, &[0; 4160]).unwrap_err()));
        assert!(prog.strategy().calls.is_empty());

        prog.write(0x400, &[0; 128]).unwrap();
        assert_eq!(prog.strategy().calls, ["write 0x400 128"]);
    }

    #[test]
    fn read_is_bounded_by_max_read() {
        let mut prog = connected();
        assert!(is_validation(&prog.read(0, 257).unwrap_err()));
        assert_eq!(prog.read(3, 256).unwrap().len(), 256);
        assert_eq!(prog.strategy().calls, ["read 0x3 256"]);
    }

    #[test]
    fn erase_needs_block_alignment() {
        let mut prog = connected();
        assert!(is_validation(&prog.erase(0x200).unwrap_err()));
        prog.erase(0x800).unwrap();
        assert_eq!(prog.strategy().calls, ["erase 0x800"]);
    }

    #[test]
    fn erase_write_is_bounded_by_erase_size() {
        let mut prog = connected();
        // fits max_write but not one erase block
        let err = prog.erase_write(0x400, &[0; 2048]).unwrap_err();
        assert!(is_validation(&err));
        assert!(is_validation(&prog.erase_write(0x440, &[0; 64]).unwrap_err()));
        assert!(prog.strategy().calls.is_empty());
    }

    #[test]
    fn empty_writes_are_rejected() {
        let mut prog = connected();
        for err in [
            prog.write(0x400, &[]).unwrap_err(),
            prog.erase_write(0x400, &[]).unwrap_err(),
        ] {
            assert!(matches!(
                err.kind(),
                ErrorKind::Validation(Violation::EmptyBuffer)
            ));
        }
        assert!(prog.strategy().calls.is_empty());
    }

    #[test]
    fn optional_operations_default_to_unsupported() {
        let mut prog = connected();
        let err = prog.erase_write(0x400, &[0; 1024]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unsupported));
        assert!(err.to_string().starts_with("Erase and write 1024 bytes at address 0x0400 failed."));

        assert!(matches!(prog.chip_erase().unwrap_err().kind(), ErrorKind::Unsupported));
        assert!(matches!(prog.checksum(0, 16).unwrap_err().kind(), ErrorKind::Unsupported));
    }

    #[test]
    fn backend_errors_keep_their_kind() {
        let mut prog = connected();
        let err = prog.reset().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.context().collect::<Vec<_>>(), ["Unable to reset device."]);
    }

    #[test]
    fn geometry_checks_need_a_device() {
        let mut prog = Programmer::new(Recorder::default());
        let err = prog.write(0, &[0; 64]).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(Violation::NotConnected)
        ));
        assert!(prog.strategy().calls.is_empty());
    }
}
