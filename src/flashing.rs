//! Whole image programming on top of the [`Programmer`] operations.
use crate::error::{ErrorKind, Result, ResultExt, Violation};
use crate::programmer::{Programmer, Strategy};

/// Erased flash value, used to pad partial write blocks.
const ERASED: u8 = 0xff;

fn check_range(address: u32, size: usize, flash_size: u32) -> Result<()> {
    if address as u64 + size as u64 > flash_size as u64 {
        return Err(Violation::OutOfRange {
            address,
            size,
            flash_size,
        }
        .into());
    }
    Ok(())
}

impl<S: Strategy> Programmer<S> {
    /// Program `image` at `address`, erasing every touched erase block first.
    ///
    /// `progress` is called with the number of bytes done after each request.
    pub fn flash(&mut self, address: u32, image: &[u8], mut progress: impl FnMut(usize)) -> Result<()> {
        let device = self.device()?;
        let (erase_size, write_size) = (device.erase_size as usize, device.write_size as usize);
        check_range(address, image.len(), device.flash_size)?;
        let max_write = self.descriptor().max_write;

        if erase_size == 0 || address as usize % erase_size != 0 {
            return Err(Violation::UnalignedAddress {
                address,
                alignment: erase_size as u32,
            }
            .into());
        }
        let chunk_size = if write_size == 0 {
            max_write
        } else {
            max_write - max_write % write_size
        };
        if chunk_size == 0 {
            return Err(Violation::SizeLimit {
                size: write_size,
                limit: max_write,
            }
            .into());
        }

        let mut done = 0;
        for (i, block) in image.chunks(erase_size).enumerate() {
            let block_address = address + (i * erase_size) as u32;
            self.erase(block_address)?;

            for (j, chunk) in block.chunks(chunk_size).enumerate() {
                let chunk_address = block_address + (j * chunk_size) as u32;
                let padded;
                let data = if write_size != 0 && chunk.len() % write_size != 0 {
                    let mut v = chunk.to_vec();
                    v.resize(chunk.len().next_multiple_of(write_size), ERASED);
                    padded = v;
                    &padded[..]
                } else {
                    chunk
                };
                self.write(chunk_address, data)?;
                done += chunk.len();
                progress(done);
            }
        }
        log::info!("Programmed {} bytes at 0x{:06X}", image.len(), address);
        Ok(())
    }

    /// Read back the memory at `address` and compare it with `image`.
    pub fn verify(&mut self, address: u32, image: &[u8], mut progress: impl FnMut(usize)) -> Result<()> {
        check_range(address, image.len(), self.device()?.flash_size)?;
        let max_read = self.descriptor().max_read;
        if max_read == 0 {
            return Err(Violation::SizeLimit {
                size: 1,
                limit: 0,
            }
            .into());
        }

        let mut done = 0;
        for (i, expected) in image.chunks(max_read).enumerate() {
            let chunk_address = address + (i * max_read) as u32;
            let actual = self.read(chunk_address, expected.len())?;
            if let Some(offset) = expected.iter().zip(&actual).position(|(a, b)| a != b) {
                let mismatch = chunk_address + offset as u32;
                log::debug!(
                    "expected {:02x}, read {:02x} at 0x{:06X}",
                    expected[offset],
                    actual[offset],
                    mismatch
                );
                return Err(ErrorKind::VerifyMismatch { address: mismatch }.into());
            }
            done += expected.len();
            progress(done);
        }
        log::info!("Verified {} bytes at 0x{:06X}", image.len(), address);
        Ok(())
    }

    /// [`Self::flash`] then [`Self::verify`], with context for the whole image.
    pub fn flash_and_verify(&mut self, address: u32, image: &[u8]) -> Result<()> {
        self.flash(address, image, |_| ())
            .and_then(|_| self.verify(address, image, |_| ()))
            .with_context(|| format!("Programming {} bytes at {:#06X} failed.", image.len(), address))
    }
}
