//! Write block accumulator
//!
//! Flash is programmed one block at a time. A [`WriteBlock`] holds one
//! block's worth of bytes in RAM: it is pre-loaded with the current flash
//! contents when it is opened (so bytes nobody writes keep their value),
//! patched with incoming data, and programmed word by word when flushed.

use crate::device::{FlashDriver, Watchdog};
use crate::error::{Error, Result};

/// Which of the engine's two accumulators a block is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    /// Collects every block except the boot block
    General,
    /// Reserved for the block holding the vector table
    ///
    /// Only programmed when the session is finalized, after the checksum
    /// has been deposited.
    Boot,
}

/// One block of flash buffered in RAM
#[derive(Debug, Clone)]
pub struct WriteBlock<const SIZE: usize> {
    role: BlockRole,
    base: Option<u32>,
    data: [u8; SIZE],
}

impl<const SIZE: usize> WriteBlock<SIZE> {
    /// Create an empty block for the given role
    pub const fn new(role: BlockRole) -> Self {
        Self {
            role,
            base: None,
            data: [0xFF; SIZE],
        }
    }

    /// Round `addr` down to the start of its block
    pub const fn align(addr: u32) -> u32 {
        addr - addr % SIZE as u32
    }

    /// The role of this block
    pub fn role(&self) -> BlockRole {
        self.role
    }

    /// Base address, or `None` if the block holds nothing
    pub fn base(&self) -> Option<u32> {
        self.base
    }

    /// Check if the block holds data for some address
    pub fn is_active(&self) -> bool {
        self.base.is_some()
    }

    /// Buffered contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Drop the buffered contents without programming them
    pub fn clear(&mut self) {
        self.base = None;
    }

    /// Open the block at `addr`, loading the current flash contents
    ///
    /// Re-opening the block the buffer already holds is a no-op and keeps
    /// the buffered bytes.
    ///
    /// # Errors
    /// * `MisalignedBlock` - If `addr` is not a multiple of the block size
    pub fn init<D: FlashDriver + ?Sized>(&mut self, driver: &D, addr: u32) -> Result<()> {
        if self.base == Some(addr) {
            return Ok(());
        }
        if addr % SIZE as u32 != 0 {
            return Err(Error::MisalignedBlock { addr });
        }

        driver.read(addr, &mut self.data);
        self.base = Some(addr);
        log::trace!("{:?} block opened at 0x{:08X}", self.role, addr);
        Ok(())
    }

    /// Patch one byte at `offset` from the block base
    ///
    /// # Errors
    /// * `AddressOutOfRange` - If the block is not open or `offset` is
    ///   past its end
    pub fn store(&mut self, offset: usize, byte: u8) -> Result<()> {
        let base = self.base.ok_or(Error::AddressOutOfRange { addr: 0 })?;
        let slot = self.data.get_mut(offset).ok_or(Error::AddressOutOfRange {
            addr: base.wrapping_add(offset as u32),
        })?;
        *slot = byte;
        Ok(())
    }

    /// Program the buffered block to flash and close it
    ///
    /// Every word is read back right after programming. The first failing
    /// word aborts the flush; words programmed before it stay programmed.
    /// Flushing a block that is not open does nothing.
    ///
    /// # Errors
    /// * `DeviceWriteFailure` - If the driver rejects a program operation
    /// * `VerifyMismatch` - If a word reads back differently
    pub fn flush<D, W>(&mut self, driver: &mut D, watchdog: &mut W) -> Result<()>
    where
        D: FlashDriver + ?Sized,
        W: Watchdog + ?Sized,
    {
        let Some(base) = self.base else {
            return Ok(());
        };

        log::debug!("Programming {:?} block at 0x{:08X}", self.role, base);

        for (i, chunk) in self.data.chunks_exact(4).enumerate() {
            watchdog.service();

            let addr = base + (i * 4) as u32;
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);

            if let Err(e) = driver.program_word(addr, word) {
                log::error!("Program failed at 0x{:08X}: {:?}", addr, e);
                return Err(Error::DeviceWriteFailure { addr });
            }

            let found = driver.read_word(addr);
            if found != word {
                log::error!(
                    "Verify failed at 0x{:08X}: wrote 0x{:08X}, read 0x{:08X}",
                    addr,
                    word,
                    found
                );
                return Err(Error::VerifyMismatch {
                    addr,
                    expected: word,
                    found,
                });
            }
        }

        self.base = None;
        Ok(())
    }
}
