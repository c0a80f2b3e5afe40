//! bltflash-sim - Emulated microcontroller flash for testing
//!
//! This crate provides a [`FlashDriver`] that emulates the internal flash of
//! an EFM32-style microcontroller in memory. It's useful for testing the
//! engine and for dry runs on the host without real hardware.
//!
//! Besides NOR semantics (erase sets bytes to 0xFF, programming can only
//! clear bits), the emulator keeps a journal of every device operation and
//! can be told to fail a program or erase at a given address, or to corrupt
//! a word right after programming it.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

mod watchdog;

pub use watchdog::CountingWatchdog;

#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use core::fmt;

use bltflash_core::device::FlashDriver;
use bltflash_core::granularity::EFM32_PAGE_SIZES;

/// Configuration for the emulated flash
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Address of the first flash byte
    pub base: u32,
    /// Flash size in bytes
    pub size: usize,
    /// Silicon family byte reported at the family ID address
    pub family: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            base: 0,
            size: 128 * 1024,
            family: 74, // Leopard Gecko, 2 KiB pages
        }
    }
}

impl SimConfig {
    /// Physical page size of the emulated family
    pub fn page_size(&self) -> u32 {
        EFM32_PAGE_SIZES.page_size(self.family)
    }
}

/// One device operation, as recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    /// Flash controller enabled for writing
    Init,
    /// Flash controller disabled
    Deinit,
    /// Page erased
    Erase {
        /// Page start address
        addr: u32,
    },
    /// Word programmed
    Program {
        /// Word address
        addr: u32,
        /// Word value
        word: u32,
    },
}

/// Failure reported by the emulated flash controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Program or erase while the controller is disabled
    NotEnabled,
    /// Address outside the emulated flash
    OutOfBounds {
        /// Offending address
        addr: u32,
    },
    /// Address not aligned to a word (program) or page (erase)
    Misaligned {
        /// Offending address
        addr: u32,
    },
    /// Failure requested through fault injection
    Injected {
        /// Address the fault was set for
        addr: u32,
    },
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnabled => write!(f, "flash controller not enabled"),
            Self::OutOfBounds { addr } => write!(f, "address 0x{:08X} out of bounds", addr),
            Self::Misaligned { addr } => write!(f, "address 0x{:08X} misaligned", addr),
            Self::Injected { addr } => write!(f, "injected fault at 0x{:08X}", addr),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SimError {}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    program: Option<u32>,
    erase: Option<u32>,
    corrupt: Option<u32>,
}

/// Emulated microcontroller flash
#[cfg(feature = "alloc")]
pub struct SimFlash {
    config: SimConfig,
    data: Vec<u8>,
    enabled: bool,
    journal: Vec<SimOp>,
    faults: Faults,
}

#[cfg(feature = "alloc")]
impl SimFlash {
    /// Create an erased flash with the given configuration
    pub fn new(config: SimConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            enabled: false,
            journal: Vec::new(),
            faults: Faults::default(),
        }
    }

    /// Create an erased 128 KiB Leopard Gecko flash
    pub fn new_default() -> Self {
        Self::new(SimConfig::default())
    }

    /// Create a flash pre-filled with `initial_data` from its first byte
    pub fn with_data(config: SimConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Fail the program operation for the word at `addr`
    pub fn fail_program_at(mut self, addr: u32) -> Self {
        self.faults.program = Some(addr);
        self
    }

    /// Fail the erase operation for the page at `addr`
    pub fn fail_erase_at(mut self, addr: u32) -> Self {
        self.faults.erase = Some(addr);
        self
    }

    /// Flip the lowest bit of the word at `addr` right after programming it
    pub fn corrupt_at(mut self, addr: u32) -> Self {
        self.faults.corrupt = Some(addr);
        self
    }

    /// Get a reference to the flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Contents of `len` bytes at absolute address `addr`
    pub fn slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let offset = self.offset(addr, len).ok()?;
        Some(&self.data[offset..offset + len])
    }

    /// Get the configuration
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Check if the controller is enabled for writing
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Every successful device operation, oldest first
    pub fn journal(&self) -> &[SimOp] {
        &self.journal
    }

    /// Forget the recorded operations
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Number of words programmed
    pub fn program_count(&self) -> usize {
        self.journal
            .iter()
            .filter(|op| matches!(op, SimOp::Program { .. }))
            .count()
    }

    /// Number of pages erased
    pub fn erase_count(&self) -> usize {
        self.journal
            .iter()
            .filter(|op| matches!(op, SimOp::Erase { .. }))
            .count()
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, SimError> {
        let offset = addr
            .checked_sub(self.config.base)
            .ok_or(SimError::OutOfBounds { addr })? as usize;
        if offset + len > self.data.len() {
            return Err(SimError::OutOfBounds { addr });
        }
        Ok(offset)
    }
}

#[cfg(feature = "alloc")]
impl FlashDriver for SimFlash {
    type Error = SimError;

    fn init(&mut self) {
        self.enabled = true;
        self.journal.push(SimOp::Init);
    }

    fn deinit(&mut self) {
        self.enabled = false;
        self.journal.push(SimOp::Deinit);
    }

    fn erase_unit(&mut self, addr: u32) -> Result<(), SimError> {
        if !self.enabled {
            return Err(SimError::NotEnabled);
        }
        if self.faults.erase == Some(addr) {
            return Err(SimError::Injected { addr });
        }

        let page_size = self.config.page_size();
        if addr % page_size != 0 {
            return Err(SimError::Misaligned { addr });
        }

        let offset = self.offset(addr, page_size as usize)?;

        // Erase sets all bytes to 0xFF
        self.data[offset..offset + page_size as usize].fill(0xFF);

        log::trace!("sim: erased page 0x{:08X}", addr);
        self.journal.push(SimOp::Erase { addr });
        Ok(())
    }

    fn program_word(&mut self, addr: u32, word: u32) -> Result<(), SimError> {
        if !self.enabled {
            return Err(SimError::NotEnabled);
        }
        if self.faults.program == Some(addr) {
            return Err(SimError::Injected { addr });
        }
        if addr % 4 != 0 {
            return Err(SimError::Misaligned { addr });
        }

        let offset = self.offset(addr, 4)?;

        // Flash programming: can only change 1 -> 0
        for (i, byte) in word.to_le_bytes().iter().enumerate() {
            self.data[offset + i] &= byte;
        }
        if self.faults.corrupt == Some(addr) {
            self.data[offset] ^= 0x01;
        }

        self.journal.push(SimOp::Program { addr, word });
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            let a = addr.wrapping_add(i as u32);
            *byte = if a == EFM32_PAGE_SIZES.id_address {
                self.config.family
            } else {
                match self.offset(a, 1) {
                    Ok(offset) => self.data[offset],
                    // Unmapped memory reads as erased
                    Err(_) => 0xFF,
                }
            };
        }
    }
}
