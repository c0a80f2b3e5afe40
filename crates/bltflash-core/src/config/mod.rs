//! Target configuration
//!
//! A [`TargetConfig`] bundles everything that differs between hardware
//! variants: the sector layout, where the erase unit size comes from and
//! where the application checksum lives.

#[cfg(feature = "std")]
mod toml;

use crate::error::{Error, Result};
use crate::flash::checksum::{CHECKSUM_SIZE, VECTOR_TABLE_SIZE};
use crate::granularity::{EraseGranularity, EFM32_PAGE_SIZES};
use crate::layout::{FlashLayout, LayoutError};

/// Offset of the checksum word from the start of the vector table
pub const DEFAULT_CHECKSUM_OFFSET: u32 = 0xB8;

/// Description of one hardware variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Optional name for this target
    #[cfg(feature = "alloc")]
    pub name: Option<alloc::string::String>,
    /// Writable sectors
    pub layout: FlashLayout,
    /// Source of the minimum erase unit size
    pub granularity: EraseGranularity,
    /// Offset of the checksum word from the boot sector start
    pub checksum_offset: u32,
}

impl TargetConfig {
    /// Create a target with the default checksum offset
    pub fn new(layout: FlashLayout, granularity: EraseGranularity) -> Self {
        Self {
            #[cfg(feature = "alloc")]
            name: None,
            layout,
            granularity,
            checksum_offset: DEFAULT_CHECKSUM_OFFSET,
        }
    }

    /// Override the checksum offset
    pub fn with_checksum_offset(mut self, offset: u32) -> Self {
        self.checksum_offset = offset;
        self
    }

    /// Reference EFM32 target with `nvm_size_kb` KiB of flash
    ///
    /// The erase unit is probed from the family byte.
    pub fn efm32(nvm_size_kb: u32) -> core::result::Result<Self, LayoutError> {
        Ok(Self::new(
            FlashLayout::efm32(nvm_size_kb)?,
            EraseGranularity::Probed(EFM32_PAGE_SIZES),
        ))
    }

    /// Check that this target can be driven with `block_size` byte write blocks
    ///
    /// The boot sector must start on a block boundary, and the checksum word
    /// must be word aligned, follow the vector table and fall inside the
    /// first block so it is deposited in the buffered boot block.
    pub fn validate(&self, block_size: usize) -> Result<()> {
        let block_size = u32::try_from(block_size).map_err(|_| Error::InvalidConfig)?;
        if block_size == 0 || block_size % 4 != 0 {
            return Err(Error::InvalidConfig);
        }
        if self.layout.start() % block_size != 0 {
            return Err(Error::InvalidConfig);
        }

        let offset = self.checksum_offset;
        if offset % 4 != 0
            || offset < VECTOR_TABLE_SIZE as u32
            || offset
                .checked_add(CHECKSUM_SIZE as u32)
                .map_or(true, |end| end > block_size)
        {
            return Err(Error::InvalidConfig);
        }

        if let EraseGranularity::Fixed(0) = self.granularity {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}
