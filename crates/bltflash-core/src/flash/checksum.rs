//! Application checksum
//!
//! A committed application is marked valid by a 32-bit word stored right
//! after its vector table: the two's complement of the sum of the first
//! seven exception vectors (initial stack pointer, reset, NMI, hard fault,
//! memory management fault, bus fault and usage fault). Adding the seven
//! vectors and the stored word therefore yields zero for an intact image.
//!
//! Image signing tools must produce the same word, so the helpers here work
//! on plain byte slices as well as on flash.

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::device::FlashDriver;

/// Number of exception vectors covered by the checksum
pub const VECTOR_COUNT: usize = 7;

/// Size of the checksummed part of the vector table in bytes
pub const VECTOR_TABLE_SIZE: usize = VECTOR_COUNT * 4;

/// Size of the stored checksum word in bytes
pub const CHECKSUM_SIZE: usize = 4;

/// The checksummed head of a Cortex-M vector table
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct VectorTable {
    /// Initial main stack pointer
    pub initial_sp: U32<LittleEndian>,
    /// Reset handler
    pub reset: U32<LittleEndian>,
    /// NMI handler
    pub nmi: U32<LittleEndian>,
    /// Hard fault handler
    pub hard_fault: U32<LittleEndian>,
    /// Memory management (MPU) fault handler
    pub mem_manage: U32<LittleEndian>,
    /// Bus fault handler
    pub bus_fault: U32<LittleEndian>,
    /// Usage fault handler
    pub usage_fault: U32<LittleEndian>,
}

impl VectorTable {
    /// Parse the vector table at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes).ok().map(|(table, _)| table)
    }

    /// Read the vector table from flash at `base`
    pub fn read<D: FlashDriver + ?Sized>(driver: &D, base: u32) -> Self {
        let mut raw = [0u8; VECTOR_TABLE_SIZE];
        driver.read(base, &mut raw);
        zerocopy::transmute!(raw)
    }

    /// The vectors as native words, in table order
    pub fn words(&self) -> [u32; VECTOR_COUNT] {
        [
            self.initial_sp.get(),
            self.reset.get(),
            self.nmi.get(),
            self.hard_fault.get(),
            self.mem_manage.get(),
            self.bus_fault.get(),
            self.usage_fault.get(),
        ]
    }

    /// Wrapping sum of all vectors
    pub fn sum(&self) -> u32 {
        self.words().iter().fold(0u32, |acc, w| acc.wrapping_add(*w))
    }

    /// Checksum word that makes the table sum to zero
    pub fn signature(&self) -> u32 {
        self.sum().wrapping_neg()
    }
}

/// Checksum word for an image whose first byte is the vector table
///
/// Returns `None` if the image is shorter than the vector table.
pub fn signature(image: &[u8]) -> Option<u32> {
    VectorTable::parse(image).map(|table| table.signature())
}

/// Write the checksum word into `image` at `offset`
///
/// Returns the stamped word, or `None` if the image is too short.
pub fn stamp(image: &mut [u8], offset: u32) -> Option<u32> {
    let sig = signature(image)?;
    let offset = offset as usize;
    let slot = image.get_mut(offset..offset.checked_add(CHECKSUM_SIZE)?)?;
    slot.copy_from_slice(&sig.to_le_bytes());
    Some(sig)
}

/// Check the stored checksum of an image
pub fn is_valid(image: &[u8], offset: u32) -> bool {
    let Some(table) = VectorTable::parse(image) else {
        return false;
    };
    let offset = offset as usize;
    let Some(stored) = offset
        .checked_add(CHECKSUM_SIZE)
        .and_then(|end| image.get(offset..end))
    else {
        return false;
    };
    let mut word = [0u8; CHECKSUM_SIZE];
    word.copy_from_slice(stored);
    table.sum().wrapping_add(u32::from_le_bytes(word)) == 0
}

/// Check the checksum of the application committed to flash at `base`
///
/// Only reads flash; safe to call at any time, including outside a
/// programming session.
pub fn verify<D: FlashDriver + ?Sized>(driver: &D, base: u32, offset: u32) -> bool {
    let table = VectorTable::read(driver, base);
    let stored = driver.read_word(base.wrapping_add(offset));
    table.sum().wrapping_add(stored) == 0
}
