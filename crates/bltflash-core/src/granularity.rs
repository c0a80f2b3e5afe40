//! Erase granularity resolution
//!
//! The logical sector table is usually coarser than what the silicon can
//! erase in one go, and devices that share a sector map may still differ in
//! physical page size. The minimum erase unit is therefore either fixed by
//! configuration or probed from a silicon family byte at run time.

use once_cell::unsync::OnceCell;

use crate::device::FlashDriver;

/// Physical page size per silicon family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyPageSizes {
    /// Memory-mapped address of the family identification byte
    pub id_address: u32,
    /// `(family, page size)` pairs
    pub sizes: &'static [(u8, u32)],
    /// Page size for families not listed in `sizes`
    pub fallback: u32,
}

impl FamilyPageSizes {
    /// Page size for the given family byte
    pub fn page_size(&self, family: u8) -> u32 {
        self.sizes
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, size)| *size)
            .unwrap_or(self.fallback)
    }
}

/// EFM32 families: Gecko ('G', 71) and Tiny ('I', 73) use 512 byte pages,
/// Giant ('H', 72) 4 KiB, everything else (Leopard, 'J') 2 KiB.
pub const EFM32_PAGE_SIZES: FamilyPageSizes = FamilyPageSizes {
    id_address: 0x0FE0_81FE,
    sizes: &[(71, 512), (73, 512), (72, 4096)],
    fallback: 2048,
};

/// Where the minimum erase unit comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseGranularity {
    /// Known at build time
    Fixed(u32),
    /// Read from the hardware identification byte
    Probed(FamilyPageSizes),
}

impl EraseGranularity {
    /// Determine the erase unit size in bytes for the running hardware
    pub fn probe<D: FlashDriver + ?Sized>(&self, driver: &D) -> u32 {
        match self {
            Self::Fixed(size) => *size,
            Self::Probed(table) => {
                let family = driver.read_byte(table.id_address);
                let size = table.page_size(family);
                log::debug!("Family byte {} -> erase unit {} bytes", family, size);
                size
            }
        }
    }
}

/// Erase granularity resolved at most once
#[derive(Debug)]
pub struct GranularityResolver {
    source: EraseGranularity,
    resolved: OnceCell<u32>,
}

impl GranularityResolver {
    /// Create a resolver for the given source
    pub fn new(source: EraseGranularity) -> Self {
        Self {
            source,
            resolved: OnceCell::new(),
        }
    }

    /// The configured source
    pub fn source(&self) -> EraseGranularity {
        self.source
    }

    /// Erase unit size in bytes, probing the hardware on first use
    pub fn resolve<D: FlashDriver + ?Sized>(&self, driver: &D) -> u32 {
        *self.resolved.get_or_init(|| self.source.probe(driver))
    }
}
