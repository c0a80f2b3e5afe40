//! Layout types
//!
//! Core types for flash sector layouts that work in no_std environments.

use heapless::Vec;

use crate::device::{NoopWatchdog, Watchdog};

/// Maximum number of sectors a layout can hold
pub const MAX_SECTORS: usize = 32;

/// A configured sector of program flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorDescriptor {
    /// Start address (inclusive)
    pub start: u32,
    /// Size in bytes
    pub size: u32,
    /// Sector number
    pub number: u8,
}

impl SectorDescriptor {
    /// Create a new sector descriptor
    pub const fn new(start: u32, size: u32, number: u8) -> Self {
        Self {
            start,
            size,
            number,
        }
    }

    /// Last address of this sector (inclusive)
    pub const fn last(&self) -> u32 {
        self.start + (self.size - 1)
    }

    /// Check if an address is within this sector
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr - self.start < self.size
    }
}

/// Reference layout of the EFM32 Gecko family
///
/// Sector 0 (0x0000 - 0x1FFF) holds the bootloader and is absent. The table
/// does not follow the physical page size (512 B - 4 KiB); erasing is done
/// in physical pages anyway, see [`crate::granularity`].
#[rustfmt::skip]
const EFM32_SECTORS: [SectorDescriptor; 27] = [
    SectorDescriptor::new(0x0000_2000, 0x2000,  1),
    SectorDescriptor::new(0x0000_4000, 0x2000,  2),
    SectorDescriptor::new(0x0000_6000, 0x2000,  3),
    SectorDescriptor::new(0x0000_8000, 0x2000,  4),
    SectorDescriptor::new(0x0000_A000, 0x2000,  5),
    SectorDescriptor::new(0x0000_C000, 0x2000,  6),
    SectorDescriptor::new(0x0000_E000, 0x2000,  7),
    SectorDescriptor::new(0x0001_0000, 0x2000,  8),
    SectorDescriptor::new(0x0001_2000, 0x2000,  9),
    SectorDescriptor::new(0x0001_4000, 0x2000, 10),
    SectorDescriptor::new(0x0001_6000, 0x2000, 11),
    SectorDescriptor::new(0x0001_8000, 0x2000, 12),
    SectorDescriptor::new(0x0001_A000, 0x2000, 13),
    SectorDescriptor::new(0x0001_C000, 0x2000, 14),
    SectorDescriptor::new(0x0001_E000, 0x2000, 15),
    SectorDescriptor::new(0x0002_0000, 0x8000, 16),
    SectorDescriptor::new(0x0002_8000, 0x8000, 17),
    SectorDescriptor::new(0x0003_0000, 0x8000, 18),
    SectorDescriptor::new(0x0003_8000, 0x8000, 19),
    SectorDescriptor::new(0x0004_0000, 0x8000, 20),
    SectorDescriptor::new(0x0004_8000, 0x8000, 21),
    SectorDescriptor::new(0x0005_0000, 0x8000, 22),
    SectorDescriptor::new(0x0005_8000, 0x8000, 23),
    SectorDescriptor::new(0x0006_0000, 0x8000, 24),
    SectorDescriptor::new(0x0006_8000, 0x8000, 25),
    SectorDescriptor::new(0x0007_0000, 0x8000, 26),
    SectorDescriptor::new(0x0007_8000, 0x8000, 27),
];

/// Ordered table of the writable flash sectors of one hardware variant
///
/// Sectors are sorted by start address and never overlap. Gaps are allowed
/// (a gap is flash that the bootloader must not touch). A layout always has
/// at least one sector; the first one holds the application's vector table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    sectors: Vec<SectorDescriptor, MAX_SECTORS>,
}

impl FlashLayout {
    /// Create a layout from a sector table, validating it
    pub fn new(sectors: &[SectorDescriptor]) -> Result<Self, LayoutError> {
        if sectors.is_empty() {
            return Err(LayoutError::Empty);
        }

        let table = Vec::from_slice(sectors).map_err(|_| LayoutError::TooManySectors)?;

        for sector in &table {
            if sector.size == 0 || sector.start.checked_add(sector.size - 1).is_none() {
                return Err(LayoutError::InvalidSector {
                    number: sector.number,
                });
            }
        }

        for pair in table.windows(2) {
            if pair[1].start < pair[0].start {
                return Err(LayoutError::Unsorted);
            }
            if pair[1].start <= pair[0].last() {
                return Err(LayoutError::Overlapping);
            }
        }

        for (i, s1) in table.iter().enumerate() {
            if table.iter().skip(i + 1).any(|s2| s2.number == s1.number) {
                return Err(LayoutError::DuplicateSectorNumber { number: s1.number });
            }
        }

        Ok(Self { sectors: table })
    }

    /// Reference EFM32 layout for a device with `nvm_size_kb` KiB of flash
    ///
    /// Sectors are added in steps of 32, 64, 128, 256 and 512 KiB. Devices
    /// larger than 512 KiB are not supported.
    pub fn efm32(nvm_size_kb: u32) -> Result<Self, LayoutError> {
        let end = match nvm_size_kb {
            0..=32 => 0x0000_8000,
            33..=64 => 0x0001_0000,
            65..=128 => 0x0002_0000,
            129..=256 => 0x0004_0000,
            257..=512 => 0x0008_0000,
            _ => return Err(LayoutError::UnsupportedNvmSize { kb: nvm_size_kb }),
        };

        let count = EFM32_SECTORS.iter().take_while(|s| s.start < end).count();
        Self::new(&EFM32_SECTORS[..count])
    }

    /// All sectors, sorted by start address
    pub fn sectors(&self) -> &[SectorDescriptor] {
        &self.sectors
    }

    /// The first sector, which holds the application's vector table
    pub fn boot_sector(&self) -> &SectorDescriptor {
        // new() rejects empty tables
        &self.sectors[0]
    }

    /// First writable address
    pub fn start(&self) -> u32 {
        self.boot_sector().start
    }

    /// Last writable address (inclusive)
    pub fn last(&self) -> u32 {
        self.sectors[self.sectors.len() - 1].last()
    }

    /// Sum of all sector sizes in bytes
    pub fn total_size(&self) -> u32 {
        self.sectors.iter().map(|s| s.size).sum()
    }

    /// Number of sectors
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// Always false; a layout has at least one sector
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Iterate over the sectors, servicing the watchdog before each one
    pub fn scan<'a, W: Watchdog>(
        &'a self,
        watchdog: &'a mut W,
    ) -> impl Iterator<Item = &'a SectorDescriptor> + 'a {
        self.sectors.iter().inspect(move |_| watchdog.service())
    }

    /// Find the sector containing `addr`
    pub fn locate<W: Watchdog>(&self, addr: u32, watchdog: &mut W) -> Option<SectorDescriptor> {
        self.scan(watchdog).find(|s| s.contains(addr)).copied()
    }

    /// Find a sector by number
    pub fn sector<W: Watchdog>(&self, number: u8, watchdog: &mut W) -> Option<SectorDescriptor> {
        self.scan(watchdog).find(|s| s.number == number).copied()
    }

    /// Sector number containing `addr`, or `None` outside the layout
    pub fn sector_of(&self, addr: u32) -> Option<u8> {
        self.locate(addr, &mut NoopWatchdog).map(|s| s.number)
    }

    /// Start address of sector `number`
    pub fn base_address_of(&self, number: u8) -> Option<u32> {
        self.sector(number, &mut NoopWatchdog).map(|s| s.start)
    }

    /// Size of sector `number`, or 0 if it is not in the layout
    pub fn size_of(&self, number: u8) -> u32 {
        self.sector(number, &mut NoopWatchdog)
            .map(|s| s.size)
            .unwrap_or(0)
    }

    /// Check that every address of `first..=last` lies inside some sector
    ///
    /// Unlike checking both ends, this also rejects ranges that span a gap.
    pub fn covers<W: Watchdog>(&self, first: u32, last: u32, watchdog: &mut W) -> bool {
        if last < first {
            return false;
        }

        let mut sectors = self.scan(watchdog).skip_while(|s| !s.contains(first));
        let Some(mut current) = sectors.next() else {
            return false;
        };

        while current.last() < last {
            match sectors.next() {
                Some(next) if next.start == current.last() + 1 => current = next,
                _ => return false,
            }
        }
        true
    }
}

/// Errors that can occur when building a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Layout has no sectors
    Empty,
    /// Layout has more than [`MAX_SECTORS`] sectors
    TooManySectors,
    /// Sector has zero size or wraps the address space
    InvalidSector {
        /// Offending sector number
        number: u8,
    },
    /// Sectors are not sorted by start address
    Unsorted,
    /// Two sectors overlap
    Overlapping,
    /// Two sectors have the same number
    DuplicateSectorNumber {
        /// Duplicated sector number
        number: u8,
    },
    /// Reference layout does not cover this flash size
    UnsupportedNvmSize {
        /// Requested size in KiB
        kb: u32,
    },
    /// Failed to parse a target description
    ParseError,
    /// I/O error
    IoError,
}

#[cfg(feature = "std")]
impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "layout has no sectors"),
            Self::TooManySectors => write!(f, "layout has more than {} sectors", MAX_SECTORS),
            Self::InvalidSector { number } => write!(f, "sector {} has invalid bounds", number),
            Self::Unsorted => write!(f, "sectors are not sorted by address"),
            Self::Overlapping => write!(f, "overlapping sectors"),
            Self::DuplicateSectorNumber { number } => {
                write!(f, "sector number {} used more than once", number)
            }
            Self::UnsupportedNvmSize { kb } => {
                write!(f, "flash size of {} KiB is not supported", kb)
            }
            Self::ParseError => write!(f, "failed to parse target description"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LayoutError {}
