//! Flash sector layout
//!
//! This module describes the writable part of program flash as an ordered
//! table of sectors. The bootloader's own sector is never part of a layout,
//! so every address query that comes back empty means "not ours to touch".
//!
//! # Lookups
//!
//! Layouts are small and bounded at compile time, so all lookups are linear
//! scans:
//!
//! ```ignore
//! let layout = FlashLayout::efm32(128)?;
//! assert_eq!(layout.sector_of(0x2000), Some(1));
//! assert_eq!(layout.sector_of(0x0000), None); // bootloader
//! ```

mod types;

pub use types::*;
