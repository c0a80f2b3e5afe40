//! bltflash-core - Flash programming engine for resident bootloaders
//!
//! This crate implements the part of a microcontroller bootloader that
//! commits a new application image to on-chip flash. Incoming data arrives
//! in arbitrary-sized, arbitrarily-aligned chunks; the engine coalesces it
//! into whole write blocks, keeps the block holding the vector table back
//! until the very end of the session, and stamps a checksum that the
//! bootloader checks at startup before jumping to the application.
//!
//! It is designed to be `no_std` compatible and does not allocate.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`), the TOML
//!   target description loader and `std::error::Error` impls
//! - `alloc` - Enable heap allocation for helpers
//!
//! # Example
//!
//! ```ignore
//! use bltflash_core::{FlashDriver, FlashEngine, Result, TargetConfig, Watchdog};
//!
//! fn update<D: FlashDriver, W: Watchdog>(driver: D, watchdog: W, image: &[u8]) -> Result<()> {
//!     let target = TargetConfig::efm32(128).map_err(|_| Error::InvalidConfig)?;
//!     let mut engine: FlashEngine<D, W> = FlashEngine::new(target, driver, watchdog)?;
//!     engine.init();
//!     engine.erase(0x2000, image.len() as u32)?;
//!     engine.write(0x2000, image)?;
//!     engine.write_checksum()?;
//!     engine.finalize()
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

mod config;
pub mod device;
pub mod error;
pub mod flash;
pub mod granularity;
pub mod layout;

pub use config::{TargetConfig, DEFAULT_CHECKSUM_OFFSET};
pub use device::{FlashDriver, NoopWatchdog, Watchdog};
pub use error::{Error, Result};
pub use flash::{EngineState, FlashEngine};
pub use granularity::{EraseGranularity, FamilyPageSizes};
pub use layout::{FlashLayout, LayoutError, SectorDescriptor};
