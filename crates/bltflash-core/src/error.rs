//! Error types for bltflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Address/size errors
    /// Address or range falls outside the writable flash layout
    ///
    /// This includes any attempt to touch the bootloader's own sector,
    /// which is never part of the layout.
    AddressOutOfRange {
        /// First offending address
        addr: u32,
    },
    /// Write block base address is not aligned to the block size
    MisalignedBlock {
        /// The misaligned base address
        addr: u32,
    },

    // Device errors
    /// The device rejected a program operation
    DeviceWriteFailure {
        /// Address of the word that failed
        addr: u32,
    },
    /// The device rejected an erase operation
    EraseFailure {
        /// Start address of the erase unit that failed
        addr: u32,
    },
    /// Read-back after programming did not match
    VerifyMismatch {
        /// Address of the mismatching word
        addr: u32,
        /// Word that was programmed
        expected: u32,
        /// Word that was read back
        found: u32,
    },

    // Image errors
    /// The application checksum does not add up
    ChecksumInvalid,

    // Engine errors
    /// Target configuration is not usable with this engine
    InvalidConfig,
    /// The session was already finalized; call `init()` to start a new one
    SessionFinalized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressOutOfRange { addr } => {
                write!(f, "address 0x{:08X} is outside the writable flash", addr)
            }
            Self::MisalignedBlock { addr } => {
                write!(f, "write block base 0x{:08X} is misaligned", addr)
            }
            Self::DeviceWriteFailure { addr } => {
                write!(f, "program operation failed at 0x{:08X}", addr)
            }
            Self::EraseFailure { addr } => write!(f, "erase failed at 0x{:08X}", addr),
            Self::VerifyMismatch {
                addr,
                expected,
                found,
            } => write!(
                f,
                "verify failed at 0x{:08X}: expected 0x{:08X}, found 0x{:08X}",
                addr, expected, found
            ),
            Self::ChecksumInvalid => write!(f, "application checksum invalid"),
            Self::InvalidConfig => write!(f, "invalid target configuration"),
            Self::SessionFinalized => write!(f, "programming session already finalized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
