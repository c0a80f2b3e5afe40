//! TOML target description parsing
//!
//! Parses target files in TOML format:
//!
//! ```toml
//! [target]
//! name = "efm32-128k"
//! checksum_offset = 0xB8
//! erase_granularity = "efm32"
//!
//! [[sector]]
//! number = 1
//! start = "0x2000"
//! size = "8 KiB"
//! ```
//!
//! `erase_granularity` is either a size in bytes or the name of a family
//! table to probe (`"efm32"`).

use std::fs;
use std::path::Path;
use std::string::String;
use std::vec::Vec;
use std::format;

use super::TargetConfig;
use crate::granularity::{EraseGranularity, EFM32_PAGE_SIZES};
use crate::layout::{FlashLayout, LayoutError, SectorDescriptor};

/// TOML target file structure
#[derive(Debug, serde::Deserialize)]
struct TomlTargetFile {
    target: Option<TomlTargetMeta>,
    sector: Vec<TomlSector>,
}

/// Target metadata
#[derive(Debug, serde::Deserialize)]
struct TomlTargetMeta {
    name: Option<String>,
    checksum_offset: Option<HexOrInt>,
    erase_granularity: Option<HexOrInt>,
}

/// Sector definition in TOML
#[derive(Debug, serde::Deserialize)]
struct TomlSector {
    number: u8,
    start: HexOrInt,
    size: HexOrInt,
}

/// A u32 written as a TOML integer or as a string
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

impl HexOrInt {
    fn number(&self) -> Result<u32, String> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Str(s) => parse_number(s),
        }
    }

    fn size(&self) -> Result<u32, String> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Str(s) => parse_size(s),
        }
    }

    fn granularity(&self) -> Result<EraseGranularity, String> {
        match self {
            Self::Str(s) if s.trim().eq_ignore_ascii_case("efm32") => {
                Ok(EraseGranularity::Probed(EFM32_PAGE_SIZES))
            }
            _ => self.size().map(EraseGranularity::Fixed),
        }
    }
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "8 KiB", "0x2000" or "8192"
fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();

    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let s_lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s_lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix("kb") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix("b") {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: u32 = num_str.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}

impl TargetConfig {
    /// Load a target description from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let content = fs::read_to_string(path).map_err(|_| LayoutError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parse a target description from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, LayoutError> {
        let file: TomlTargetFile = toml::from_str(content).map_err(|e| {
            log::error!("Failed to parse target description: {}", e);
            LayoutError::ParseError
        })?;

        let sectors = file
            .sector
            .iter()
            .map(|s| -> Result<SectorDescriptor, String> {
                Ok(SectorDescriptor::new(
                    s.start.number()?,
                    s.size.size()?,
                    s.number,
                ))
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(|e| {
                log::error!("Invalid sector definition: {}", e);
                LayoutError::ParseError
            })?;

        let mut target = Self::new(FlashLayout::new(&sectors)?, EraseGranularity::Fixed(0));

        if let Some(meta) = file.target {
            target.name = meta.name;
            if let Some(offset) = meta.checksum_offset {
                target.checksum_offset = offset.number().map_err(|_| LayoutError::ParseError)?;
            }
            if let Some(granularity) = meta.erase_granularity {
                target.granularity = granularity
                    .granularity()
                    .map_err(|_| LayoutError::ParseError)?;
            }
        }

        if target.granularity == EraseGranularity::Fixed(0) {
            // Without an explicit unit, erase whole sectors of the smallest size
            let smallest = target.layout.sectors().iter().map(|s| s.size).min();
            target.granularity = EraseGranularity::Fixed(smallest.unwrap_or(0));
        }

        Ok(target)
    }
}
