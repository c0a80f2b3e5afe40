//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a family byte, hex or decimal
fn parse_family(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Family byte out of range: {}", value))
}

#[derive(Parser)]
#[command(name = "bltflash")]
#[command(author, version, about = "Bootloader flash programming tools", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target selection shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Target description file (TOML format)
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Flash size in KiB of the built-in EFM32 target (ignored with --target)
    #[arg(long, default_value_t = 128)]
    pub nvm_size_kb: u32,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the writable sectors of a target
    Layout {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Compute the application checksum of an image
    Checksum {
        /// Raw binary image starting with the vector table
        #[arg(short, long)]
        input: PathBuf,

        /// Offset of the checksum word (hex, e.g., 0xB8)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0xB8")]
        offset: u32,

        /// Write a copy of the image with the checksum filled in
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the application checksum of an image or flash dump
    Verify {
        /// Image or flash dump to check
        #[arg(short, long)]
        input: PathBuf,

        /// File offset of the vector table (e.g., 0x2000 for a full dump)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Offset of the checksum word from the vector table
        #[arg(long, value_parser = parse_hex_u32, default_value = "0xB8")]
        offset: u32,
    },

    /// Run a complete programming session against emulated flash
    Simulate(SimulateArgs),
}

/// Options for a simulated programming session
#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Raw binary image to program
    #[arg(short, long)]
    pub input: PathBuf,

    /// Address to program the image at (defaults to the first writable address)
    #[arg(long, value_parser = parse_hex_u32)]
    pub base: Option<u32>,

    /// Bytes handed to each write call, as a transport would deliver them
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u32).range(1..))]
    pub chunk: u32,

    /// Silicon family byte reported by the emulated device (hex or decimal)
    #[arg(long, value_parser = parse_family, default_value = "74")]
    pub family: u8,

    /// Save the emulated flash contents to this file afterwards
    #[arg(long)]
    pub dump: Option<PathBuf>,

    #[command(flatten)]
    pub target: TargetArgs,
}
