//! bltflash - Host tooling for the bootloader flash engine
//!
//! Inspects target descriptions, computes and checks application checksums
//! and runs complete programming sessions against emulated flash, using the
//! same engine the bootloader runs on the device.

mod cli;
mod commands;
mod image;

use bltflash_core::TargetConfig;
use clap::Parser;
use cli::{Cli, Commands, TargetArgs};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Layout { target } => {
            let target = load_target(&target)?;
            commands::layout::cmd_show(&target);
            Ok(())
        }
        Commands::Checksum {
            input,
            offset,
            output,
        } => commands::checksum::cmd_checksum(&input, offset, output.as_deref()),
        Commands::Verify {
            input,
            start,
            offset,
        } => commands::checksum::cmd_verify(&input, start, offset),
        Commands::Simulate(args) => {
            let target = load_target(&args.target)?;
            commands::simulate::cmd_simulate(&args, target)
        }
    }
}

/// Load the target description file, or the built-in EFM32 target
fn load_target(args: &TargetArgs) -> Result<TargetConfig, Box<dyn std::error::Error>> {
    match &args.target {
        Some(path) => {
            let target = TargetConfig::from_toml_file(path)?;
            log::debug!(
                "Loaded target {} from {}",
                target.name.as_deref().unwrap_or("(unnamed)"),
                path.display()
            );
            Ok(target)
        }
        None => {
            log::debug!("Using built-in EFM32 target, {} KiB", args.nvm_size_kb);
            Ok(TargetConfig::efm32(args.nvm_size_kb)?)
        }
    }
}
