//! Simulated programming session
//!
//! Runs the same sequence the bootloader goes through during an update
//! (init, erase, chunked writes, checksum, finalize, then the startup
//! checksum check) against emulated flash, and reports what the device saw.

use crate::cli::SimulateArgs;
use crate::image::{self, ImageError};
use bltflash_core::device::NoopWatchdog;
use bltflash_core::flash::verify_application;
use bltflash_core::granularity::EFM32_PAGE_SIZES;
use bltflash_core::{FlashEngine, TargetConfig};
use bltflash_sim::{CountingWatchdog, SimConfig, SimFlash};
use indicatif::{ProgressBar, ProgressStyle};

type SimEngine = FlashEngine<SimFlash, CountingWatchdog>;

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Check that `len` bytes at `base` lie entirely in writable flash
fn check_fits(target: &TargetConfig, base: u32, len: usize) -> Result<(), ImageError> {
    let last = u32::try_from(len)
        .ok()
        .and_then(|len| len.checked_sub(1))
        .and_then(|n| base.checked_add(n));

    match last {
        Some(last) if target.layout.covers(base, last, &mut NoopWatchdog) => Ok(()),
        _ => Err(ImageError::DoesNotFit { base, len }),
    }
}

/// Emulated flash spanning the target layout, widened to whole pages
fn emulated_flash(target: &TargetConfig, family: u8) -> SimFlash {
    let page = u64::from(EFM32_PAGE_SIZES.page_size(family));
    let start = u64::from(target.layout.start());
    let base = start - start % page;
    let end = (u64::from(target.layout.last()) + 1).div_ceil(page) * page;

    SimFlash::new(SimConfig {
        base: base as u32,
        size: (end - base) as usize,
        family,
    })
}

/// Run a full session for the image in `args` and print device statistics
pub fn cmd_simulate(
    args: &SimulateArgs,
    target: TargetConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = image::load(&args.input)?;
    let base = args.base.unwrap_or(target.layout.start());
    check_fits(&target, base, data.len())?;

    if base != target.layout.start() {
        log::warn!(
            "Image does not start at the boot block (0x{:08X}); no checksum will be written",
            target.layout.start()
        );
    }

    let flash = emulated_flash(&target, args.family);
    let mut engine: SimEngine = FlashEngine::new(target, flash, CountingWatchdog::new())?;
    engine.init();

    let len = data.len() as u32;
    println!(
        "Erasing 0x{:08X} - 0x{:08X} ({} byte erase units)",
        base,
        base + len - 1,
        engine.erase_unit_size()
    );
    engine.erase(base, len)?;

    let pb = create_progress_bar_with_phase(data.len() as u64, "Writing")?;
    let chunk = args.chunk as usize;
    for (i, part) in data.chunks(chunk).enumerate() {
        engine.write(base + (i * chunk) as u32, part)?;
        pb.inc(part.len() as u64);
    }
    pb.finish_and_clear();

    engine.write_checksum()?;
    engine.finalize()?;
    println!("Programmed {} bytes at 0x{:08X}", data.len(), base);

    match verify_application(engine.target(), engine.driver()) {
        Ok(()) => println!("Startup check: valid application"),
        Err(e) => println!("Startup check: {}", e),
    }

    print_stats(&engine);

    if let Some(dump) = &args.dump {
        image::save(dump, engine.driver().data())?;
        println!(
            "Saved flash contents from 0x{:08X} to {}",
            engine.driver().config().base,
            dump.display()
        );
    }

    Ok(())
}

fn print_stats(engine: &SimEngine) {
    let flash = engine.driver();
    println!("\nDevice operations:");
    println!(
        "  Pages erased:     {} ({} bytes each)",
        flash.erase_count(),
        flash.config().page_size()
    );
    println!("  Words programmed: {}", flash.program_count());
    println!("  Watchdog kicks:   {}", engine.watchdog().count());
}
