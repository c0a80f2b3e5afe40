//! Checksum command implementations

use crate::image;
use bltflash_core::flash::checksum;
use std::path::Path;

/// Compute the checksum of an image, optionally saving a stamped copy
pub fn cmd_checksum(
    input: &Path,
    offset: u32,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = image::load(input)?;
    let stored = image::stored_checksum(&data, offset)?;
    let signature = image::stamp(&mut data, offset)?;

    println!("Checksum:   0x{:08X}", signature);
    if stored == signature {
        println!("Image already carries this checksum");
    } else {
        println!("Stored:     0x{:08X}", stored);
    }

    if let Some(out) = output {
        image::save(out, &data)?;
        println!("Saved stamped image to {}", out.display());
    }

    Ok(())
}

/// Check the checksum of an image or flash dump
pub fn cmd_verify(input: &Path, start: u32, offset: u32) -> Result<(), Box<dyn std::error::Error>> {
    let data = image::load(input)?;
    let app = image::application(&data, start)?;
    let stored = image::stored_checksum(app, offset)?;

    if checksum::is_valid(app, offset) {
        println!("Checksum 0x{:08X} is valid", stored);
        Ok(())
    } else {
        let expected = checksum::signature(app).unwrap_or_default();
        println!(
            "Checksum mismatch: stored 0x{:08X}, expected 0x{:08X}",
            stored, expected
        );
        Err(bltflash_core::Error::ChecksumInvalid.into())
    }
}
