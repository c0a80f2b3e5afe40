//! Application image file handling

use bltflash_core::flash::checksum::{self, CHECKSUM_SIZE, VECTOR_TABLE_SIZE};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors from loading, checking or saving an image
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image is {len} bytes, shorter than the vector table")]
    TooShort { len: usize },

    #[error("vector table offset 0x{start:X} is past the end of the {len} byte file")]
    StartOutOfImage { start: u32, len: usize },

    #[error("checksum offset 0x{offset:X} is outside the {len} byte image")]
    OffsetOutOfImage { offset: u32, len: usize },

    #[error("{len} byte image at 0x{base:08X} does not fit in the writable flash")]
    DoesNotFit { base: u32, len: usize },
}

/// Read a whole image file
pub fn load(path: &Path) -> Result<Vec<u8>, ImageError> {
    let data = fs::read(path).map_err(|source| ImageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

/// Write `data` to a file
pub fn save(path: &Path, data: &[u8]) -> Result<(), ImageError> {
    fs::write(path, data).map_err(|source| ImageError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

/// The part of `file` starting at the vector table
pub fn application(file: &[u8], start: u32) -> Result<&[u8], ImageError> {
    file.get(start as usize..)
        .filter(|app| !app.is_empty())
        .ok_or(ImageError::StartOutOfImage {
            start,
            len: file.len(),
        })
}

/// Check that `image` holds a vector table and a checksum word at `offset`
pub fn check_layout(image: &[u8], offset: u32) -> Result<(), ImageError> {
    let len = image.len();
    if len < VECTOR_TABLE_SIZE {
        return Err(ImageError::TooShort { len });
    }
    let end = (offset as usize).checked_add(CHECKSUM_SIZE);
    if end.map_or(true, |end| end > len) {
        return Err(ImageError::OffsetOutOfImage { offset, len });
    }
    Ok(())
}

/// Checksum word currently stored in `image` at `offset`
pub fn stored_checksum(image: &[u8], offset: u32) -> Result<u32, ImageError> {
    check_layout(image, offset)?;
    let at = offset as usize;
    let mut word = [0u8; CHECKSUM_SIZE];
    word.copy_from_slice(&image[at..at + CHECKSUM_SIZE]);
    Ok(u32::from_le_bytes(word))
}

/// Fill in the checksum word of `image`, returning it
pub fn stamp(image: &mut [u8], offset: u32) -> Result<u32, ImageError> {
    check_layout(image, offset)?;
    checksum::stamp(image, offset).ok_or(ImageError::OffsetOutOfImage {
        offset,
        len: image.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Vec<u8> {
        (0..0x100).map(|i| i as u8).collect()
    }

    #[test]
    fn test_check_layout() {
        assert!(check_layout(&image(), 0xB8).is_ok());
        assert!(matches!(
            check_layout(&image()[..20], 0xB8),
            Err(ImageError::TooShort { len: 20 })
        ));
        assert!(matches!(
            check_layout(&image(), 0xFE),
            Err(ImageError::OffsetOutOfImage { offset: 0xFE, .. })
        ));
    }

    #[test]
    fn test_stamp_makes_image_valid() {
        let mut img = image();
        assert!(!checksum::is_valid(&img, 0xB8));

        let sig = stamp(&mut img, 0xB8).unwrap();
        assert_eq!(stored_checksum(&img, 0xB8).unwrap(), sig);
        assert!(checksum::is_valid(&img, 0xB8));
    }

    #[test]
    fn test_application_offset() {
        let file = image();
        assert_eq!(application(&file, 0x10).unwrap()[0], 0x10);
        assert!(matches!(
            application(&file, 0x100),
            Err(ImageError::StartOutOfImage { start: 0x100, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/bltflash/image.bin")).unwrap_err();
        assert!(matches!(err, ImageError::Read { .. }));
        assert!(err.to_string().starts_with("failed to read /nonexistent/bltflash/image.bin"));
    }
}
