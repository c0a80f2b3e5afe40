//! CLI command implementations
//!
//! - `layout` prints a target description
//! - `checksum` computes and checks application checksums of image files
//! - `simulate` runs a full programming session against emulated flash

pub mod checksum;
pub mod layout;
pub mod simulate;

/// Format a byte count for display
pub fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
