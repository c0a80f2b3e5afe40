//! Layout command implementation

use bltflash_core::{EraseGranularity, TargetConfig};

/// Print a target description
pub fn cmd_show(target: &TargetConfig) {
    let layout = &target.layout;

    println!("Target Information");
    println!("==================");

    if let Some(name) = &target.name {
        println!("Name:       {}", name);
    }

    println!(
        "Flash:      0x{:08X} - 0x{:08X}, {} bytes ({})",
        layout.start(),
        layout.last(),
        layout.total_size(),
        super::format_size(layout.total_size())
    );

    match target.granularity {
        EraseGranularity::Fixed(size) => {
            println!("Erase unit: {} bytes", size);
        }
        EraseGranularity::Probed(table) => {
            println!(
                "Erase unit: probed from family byte at 0x{:08X} (default {} bytes)",
                table.id_address, table.fallback
            );
            for (family, size) in table.sizes {
                println!("            family {:>3}: {} bytes", family, size);
            }
        }
    }

    println!("Checksum:   offset 0x{:X}", target.checksum_offset);

    println!("\nSectors ({}):", layout.len());
    println!("{:>6} {:>10} {:>10} {:>10}", "Number", "Start", "End", "Size");
    println!("{:-<39}", "");

    for sector in layout.sectors() {
        println!(
            "{:>6} {:#010X} {:#010X} {:>10}",
            sector.number,
            sector.start,
            sector.last(),
            super::format_size(sector.size)
        );
    }
}
