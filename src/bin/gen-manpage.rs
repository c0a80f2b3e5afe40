//! Man page generator for bltflash
//!
//! Writes `bltflash.1` plus one `bltflash-<command>.1` page per subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: clap::Command, dir: &Path, file_name: &str) -> std::io::Result<PathBuf> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;

    let path = dir.join(file_name);
    fs::write(&path, buffer)?;
    Ok(path)
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let main_page = render(cmd.clone(), &output_dir, "bltflash.1")?;
    println!("Man page generated at: {}", main_page.display());

    for sub in cmd.get_subcommands() {
        let file_name = format!("bltflash-{}.1", sub.get_name());
        let page = render(sub.clone(), &output_dir, &file_name)?;
        println!("Man page generated at: {}", page.display());
    }

    println!("\nTo view the man page:");
    println!("  man -l {}", main_page.display());

    Ok(())
}
