//! CLI - Colored terminal output for `apply` and `inspect`

use std::path::Path;

use colored::Colorize;

use crate::macho::SliceInfo;
use crate::transfer::ApplyStats;

/// Bytes of the encrypted region shown by `inspect`
const PREVIEW_LEN: usize = 16;

/// Print the slices of a Mach-O file and their encryption state
pub fn print_inspect(path: &Path, data: &[u8], slices: &[SliceInfo]) {
    println!("{} {}", "[*]".cyan(), path.display().to_string().bold());
    println!("{}", "═".repeat(60).cyan());

    for slice in slices {
        println!(
            "  {:<8} offset {:#010x}  size {:#010x}  {}",
            slice.arch_name().green(),
            slice.file_offset,
            slice.size,
            if slice.is_64 { "64-bit" } else { "32-bit" }.dimmed()
        );

        let Some(enc) = &slice.encryption else {
            println!("           {}", "no encryption info".dimmed());
            continue;
        };

        let state = if enc.is_encrypted() {
            format!("cryptid {}", enc.cryptid).red().bold()
        } else {
            "cryptid 0".green().bold()
        };
        println!(
            "           {}  cryptoff {:#x}  cryptsize {:#x}",
            state, enc.cryptoff, enc.cryptsize
        );

        let start = slice.file_offset as usize + enc.cryptoff as usize;
        if let Some(head) = data.get(start..start + PREVIEW_LEN) {
            println!("           {}", hex::encode(head).dimmed());
        }
    }
}

/// Print the result of materializing a stream
pub fn print_apply(stats: &ApplyStats) {
    println!("{} Wrote {}", "[*]".cyan(), stats.output.display().to_string().bold());
    println!(
        "    {} file(s), {} byte(s), {} replaced, {} erased",
        stats.files, stats.bytes, stats.replaced, stats.erased
    );
    match stats.code {
        Some(0) => println!("    {}", "session completed".green()),
        Some(code) => println!("    {} session ended with code {}", "[!]".red(), code),
        None => println!("    {} stream ended without an end record", "[!]".yellow()),
    }
}
