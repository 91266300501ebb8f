//! thaw - Decrypted bundle dumper
//!
//! Host-side tools for dump streams produced by the injected agent:
//! materialize a bundle from a stream, or inspect a Mach-O file's
//! encryption state.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use thaw::macho;
use thaw::transfer::apply_stream;
use thaw::ui::cli::{print_apply, print_inspect};

/// thaw: rebuild decrypted application bundles
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Materialize a decrypted bundle from a dump stream
    Apply {
        /// Stream written by the agent
        stream: PathBuf,

        /// Directory to write the bundle into
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show the slices and encryption state of a Mach-O file
    Inspect {
        binary: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 1. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    log::debug!("{:?}", args.command);

    // 2. Dispatch
    match args.command {
        Command::Apply { stream, output } => {
            let file = File::open(&stream)
                .with_context(|| format!("Failed to open {}", stream.display()))?;
            fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;

            let stats = apply_stream(BufReader::new(file), &output)
                .with_context(|| format!("Failed to apply {}", stream.display()))?;
            print_apply(&stats);

            match stats.code {
                Some(0) => Ok(()),
                Some(code) => bail!("Dump session reported code {}", code),
                None => bail!("Stream {} is incomplete", stream.display()),
            }
        }
        Command::Inspect { binary } => {
            let data = fs::read(&binary)
                .with_context(|| format!("Failed to read {}", binary.display()))?;
            let slices = macho::inspect_bytes(&data)
                .with_context(|| format!("Failed to parse {}", binary.display()))?;
            print_inspect(&binary, &data, &slices);
            Ok(())
        }
    }
}
