//! Check layout files: report each layout's fields and width, or the error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pktset::ProtocolRegistry;

#[derive(Parser, Debug)]
#[command(name = "check_layouts", version, about)]
struct Args {
    /// Layout files, loaded in order into one registry
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

fn check(registry: &mut ProtocolRegistry, path: &PathBuf) -> Result<()> {
    let src = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let installed = registry.load_layouts(&src)?;
    println!("{}: {} layout(s)", path.display(), installed.len());
    for p in installed {
        let layout = p.layout();
        println!("  {} ({} bits)", p.describe(), layout.bit_len());
        for f in layout.fields() {
            let mut notes = Vec::new();
            if f.is_discriminator() {
                notes.push("discriminator".to_string());
            }
            if f.comparator().is_wildcard() {
                notes.push("wildcard".to_string());
            }
            if let Some(d) = f.default_value() {
                notes.push(format!("default {}", d));
            }
            println!("    {:<16} {:>4} {}", f.name(), f.width(), notes.join(", "));
        }
        for (value, next) in p.entries() {
            println!("    {:#x} => {}", value, next);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let mut registry = ProtocolRegistry::builtin();
    let mut failed = false;
    for path in &args.files {
        if let Err(e) = check(&mut registry, path) {
            eprintln!("{}: {:#}", path.display(), e);
            failed = true;
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
