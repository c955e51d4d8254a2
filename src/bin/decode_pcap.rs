//! Decode every frame of a pcap/pcapng file into a chain and print it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pktset::{Connector, PcapConfig, PcapConnector, ProtocolRegistry};

#[derive(Parser, Debug)]
#[command(name = "decode_pcap", version, about)]
struct Args {
    /// Capture file (pcap or pcapng)
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Extra layout files to load before decoding
    #[arg(short, long = "layouts", value_name = "LAYOUTS")]
    layouts: Vec<PathBuf>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Keep undecodable inner layers as payload instead of skipping the frame
    #[arg(long)]
    lenient: bool,

    /// Increase logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut registry = ProtocolRegistry::builtin().with_lenient(args.lenient);
    for path in &args.layouts {
        let src = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        registry
            .load_layouts(&src)
            .with_context(|| format!("loading {}", path.display()))?;
    }

    let mut conn = PcapConnector::open(&args.file, Arc::new(registry), PcapConfig::default())
        .with_context(|| format!("opening {}", args.file.display()))?;

    let mut decoded = 0usize;
    let mut failed = 0usize;
    let mut index = 0usize;
    while args.limit.map_or(true, |n| index < n) {
        let Some(frame) = conn.read()? else {
            break;
        };
        index += 1;
        match conn.registry().decode_link(conn.link_type(), &frame.data, Some(frame.timestamp)) {
            Ok(chain) => {
                decoded += 1;
                println!("=== frame {} ({} bytes) ===", index, frame.data.len());
                print!("{}", chain);
            }
            Err(e) => {
                failed += 1;
                warn!(frame = index, error = %e, "could not decode frame");
            }
        }
    }
    conn.close()?;

    eprintln!("capture: {}", args.file.display());
    eprintln!("frames:  {}", index);
    eprintln!("decoded: {}", decoded);
    eprintln!("failed:  {}", failed);
    Ok(())
}
