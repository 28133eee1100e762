//! CLI definitions for trickle-mesh.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "trickle-mesh",
    version,
    about = "Trickle multicast mesh simulator\n\nFlood a virtual low-power mesh with multicast datagrams and measure delivery, suppression, and control-traffic overhead tick by tick.",
    long_about = None
)]
pub struct Cli {
    /// Path to mesh.toml config file
    #[clap(long, short, default_value = "mesh.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the mesh simulation and output a structured report
    Run {
        /// Override the configured number of simulated ticks
        #[clap(long)]
        ticks: Option<u64>,

        /// Override the configured PRNG seed
        #[clap(long)]
        seed: Option<u64>,

        /// Write JSON report to this file (default: stdout)
        #[clap(long)]
        output: Option<PathBuf>,

        /// Write every simulated datagram to this pcap file
        #[clap(long)]
        capture: Option<PathBuf>,
    },

    /// Hex-decode a datagram and pretty-print its trickle headers
    Decode {
        /// Datagram bytes in hex (whitespace and 0x prefixes ignored)
        hex: String,

        /// Seed-id mode the datagram was built for
        #[clap(long, default_value = "short")]
        mode: String,
    },

    /// Print an example mesh.toml to stdout
    Init,
}
