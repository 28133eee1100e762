//! trickle-mesh — Trickle multicast mesh simulator.
//!
//! Drives a virtual mesh of Trickle multicast forwarding engines over lossy
//! links with a virtual clock, reporting delivery ratio and control-traffic
//! overhead. Run `trickle-mesh --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod capture;
mod cli;
mod config;
mod decode;
mod report;
mod sim;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    // Load config (except for commands that don't need one)
    let config = match &cli.command {
        Commands::Init | Commands::Decode { .. } => None,
        Commands::Run { .. } => {
            if cli.config.exists() {
                Some(config::SimConfig::load(&cli.config)?)
            } else {
                eprintln!(
                    "'{}' not found — using built-in defaults (run `trickle-mesh init > mesh.toml` to customise)",
                    cli.config.display()
                );
                Some(config::SimConfig::default_example())
            }
        }
    };

    match cli.command {
        Commands::Init => {
            let example = config::SimConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::Decode { hex, mode } => {
            decode::run(&hex, &mode)?;
        }
        Commands::Run { ticks, seed, output, capture } => {
            let cfg = config.as_ref().expect("config loaded for run");
            let ticks = ticks.unwrap_or(cfg.mesh.ticks);
            let seed = seed.unwrap_or(cfg.mesh.rng_seed);

            let mut cap = match &capture {
                Some(path) => Some(capture::SimCapture::create(path)?),
                None => None,
            };
            let report = sim::run(cfg, ticks, seed, cap.as_mut())?;
            if let Some(path) = &capture {
                eprintln!("Capture written to {}", path.display());
            }

            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    eprintln!("Report written to {}", path.display());
                }
                None => println!("{json}"),
            }
            report.print_summary();
        }
    }

    Ok(())
}
