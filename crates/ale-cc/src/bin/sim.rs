// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ALE command-cycle simulator CLI
//!
//! Runs a cycle specification against an in-memory tag population and
//! prints every delivered report as JSON.
//!
//! # Usage
//!
//! ```bash
//! # One cycle of one round
//! ale-cc-sim --spec cycle.toml --population tags.toml
//!
//! # Bind parameters and an EPC cache
//! ale-cc-sim --spec cycle.toml --population tags.toml \
//!     --param lot=LOT-42 --cache epcs=3000AAAA,3000BBBB
//!
//! # Three cycles of two rounds, engine settings from a file
//! ale-cc-sim --config engine.toml --spec cycle.toml --population tags.toml \
//!     --cycles 3 --rounds 2
//! ```

use ale_cc::{
    ChannelSubscriber, CommandCycle, Context, CycleSpec, DeliveryMode, EngineConfig,
    MemoryReader, Population,
};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// ALE command-cycle simulator
#[derive(Parser, Debug)]
#[command(name = "ale-cc-sim")]
#[command(about = "Run ALE command cycles against simulated tags")]
#[command(version)]
struct Args {
    /// Engine configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cycle specification file path
    #[arg(short, long)]
    spec: PathBuf,

    /// Tag population file path
    #[arg(short, long)]
    population: PathBuf,

    /// Cycles to run
    #[arg(long, default_value = "1")]
    cycles: u32,

    /// Inventory rounds per cycle
    #[arg(short, long, default_value = "1")]
    rounds: u32,

    /// Parameter bindings (format: "name=value", can repeat)
    #[arg(long)]
    param: Vec<String>,

    /// EPC caches (format: "name=v1,v2,...", can repeat)
    #[arg(long)]
    cache: Vec<String>,

    /// Random sources to define (can repeat)
    #[arg(long)]
    random: Vec<String>,

    /// Seconds to wait for report delivery
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Print compact JSON
    #[arg(long)]
    compact: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let spec = CycleSpec::from_toml(&std::fs::read_to_string(&args.spec)?)?;
    let population = Population::from_file(&args.population)?;
    let mut reader = MemoryReader::with_population("sim", &population)?;

    let parameters = bindings(&args.param)?;
    let ctx = Context::new();
    for (name, values) in bindings(&args.cache)? {
        ctx.sources.define_cache(name, values.split(',').filter(|v| !v.is_empty()));
    }
    for name in &args.random {
        ctx.sources.define_random(name.clone());
    }

    let mut cycle = CommandCycle::define(spec, &parameters, ctx, &config)?;
    let subscriber = Arc::new(ChannelSubscriber::new("ale-cc-sim", DeliveryMode::Poll));
    cycle.subscribe(subscriber.clone());

    for _ in 0..args.cycles {
        cycle.start();
        for _ in 0..args.rounds {
            cycle.round(&mut reader)?;
        }
        cycle.complete("REQUESTED", "COUNT")?;
    }

    let delivered = subscriber.drain(Duration::from_secs(args.timeout));
    for report in &delivered {
        let json = if args.compact {
            serde_json::to_string(report.as_ref())?
        } else {
            serde_json::to_string_pretty(report.as_ref())?
        };
        println!("{}", json);
    }
    tracing::info!(
        cycles = args.cycles,
        delivered = delivered.len(),
        tags = population.tags.len(),
        "Simulation finished"
    );

    cycle.dispose();
    Ok(())
}

/// Split "name=value" arguments.
fn bindings(args: &[String]) -> Result<HashMap<String, String>, String> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => Err(format!("Invalid binding '{}' (expected name=value)", arg)),
        })
        .collect()
}
