//! Command-line driver for the o3sim simulator.
//!
//! Reads a binary instruction trace, assembles the standard single-core
//! system, runs the warmup and measured phases, and prints the final report.
//! Exit code 0 on success, 2 on deadlock.

use clap::Parser;
use std::fs;
use std::process;

use o3sim_core::config::Config;
use o3sim_core::core::instruction::{TraceRecord, TRACE_RECORD_BYTES};
use o3sim_core::sim::{Harness, TraceSource};

#[derive(Parser, Debug)]
#[command(
    name = "o3sim",
    author,
    version,
    about = "Trace-driven out-of-order CPU simulator",
    long_about = "Run a binary instruction trace through a cycle-level model of an \
out-of-order core with a three-level cache hierarchy, TLBs, a page-table walker, \
and a banked DRAM controller.\n\nExamples:\n  o3sim --trace workload.bin\n  \
o3sim --trace workload.bin -w 10000000 -s 50000000 --config big-llc.json"
)]
struct Cli {
    /// Binary instruction trace to execute.
    #[arg(short, long)]
    trace: String,

    /// Instructions to run before measurement begins.
    #[arg(short, long, default_value_t = 1_000_000)]
    warmup_instructions: u64,

    /// Instructions to measure.
    #[arg(short, long, default_value_t = 10_000_000)]
    simulation_instructions: u64,

    /// JSON configuration file overriding the standard hierarchy.
    #[arg(short, long)]
    config: Option<String>,
}

fn load_config(path: Option<&str>) -> Result<Config, String> {
    match path {
        None => Ok(Config::standard()),
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read config {path}: {e}"))?;
            serde_json::from_str(&text).map_err(|e| format!("cannot parse config {path}: {e}"))
        }
    }
}

fn load_trace(path: &str) -> Result<TraceSource, String> {
    let bytes = fs::read(path).map_err(|e| format!("cannot read trace {path}: {e}"))?;
    if bytes.len() % TRACE_RECORD_BYTES != 0 {
        return Err(format!(
            "trace {path} is not a whole number of {TRACE_RECORD_BYTES}-byte records"
        ));
    }
    let records = (0..bytes.len() / TRACE_RECORD_BYTES).map(move |i| {
        TraceRecord::from_bytes(&bytes[i * TRACE_RECORD_BYTES..(i + 1) * TRACE_RECORD_BYTES])
    });
    Ok(TraceSource::new(Box::new(records)))
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            process::exit(1);
        }
    };

    let mut trace = match load_trace(&cli.trace) {
        Ok(trace) => trace,
        Err(message) => {
            eprintln!("{message}");
            process::exit(1);
        }
    };

    let mut harness = Harness::new(&config, cli.warmup_instructions, cli.simulation_instructions);
    let result = harness.run(&mut trace);

    if result.deadlock {
        eprintln!("simulation deadlocked");
        process::exit(2);
    }

    harness.print_report();
    println!(
        "\nretired: {} cycles: {} IPC: {:.4}",
        result.retired,
        result.cycles,
        result.retired as f64 / result.cycles.max(1) as f64
    );
}
