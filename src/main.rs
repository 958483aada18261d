//! # safra-sssp
//!
//! Runs the diffusing shortest-path computation over a fixed topology, one
//! tokio task per node, and prints the distances once the token-based
//! termination detector has halted every node.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- --trace
//! cargo run -- --topology graph.yaml --repeat 20
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

// =============================================================================
// IMPORTS
// =============================================================================
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use safra_sim::{Report, Simulation, Topology};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "safra-sssp",
    version,
    about = "Shortest paths by message diffusion, halted by token-based termination detection",
    long_about = r#"
Every node of the topology runs as its own task and only talks to its
neighbors. The root starts the diffusion; a token circulating from the root
detects when no message is left in flight and then halts every node.

TOPOLOGY FILES (YAML or JSON):
  nodes:
    - id: P
      root: true
      neighbors: [{ id: Q, weight: 2 }]
    - id: Q
      neighbors: [{ id: P, weight: 2 }]

EXAMPLES:
  # Built-in five-node scenario with the full protocol trace
  safra-sssp --trace

  # Check that repeated runs agree
  safra-sssp --topology graph.yaml --repeat 50
"#
)]
struct Args {
    /// Topology file; the built-in P/Q/R/S/T scenario is used when omitted
    #[arg(short = 't', long = "topology", value_name = "FILE")]
    topology: Option<PathBuf>,

    /// Print the ordered protocol trace
    #[arg(long = "trace", default_value = "false")]
    trace: bool,

    /// Run this many times and require identical distances
    #[arg(short = 'n', long = "repeat", default_value_t = 1, value_name = "N")]
    repeat: usize,

    /// Print the report as JSON instead of a table
    #[arg(long = "json", default_value = "false")]
    json: bool,

    /// Distance mailbox capacity (overrides SAFRA_MAILBOX_CAPACITY)
    #[arg(long = "mailbox-capacity", env = "SAFRA_MAILBOX_CAPACITY")]
    mailbox_capacity: Option<usize>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    init_logging(args.verbose, &config.log_level)?;

    if let Some(capacity) = args.mailbox_capacity {
        config.mailbox_capacity = capacity;
    }
    if args.trace {
        config.record_trace = true;
    }
    if args.repeat == 0 {
        anyhow::bail!("--repeat must be at least 1");
    }
    config.validate()?;

    let topology = match &args.topology {
        Some(path) => Topology::from_path(path)
            .with_context(|| format!("failed to load topology from {}", path.display()))?,
        None => builtin_topology()?,
    };
    info!(
        nodes = topology.len(),
        edges = topology.edge_count(),
        root = %topology.root(),
        "Topology loaded"
    );

    let simulation = Simulation::new(topology).with_config(config.sim_config());

    let mut first: Option<Report> = None;
    for attempt in 1..=args.repeat {
        let report = match simulation.run().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, attempt, "Simulation failed");
                return Err(e.into());
            }
        };

        match &first {
            None => first = Some(report),
            Some(reference) if reference.distances != report.distances => {
                warn!(attempt, "Distances differ from the first run");
                anyhow::bail!(
                    "run {} produced {:?}, first run produced {:?}",
                    attempt,
                    report.distances,
                    reference.distances
                );
            }
            Some(_) => {}
        }
    }

    let report = first.context("no run completed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.trace);
    }
    if args.repeat > 1 {
        println!("{} runs agreed on every distance", args.repeat);
    }

    Ok(())
}

// =============================================================================
// OUTPUT
// =============================================================================
fn print_report(report: &Report, with_trace: bool) {
    if with_trace {
        println!("\n{}", "=".repeat(60));
        println!("TRACE");
        println!("{}\n", "=".repeat(60));
        for event in &report.trace {
            println!("{event}");
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("SHORTEST DISTANCES FROM {}", report.root);
    println!("{}\n", "=".repeat(60));
    println!("{:<12} {:>10}  PATH", "NODE", "DISTANCE");
    for (id, distance) in &report.distances {
        let path = report
            .path_to(id)
            .map(|path| {
                path.iter()
                    .map(|hop| hop.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            })
            .unwrap_or_else(|| "-".to_string());
        println!("{:<12} {:>10}  {}", id.as_str(), distance, path);
    }

    println!("\nROUNDS");
    for round in &report.rounds {
        println!(
            "  round {:>3}: sum={:<4} tainted={:<5} last={}",
            round.round, round.sum, round.tainted, round.last
        );
    }
    println!(
        "\n{} messages, final counters sum to {}",
        report.messages_sent(),
        report.counter_sum()
    );
}

/// The five-node scenario used when no topology file is given
fn builtin_topology() -> Result<Topology> {
    let topology = Topology::builder()
        .nodes(["P", "Q", "R", "S", "T"])
        .edge("P", "Q", 2.0)
        .edge("P", "R", 2.0)
        .edge("Q", "R", 2.0)
        .edge("R", "T", 1.0)
        .edge("R", "S", 1.0)
        .edge("T", "S", 1.0)
        .root("P")
        .build()?;
    Ok(topology)
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Install the global tracing subscriber.
///
/// `--verbose` forces debug output; otherwise `RUST_LOG` (or its default of
/// `info`) decides.
fn init_logging(verbose: bool, log_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
