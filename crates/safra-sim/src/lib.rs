//! safra-sim: diffusing shortest paths with token-based termination detection
//!
//! Every node of a fixed, weighted, undirected topology runs as its own tokio
//! task and talks to its neighbors only through bounded mailboxes. The root
//! starts a Chandy–Misra style relaxation: a node that learns a shorter
//! distance tells every other neighbor. A token circulating depth-first from
//! the root sums the nodes' sent-minus-received counters and carries a taint
//! bit; once a round comes back with a zero sum and no taint, a final round
//! halts every node.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use safra_sim::{run, NodeId, Topology};
//!
//! let topology = Topology::builder()
//!     .nodes(["P", "Q", "R"])
//!     .edge("P", "Q", 2.0)
//!     .edge("Q", "R", 1.0)
//!     .root("P")
//!     .build()?;
//!
//! let distances = run(topology)?;
//! assert_eq!(distances[&NodeId::from("R")], 3.0);
//! # Ok::<(), safra_sim::SimError>(())
//! ```
//!
//! Use [`Simulation`] from async code to get the full [`Report`] with
//! predecessors, round summaries and the ordered trace.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod message;
pub mod runtime;
pub mod topology;
pub mod trace;

mod diffusion;
mod node;
mod termination;

use std::collections::BTreeMap;

pub use aggregator::{NodeReport, Report, RoundSummary};
pub use config::SimConfig;
pub use error::{SimError, SimResult, TopologyError};
pub use message::{DistanceUpdate, Token};
pub use runtime::Simulation;
pub use topology::{Link, NodeEntry, NodeId, NeighborSpec, NodeSpec, Topology, TopologyBuilder, TopologySpec};
pub use trace::{TraceEvent, TraceKind};

/// Compute shortest distances from the root on a fresh multi-thread runtime
///
/// Blocks until every node has halted. Must not be called from inside a tokio
/// runtime; use [`Simulation::run`] there.
pub fn run(topology: Topology) -> SimResult<BTreeMap<NodeId, f64>> {
    run_with_config(topology, SimConfig::default()).map(|report| report.distances)
}

/// Blocking run returning the full report
pub fn run_with_config(topology: Topology, config: SimConfig) -> SimResult<Report> {
    config.validate()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .map_err(|e| SimError::Runtime(e.to_string()))?;
    runtime.block_on(Simulation::new(topology).with_config(config).run())
}
