//! Simulation driver
//!
//! Wires one pair of mailboxes per node, spawns the aggregator and one task
//! per node, then joins them. The first node error aborts every other task.
//! A watchdog turns a hang into [`SimError::Stalled`]: it fires only when a
//! whole window passes without a single protocol step, so a long but busy
//! run is never cut short.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregator::{self, Report};
use crate::config::SimConfig;
use crate::diffusion::Diffusion;
use crate::error::{SimError, SimResult};
use crate::message::{DistanceUpdate, Token};
use crate::node::{NodeContext, Peer};
use crate::termination;
use crate::topology::{NodeId, Topology};
use crate::trace::TraceSink;

/// One configured run over a validated topology
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), safra_sim::SimError> {
/// use safra_sim::{SimConfig, Simulation, Topology};
///
/// let topology = Topology::builder()
///     .nodes(["A", "B"])
///     .edge("A", "B", 3.0)
///     .root("A")
///     .build()?;
/// let report = Simulation::new(topology)
///     .with_config(SimConfig::default().with_trace(false))
///     .run()
///     .await?;
/// assert_eq!(report.distance(&"B".into()), Some(3.0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Simulation {
    topology: Arc<Topology>,
    config: SimConfig,
}

impl Simulation {
    /// Create a simulation with the default configuration
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: Arc::new(topology),
            config: SimConfig::default(),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run to termination and return the assembled report
    pub async fn run(&self) -> SimResult<Report> {
        self.config.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("simulation", run_id = %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: String) -> SimResult<Report> {
        info!(
            nodes = self.topology.len(),
            edges = self.topology.edge_count(),
            root = %self.topology.root(),
            "starting simulation"
        );

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(aggregator::collect(
            Arc::clone(&self.topology),
            run_id,
            feed_rx,
        ));
        let trace = TraceSink::new(feed_tx, self.config.record_trace);

        let (peers, mailboxes) = self.mailboxes();
        let peers: Arc<[Peer]> = peers.into();

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(self.topology.len());
        for (index, (distances, tokens)) in mailboxes.into_iter().enumerate() {
            let ctx = Arc::new(NodeContext::new(
                index,
                Arc::clone(&self.topology),
                Arc::clone(&peers),
                trace.clone(),
            ));
            let span = info_span!("node", id = %ctx.id);
            let id = ctx.id.clone();
            let handle = tasks.spawn(run_node(ctx, distances, tokens).instrument(span));
            pending.insert(handle.id(), id);
        }
        let progress = trace.progress();
        // Node contexts hold the remaining feed senders; the aggregator
        // finishes once they are all dropped.
        drop(trace);
        drop(peers);

        if let Err(e) = join_nodes(&mut tasks, pending, &progress, self.config.stall_timeout).await {
            tasks.abort_all();
            collector.abort();
            return Err(e);
        }

        let report = collector
            .await
            .map_err(|e| SimError::Runtime(format!("aggregator failed: {e}")))??;
        info!(
            rounds = report.rounds.len(),
            messages = report.messages_sent(),
            "simulation finished"
        );
        Ok(report)
    }

    #[allow(clippy::type_complexity)]
    fn mailboxes(&self) -> (Vec<Peer>, Vec<(mpsc::Receiver<DistanceUpdate>, mpsc::Receiver<Token>)>) {
        self.topology
            .nodes()
            .iter()
            .map(|entry| {
                let (distance_tx, distance_rx) = mpsc::channel(self.config.mailbox_capacity);
                let (token_tx, token_rx) = mpsc::channel(self.config.token_capacity);
                let peer = Peer {
                    id: entry.id.clone(),
                    distances: distance_tx,
                    tokens: token_tx,
                };
                (peer, (distance_rx, token_rx))
            })
            .unzip()
    }
}

/// Join every node task, failing on the first error
///
/// A timeout only counts as a stall when the progress counter has not moved
/// since the previous window.
async fn join_nodes(
    tasks: &mut JoinSet<SimResult<()>>,
    mut pending: HashMap<task::Id, NodeId>,
    progress: &AtomicU64,
    window: Duration,
) -> SimResult<()> {
    let mut seen = progress.load(Ordering::SeqCst);
    while !pending.is_empty() {
        let joined = match timeout(window, tasks.join_next_with_id()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(_) => {
                let steps = progress.load(Ordering::SeqCst);
                if steps != seen {
                    seen = steps;
                    continue;
                }
                let mut stuck: Vec<NodeId> = pending.into_values().collect();
                stuck.sort();
                warn!(pending = ?stuck, steps, "simulation stalled");
                return Err(SimError::Stalled {
                    timeout: window,
                    pending: stuck,
                });
            }
        };

        match joined {
            Ok((task, Ok(()))) => {
                pending.remove(&task);
            }
            Ok((task, Err(e))) => {
                error!(node = ?pending.get(&task), error = %e, "node failed");
                return Err(e);
            }
            Err(e) => {
                return Err(SimError::Runtime(match pending.get(&e.id()) {
                    Some(node) => format!("task for node {node} failed: {e}"),
                    None => format!("node task failed: {e}"),
                }));
            }
        }
    }
    Ok(())
}

/// Body of one node task: root broadcast, then both loops side by side
async fn run_node(
    ctx: Arc<NodeContext>,
    distances: mpsc::Receiver<DistanceUpdate>,
    tokens: mpsc::Receiver<Token>,
) -> SimResult<()> {
    let mut diffusion = Diffusion::new(&ctx, distances);
    if ctx.is_root() {
        diffusion.broadcast().await?;
    }
    tokio::try_join!(diffusion.run(), termination::token_loop(&ctx, tokens))?;
    ctx.trace.completed(ctx.report().await);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Topology {
        Topology::builder()
            .nodes(["A", "B", "C", "D"])
            .edge("A", "B", 1.0)
            .edge("B", "C", 1.0)
            .edge("C", "D", 1.0)
            .edge("D", "A", 4.0)
            .root("A")
            .build()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_square() {
        let report = Simulation::new(square()).run().await.unwrap();

        assert_eq!(report.distance(&"B".into()), Some(1.0));
        assert_eq!(report.distance(&"C".into()), Some(2.0));
        assert_eq!(report.distance(&"D".into()), Some(3.0));
        assert_eq!(report.counter_sum(), 0);
        assert!(report.final_round().is_some());
        assert!(!report.trace.is_empty());
        assert!(Uuid::parse_str(&report.run_id).is_ok());
    }

    #[tokio::test]
    async fn test_run_on_current_thread_runtime() {
        let report = Simulation::new(square()).run().await.unwrap();
        assert_eq!(report.distance(&"D".into()), Some(3.0));
    }

    #[tokio::test]
    async fn test_trace_recording_can_be_disabled() {
        let report = Simulation::new(square())
            .with_config(SimConfig::default().with_trace(false))
            .run()
            .await
            .unwrap();
        assert!(report.trace.is_empty());
        assert!(!report.rounds.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_start() {
        let err = Simulation::new(square())
            .with_config(SimConfig::default().with_mailbox_capacity(0))
            .run()
            .await
            .unwrap_err();
        assert!(err.is_rejected_input());
    }

    #[tokio::test]
    async fn test_single_slot_mailboxes_on_a_line() {
        // Updates only flow away from the root on a line, so even one-slot
        // mailboxes cannot form a cycle of blocked sends.
        let line = Topology::builder()
            .nodes(["A", "B", "C", "D"])
            .edge("A", "B", 1.0)
            .edge("B", "C", 1.0)
            .edge("C", "D", 1.0)
            .root("A")
            .build()
            .unwrap();
        let report = Simulation::new(line)
            .with_config(
                SimConfig::default()
                    .with_mailbox_capacity(1)
                    .with_token_capacity(1)
                    .with_stall_timeout(Duration::from_secs(10)),
            )
            .run()
            .await
            .unwrap();
        assert_eq!(report.distance(&"D".into()), Some(3.0));
    }

    #[tokio::test]
    async fn test_single_slot_mailboxes_on_a_complete_graph() {
        // Every node relays to every other one, so sends cross in both
        // directions over full mailboxes all the time.
        let mut builder = Topology::builder();
        let names: Vec<String> = (0..12).map(|i| format!("N{i}")).collect();
        builder = builder.nodes(names.iter().map(String::as_str));
        for (i, a) in names.iter().enumerate() {
            for (j, b) in names.iter().enumerate().skip(i + 1) {
                builder = builder.edge(a.as_str(), b.as_str(), (1 + (i * 7 + j * 3) % 5) as f64);
            }
        }
        let topology = builder.root("N0").build().unwrap();

        let report = Simulation::new(topology)
            .with_config(
                SimConfig::default()
                    .with_mailbox_capacity(1)
                    .with_token_capacity(1)
                    .with_stall_timeout(Duration::from_secs(10)),
            )
            .run()
            .await
            .unwrap();
        assert_eq!(report.distances.len(), 12);
        assert_eq!(report.counter_sum(), 0);
        assert!(report.final_round().is_some());
    }

    fn tracked(
        tasks: &mut JoinSet<SimResult<()>>,
        pending: &mut HashMap<task::Id, NodeId>,
        id: &str,
        work: impl std::future::Future<Output = SimResult<()>> + Send + 'static,
    ) {
        let handle = tasks.spawn(work);
        pending.insert(handle.id(), NodeId::from(id));
    }

    #[tokio::test]
    async fn test_busy_run_outlives_the_window() {
        let progress = Arc::new(AtomicU64::new(0));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        let steps = Arc::clone(&progress);
        tracked(&mut tasks, &mut pending, "A", async move {
            for _ in 0..15 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                steps.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        // Runs for ~300ms against a 100ms window
        join_nodes(&mut tasks, pending, &progress, Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_silent_run_is_stalled() {
        let progress = AtomicU64::new(0);
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        tracked(&mut tasks, &mut pending, "A", async { Ok(()) });
        tracked(&mut tasks, &mut pending, "B", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let err = join_nodes(&mut tasks, pending, &progress, Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            SimError::Stalled { timeout, pending } => {
                assert_eq!(timeout, Duration::from_millis(50));
                assert_eq!(pending, vec![NodeId::from("B")]);
            }
            other => panic!("Wrong error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_node_error_ends_the_join() {
        let progress = AtomicU64::new(0);
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        tracked(&mut tasks, &mut pending, "A", async {
            Err(SimError::protocol("A", "broken"))
        });
        tracked(&mut tasks, &mut pending, "B", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let err = join_nodes(&mut tasks, pending, &progress, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::ProtocolViolation { .. }));
    }
}
