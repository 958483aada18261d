//! Result collection
//!
//! A single aggregator task owns everything the run produces. Node tasks never
//! share a results map; they push [`Feed`] items down an unbounded channel and
//! the aggregator assembles the [`Report`] once every sender is gone.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::topology::{NodeId, Topology};
use crate::trace::TraceEvent;

/// Items pushed to the aggregator
#[derive(Debug, Clone)]
pub enum Feed {
    Event(TraceEvent),
    Round(RoundSummary),
    Completed(NodeReport),
}

/// Final state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub distance: f64,
    /// Neighbor that supplied the final distance; `None` for the root
    pub predecessor: Option<NodeId>,
    /// Sent minus received at halt
    pub counter: i64,
    pub sent: u64,
    pub received: u64,
}

/// Outcome of one token circulation as seen by the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u64,
    pub sum: i64,
    pub tainted: bool,
    pub last: bool,
    /// Nodes the token visited
    pub visited: usize,
}

impl RoundSummary {
    /// Round certified quiescence
    pub fn is_conclusive(&self) -> bool {
        self.sum == 0 && !self.tainted
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub root: NodeId,
    pub distances: BTreeMap<NodeId, f64>,
    pub nodes: BTreeMap<NodeId, NodeReport>,
    pub rounds: Vec<RoundSummary>,
    /// Ordered by sequence number; empty when trace recording is off
    pub trace: Vec<TraceEvent>,
}

impl Report {
    /// Final shortest distances
    pub fn distances(&self) -> &BTreeMap<NodeId, f64> {
        &self.distances
    }

    /// Distance of one node
    pub fn distance(&self, id: &NodeId) -> Option<f64> {
        self.distances.get(id).copied()
    }

    /// Shortest path from the root to `target`, following predecessors
    ///
    /// Returns `None` for unknown or unreachable nodes. The walk is bounded by
    /// the node count, so a corrupted predecessor chain cannot loop forever.
    pub fn path_to(&self, target: &NodeId) -> Option<Vec<NodeId>> {
        let mut current = self.nodes.get(target)?;
        if !current.distance.is_finite() {
            return None;
        }
        let mut path = vec![current.id.clone()];
        while let Some(previous) = &current.predecessor {
            if path.len() > self.nodes.len() {
                return None;
            }
            path.push(previous.clone());
            current = self.nodes.get(previous)?;
        }
        if path.last() != Some(&self.root) {
            return None;
        }
        path.reverse();
        Some(path)
    }

    /// The circulation that halted the run
    pub fn final_round(&self) -> Option<&RoundSummary> {
        self.rounds.last().filter(|round| round.last)
    }

    /// Sum of every node's final counter; zero once all messages are consumed
    pub fn counter_sum(&self) -> i64 {
        self.nodes.values().map(|node| node.counter).sum()
    }

    /// Total distance messages sent
    pub fn messages_sent(&self) -> u64 {
        self.nodes.values().map(|node| node.sent).sum()
    }
}

/// Drain the feed until every sender is dropped, then assemble the report
pub(crate) async fn collect(
    topology: Arc<Topology>,
    run_id: String,
    mut feed: mpsc::UnboundedReceiver<Feed>,
) -> SimResult<Report> {
    let mut nodes = BTreeMap::new();
    let mut rounds = Vec::new();
    let mut trace = Vec::new();

    while let Some(item) = feed.recv().await {
        match item {
            Feed::Event(event) => trace.push(event),
            Feed::Round(summary) => rounds.push(summary),
            Feed::Completed(report) => {
                debug!(node = %report.id, distance = report.distance, "node reported");
                nodes.insert(report.id.clone(), report);
            }
        }
    }

    if let Some(missing) = topology
        .nodes()
        .iter()
        .find(|entry| !nodes.contains_key(&entry.id))
    {
        return Err(SimError::MissingReport(missing.id.clone()));
    }

    trace.sort_by_key(|event: &TraceEvent| event.seq);
    let distances = nodes
        .values()
        .map(|node: &NodeReport| (node.id.clone(), node.distance))
        .collect();

    Ok(Report {
        run_id,
        root: topology.root().clone(),
        distances,
        nodes,
        rounds,
        trace,
    })
}
