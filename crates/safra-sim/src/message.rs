//! Message types exchanged between node actors
//!
//! Two kinds travel on two separate mailboxes per node: distance updates for
//! the diffusing computation and the single circulating token of the
//! termination detector.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::topology::NodeId;

/// A distance proposal sent to a neighbor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceUpdate {
    /// Node that sent the update
    pub sender: NodeId,
    /// Sender's current distance from the root
    pub distance: f64,
}

impl DistanceUpdate {
    pub fn new(sender: impl Into<NodeId>, distance: f64) -> Self {
        Self {
            sender: sender.into(),
            distance,
        }
    }
}

/// The circulating termination token
///
/// Exactly one token exists during a round. It travels depth-first: every
/// node forwards it to each unvisited neighbor in order and waits for it to
/// come back before moving on, then returns it to the neighbor it first came
/// from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Last node to forward the token
    pub sender: NodeId,
    /// Round number stamped by the root, starting at 1
    pub round: u64,
    /// Running total of the counters of visited nodes
    pub sum: i64,
    /// Final flushing round, issued once a round certified quiescence
    pub last: bool,
    /// Set when some visited node consumed a message since it last forwarded the token
    pub tainted: bool,
    /// Nodes already visited this round
    pub visited: BTreeSet<NodeId>,
}

impl Token {
    /// Fresh token for a round issued by `root`
    pub fn issue(root: impl Into<NodeId>, round: u64, last: bool) -> Self {
        let root = root.into();
        Self {
            visited: BTreeSet::from([root.clone()]),
            sender: root,
            round,
            sum: 0,
            last,
            tainted: false,
        }
    }

    /// Whether `node` has already been visited this round
    pub fn has_visited(&self, node: &NodeId) -> bool {
        self.visited.contains(node)
    }

    /// A round certifies quiescence only if nothing was outstanding and no
    /// visited node consumed a message behind the token's back
    pub fn is_conclusive(&self) -> bool {
        self.sum == 0 && !self.tainted
    }
}
