//! Error types for the simulation
//!
//! Topology problems are reported before any node task starts. Everything
//! that goes wrong afterwards is a fatal internal-consistency failure: the
//! protocol has no recoverable runtime error class.

use std::time::Duration;

use thiserror::Error;

use crate::topology::NodeId;

/// Reasons a topology is rejected at construction time
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopologyError {
    /// No nodes were declared
    #[error("topology has no nodes")]
    Empty,

    /// The same node id was declared twice
    #[error("node {0} declared more than once")]
    DuplicateNode(NodeId),

    /// An edge references an undeclared node
    #[error("edge {from} -> {to} references an undeclared node")]
    UnknownNode { from: NodeId, to: NodeId },

    /// The designated root was never declared as a node
    #[error("root {0} is not a declared node")]
    UnknownRoot(NodeId),

    /// A node lists itself as a neighbor
    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),

    /// Edge weights must be finite and strictly positive
    #[error("edge {from} -> {to} has invalid weight {weight}")]
    InvalidWeight { from: NodeId, to: NodeId, weight: f64 },

    /// A neighbor appears twice in the same list
    #[error("node {from} lists neighbor {to} more than once")]
    DuplicateEdge { from: NodeId, to: NodeId },

    /// `from` lists `to`, but `to` does not list `from`
    #[error("asymmetric edge: {from} lists {to} but {to} does not list {from}")]
    AsymmetricEdge { from: NodeId, to: NodeId },

    /// Both directions exist but disagree on the weight
    #[error("edge {from} <-> {to} has mismatched weights {forward} and {backward}")]
    WeightMismatch {
        from: NodeId,
        to: NodeId,
        forward: f64,
        backward: f64,
    },

    /// No node was designated as root
    #[error("no root node designated")]
    NoRoot,

    /// More than one node was designated as root
    #[error("multiple root nodes designated: {0:?}")]
    MultipleRoots(Vec<NodeId>),

    /// Some nodes cannot be reached from the root
    #[error("graph is disconnected, unreachable from root: {unreachable:?}")]
    Disconnected { unreachable: Vec<NodeId> },

    /// A topology file could not be read or parsed
    #[error("topology parse error: {0}")]
    Parse(String),
}

/// Errors that can occur while running a simulation
#[derive(Debug, Error)]
pub enum SimError {
    /// The topology failed validation; no task was started
    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),

    /// A node observed something the protocol cannot produce
    #[error("protocol violation at node {node}: {detail}")]
    ProtocolViolation { node: NodeId, detail: String },

    /// A peer's mailbox was closed while this node tried to deliver to it
    #[error("mailbox of node {node} is closed")]
    MailboxClosed { node: NodeId },

    /// No protocol step happened for a whole watchdog window
    #[error("simulation made no progress for {timeout:?}, nodes still running: {pending:?}")]
    Stalled { timeout: Duration, pending: Vec<NodeId> },

    /// Invalid simulation configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The async runtime could not be built or a task panicked
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The aggregator finished without hearing from a node
    #[error("no completion report from node {0}")]
    MissingReport(NodeId),
}

impl SimError {
    /// Create a protocol violation error
    pub fn protocol(node: impl Into<NodeId>, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            node: node.into(),
            detail: detail.into(),
        }
    }

    /// Create a config error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if the error was raised before any node task started
    pub fn is_rejected_input(&self) -> bool {
        matches!(self, SimError::InvalidTopology(_) | SimError::Config(_))
    }

    /// Check if the error points at an implementation defect rather than bad input
    pub fn is_fatal(&self) -> bool {
        !self.is_rejected_input()
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
