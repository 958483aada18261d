//! Per-node shared state and the active/passive barrier
//!
//! A node's diffusion loop and termination loop share exactly one
//! [`NodeContext`]. The mutable part lives in a [`Ledger`] behind a tokio
//! mutex; the `idle` notifier wakes the termination loop when the last
//! in-progress distance handling finishes.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard, Notify};

use crate::aggregator::NodeReport;
use crate::error::{SimError, SimResult};
use crate::message::{DistanceUpdate, Token};
use crate::topology::{Link, NodeId, Topology};
use crate::trace::{TraceKind, TraceSink};

/// Sending halves of one node's two mailboxes
#[derive(Debug, Clone)]
pub(crate) struct Peer {
    pub id: NodeId,
    pub distances: mpsc::Sender<DistanceUpdate>,
    pub tokens: mpsc::Sender<Token>,
}

/// Mutable node state shared by both loops
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ledger {
    pub distance: f64,
    pub predecessor: Option<NodeId>,
    /// Messages sent minus messages received and consumed
    pub counter: i64,
    /// Distance handlings currently in progress
    pub active: usize,
    /// Consumed a message since the token last left this node
    pub tainted: bool,
    pub sent: u64,
    pub received: u64,
}

impl Ledger {
    fn new(is_root: bool) -> Self {
        Self {
            distance: if is_root { 0.0 } else { f64::INFINITY },
            predecessor: None,
            counter: 0,
            active: 0,
            tainted: false,
            sent: 0,
            received: 0,
        }
    }
}

/// What the termination loop reads when the node is passive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub counter: i64,
    pub tainted: bool,
}

/// Outcome of consuming one distance message
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Relaxation {
    Improved(f64),
    Discarded,
}

pub(crate) struct NodeContext {
    pub index: usize,
    pub id: NodeId,
    pub topology: Arc<Topology>,
    peers: Arc<[Peer]>,
    ledger: Mutex<Ledger>,
    idle: Notify,
    done: watch::Sender<bool>,
    pub trace: TraceSink,
}

impl NodeContext {
    pub fn new(index: usize, topology: Arc<Topology>, peers: Arc<[Peer]>, trace: TraceSink) -> Self {
        let id = topology.node(index).id.clone();
        let is_root = index == topology.root_index();
        let (done, _) = watch::channel(false);
        Self {
            index,
            id,
            topology,
            peers,
            ledger: Mutex::new(Ledger::new(is_root)),
            idle: Notify::new(),
            done,
            trace,
        }
    }

    pub fn is_root(&self) -> bool {
        self.index == self.topology.root_index()
    }

    /// Ordered neighbor list
    pub fn neighbors(&self) -> &[Link] {
        &self.topology.node(self.index).neighbors
    }

    /// Link to a neighbor by id
    pub fn link_to(&self, id: &NodeId) -> Option<&Link> {
        self.topology.node(self.index).link_to(id)
    }

    /// Mark one distance handling (or the root broadcast) as in progress
    pub async fn enter_active(&self) {
        self.ledger.lock().await.active += 1;
    }

    /// Finish an in-progress handling, waking the barrier when none remain
    pub async fn exit_active(&self) {
        let mut ledger = self.ledger.lock().await;
        ledger.active -= 1;
        if ledger.active == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Consume a received message and relax against it
    ///
    /// Must be called between [`enter_active`](Self::enter_active) and
    /// [`exit_active`](Self::exit_active).
    pub async fn consume(&self, update: &DistanceUpdate, weight: f64) -> Relaxation {
        let mut ledger = self.ledger.lock().await;
        ledger.counter -= 1;
        ledger.received += 1;
        ledger.tainted = true;
        let counter = ledger.counter;

        let candidate = update.distance + weight;
        let outcome = if candidate < ledger.distance {
            ledger.distance = candidate;
            ledger.predecessor = Some(update.sender.clone());
            Relaxation::Improved(candidate)
        } else {
            Relaxation::Discarded
        };
        drop(ledger);

        self.trace.emit(TraceKind::DistanceReceived {
            node: self.id.clone(),
            from: update.sender.clone(),
            distance: update.distance,
            counter,
        });
        if let Relaxation::Improved(distance) = outcome {
            self.trace.emit(TraceKind::DistanceImproved {
                node: self.id.clone(),
                distance,
                via: update.sender.clone(),
            });
        }
        outcome
    }

    /// Distance mailbox of a neighbor
    pub fn mailbox(&self, to: &Link) -> &mpsc::Sender<DistanceUpdate> {
        &self.peers[to.index].distances
    }

    /// Count a send whose mailbox slot is already reserved
    ///
    /// The counter moves before the message can reach the neighbor, so the
    /// receipt never shows up ahead of its send.
    pub async fn count_send(&self, to: &Link, distance: f64) {
        let counter = {
            let mut ledger = self.ledger.lock().await;
            ledger.counter += 1;
            ledger.sent += 1;
            ledger.counter
        };
        self.trace.emit(TraceKind::DistanceSent {
            from: self.id.clone(),
            to: to.id.clone(),
            distance,
            counter,
        });
    }

    /// Lock the ledger once no distance handling is in progress
    async fn passive_ledger(&self) -> MutexGuard<'_, Ledger> {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let ledger = self.ledger.lock().await;
                if ledger.active == 0 {
                    return ledger;
                }
            }
            idle.await;
        }
    }

    /// Wait until passive, then read the counter and taint and clear the
    /// taint, all under one lock
    pub async fn passive_snapshot(&self) -> Snapshot {
        let mut ledger = self.passive_ledger().await;
        let snapshot = Snapshot {
            counter: ledger.counter,
            tainted: ledger.tainted,
        };
        ledger.tainted = false;
        snapshot
    }

    /// Barrier-gated token forward
    ///
    /// `accumulate` is true for the node's first forward of a round: that is
    /// when its counter joins the token's sum. The hand-off to the neighbor's
    /// mailbox happens while the passive ledger is still locked, so no
    /// handling can start between the snapshot and the send.
    pub async fn forward_token(&self, mut token: Token, to: &Link, accumulate: bool) -> SimResult<()> {
        let mut ledger = self.passive_ledger().await;
        if accumulate {
            token.sum += ledger.counter;
        }
        token.tainted |= ledger.tainted;
        ledger.tainted = false;
        token.sender = self.id.clone();

        self.trace.emit(TraceKind::TokenForwarded {
            from: self.id.clone(),
            to: to.id.clone(),
            round: token.round,
            sum: token.sum,
            last: token.last,
            active: ledger.active,
        });
        let peer = &self.peers[to.index];
        let sent = peer.tokens.try_send(token);
        drop(ledger);

        match sent {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SimError::MailboxClosed { node: peer.id.clone() }),
            // Only one token exists, so its target mailbox is always empty
            Err(TrySendError::Full(_)) => Err(SimError::protocol(
                &self.id,
                format!("token mailbox of {} already holds a token", peer.id),
            )),
        }
    }

    /// Fire the completion signal
    pub fn halt(&self) {
        self.done.send_replace(true);
        self.trace.emit(TraceKind::NodeHalted { node: self.id.clone() });
    }

    /// Receiver side of the completion signal
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Final per-node figures for the aggregator
    pub async fn report(&self) -> NodeReport {
        let ledger = self.ledger.lock().await;
        NodeReport {
            id: self.id.clone(),
            distance: ledger.distance,
            predecessor: ledger.predecessor.clone(),
            counter: ledger.counter,
            sent: ledger.sent,
            received: ledger.received,
        }
    }

    #[cfg(test)]
    pub async fn ledger(&self) -> Ledger {
        self.ledger.lock().await.clone()
    }
}
