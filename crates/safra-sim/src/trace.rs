//! Ordered protocol trace
//!
//! Every protocol step is logged through `tracing` and, when trace recording
//! is enabled, also shipped to the aggregator stamped with a global sequence
//! number. Causally related events keep their order: a send is recorded
//! before the message is handed to the mailbox, a receipt after it is taken
//! out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregator::{Feed, NodeReport, RoundSummary};
use crate::topology::NodeId;

/// One protocol step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceKind {
    DistanceSent {
        from: NodeId,
        to: NodeId,
        distance: f64,
        counter: i64,
    },
    DistanceReceived {
        node: NodeId,
        from: NodeId,
        distance: f64,
        counter: i64,
    },
    DistanceImproved {
        node: NodeId,
        distance: f64,
        via: NodeId,
    },
    TokenIssued {
        round: u64,
        last: bool,
    },
    ParentAssigned {
        node: NodeId,
        parent: NodeId,
        round: u64,
    },
    TokenForwarded {
        from: NodeId,
        to: NodeId,
        round: u64,
        sum: i64,
        last: bool,
        /// In-progress distance handlings at the forwarding node when the
        /// token left; the barrier keeps this at zero
        active: usize,
    },
    RoundCompleted {
        round: u64,
        sum: i64,
        tainted: bool,
        last: bool,
    },
    NodeHalted {
        node: NodeId,
    },
    StragglerDiscarded {
        node: NodeId,
        from: NodeId,
    },
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceKind::DistanceSent { from, to, distance, counter } => {
                write!(f, "[{from}] send dist={distance} to {to} (counter={counter})")
            }
            TraceKind::DistanceReceived { node, from, distance, counter } => {
                write!(f, "[{node}] recv dist={distance} from {from} (counter={counter})")
            }
            TraceKind::DistanceImproved { node, distance, via } => {
                write!(f, "[{node}] distance -> {distance} via {via}")
            }
            TraceKind::TokenIssued { round, last } => {
                let kind = if *last { "final round" } else { "round" };
                write!(f, "== {kind} {round} issued ==")
            }
            TraceKind::ParentAssigned { node, parent, round } => {
                write!(f, "[{node}] parent for round {round} is {parent}")
            }
            TraceKind::TokenForwarded { from, to, round, sum, last, .. } => {
                let kind = if *last { "last token" } else { "token" };
                write!(f, "[{from}] {kind} r{round} to {to} (sum={sum})")
            }
            TraceKind::RoundCompleted { round, sum, tainted, last } => {
                write!(f, "== round {round} returned: sum={sum} tainted={tainted} last={last} ==")
            }
            TraceKind::NodeHalted { node } => write!(f, "[{node}] halted"),
            TraceKind::StragglerDiscarded { node, from } => {
                write!(f, "[{node}] discarded straggler from {from}")
            }
        }
    }
}

/// A trace entry with its global position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: TraceKind,
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:05} {}", self.seq, self.kind)
    }
}

/// Handle through which node tasks report to the aggregator
#[derive(Debug, Clone)]
pub struct TraceSink {
    feed: mpsc::UnboundedSender<Feed>,
    seq: Arc<AtomicU64>,
    record: bool,
}

impl TraceSink {
    pub(crate) fn new(feed: mpsc::UnboundedSender<Feed>, record: bool) -> Self {
        Self {
            feed,
            seq: Arc::new(AtomicU64::new(0)),
            record,
        }
    }

    /// Log a protocol step and record it if tracing is enabled
    ///
    /// The sequence number advances either way; the runtime watches it to
    /// tell a slow run from a stuck one.
    pub fn emit(&self, kind: TraceKind) {
        log(&kind);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        if self.record {
            // The aggregator outlives every node task, so a closed feed only
            // happens while the run is being torn down after an error.
            let _ = self.feed.send(Feed::Event(TraceEvent { seq, kind }));
        }
    }

    /// Shared count of emitted steps
    pub(crate) fn progress(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.seq)
    }

    pub(crate) fn round(&self, summary: RoundSummary) {
        let _ = self.feed.send(Feed::Round(summary));
    }

    pub(crate) fn completed(&self, report: NodeReport) {
        let _ = self.feed.send(Feed::Completed(report));
    }
}

fn log(kind: &TraceKind) {
    match kind {
        TraceKind::DistanceSent { from, to, distance, counter } => {
            debug!(node = %from, to = %to, distance, counter, "distance sent");
        }
        TraceKind::DistanceReceived { node, from, distance, counter } => {
            debug!(node = %node, from = %from, distance, counter, "distance received");
        }
        TraceKind::DistanceImproved { node, distance, via } => {
            debug!(node = %node, distance, via = %via, "distance improved");
        }
        TraceKind::TokenIssued { round, last } => info!(round, last, "token issued"),
        TraceKind::ParentAssigned { node, parent, round } => {
            debug!(node = %node, parent = %parent, round, "parent assigned");
        }
        TraceKind::TokenForwarded { from, to, round, sum, last, active } => {
            debug!(node = %from, to = %to, round, sum, last, active, "token forwarded");
        }
        TraceKind::RoundCompleted { round, sum, tainted, last } => {
            info!(round, sum, tainted, last, "round completed");
        }
        TraceKind::NodeHalted { node } => debug!(node = %node, "node halted"),
        TraceKind::StragglerDiscarded { node, from } => {
            warn!(node = %node, from = %from, "straggler discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_assigns_increasing_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TraceSink::new(tx, true);

        sink.emit(TraceKind::NodeHalted { node: "A".into() });
        sink.clone().emit(TraceKind::NodeHalted { node: "B".into() });

        let seqs: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|feed| match feed {
                Feed::Event(event) => event.seq,
                _ => panic!("Wrong feed variant"),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_emit_without_recording_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TraceSink::new(tx, false);
        sink.emit(TraceKind::TokenIssued { round: 1, last: false });
        assert!(rx.try_recv().is_err());
        // Progress is counted even when nothing is recorded
        assert_eq!(sink.progress().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_display_token_forwarded() {
        let event = TraceEvent {
            seq: 7,
            kind: TraceKind::TokenForwarded {
                from: "Q".into(),
                to: "R".into(),
                round: 2,
                sum: 3,
                last: false,
                active: 0,
            },
        };
        assert_eq!(event.to_string(), "#00007 [Q] token r2 to R (sum=3)");
    }

    #[test]
    fn test_trace_event_serializes_flat() {
        let event = TraceEvent {
            seq: 1,
            kind: TraceKind::NodeHalted { node: "S".into() },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_halted");
        assert_eq!(json["node"], "S");
        assert_eq!(json["seq"], 1);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_steps_are_logged_as_fields() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = TraceSink::new(tx, false);
        tracing::subscriber::with_default(subscriber, || {
            sink.emit(TraceKind::RoundCompleted {
                round: 3,
                sum: 0,
                tainted: false,
                last: true,
            });
            sink.emit(TraceKind::StragglerDiscarded {
                node: "S".into(),
                from: "T".into(),
            });
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("round completed"));
        assert!(output.contains("round=3 sum=0 tainted=false last=true"));
        assert!(output.contains("WARN"));
        assert!(output.contains("node=S from=T"));
        assert!(!output.contains("== round"));
    }
}
