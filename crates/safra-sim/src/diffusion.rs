//! Diffusing shortest-path relaxation
//!
//! Every node, the root included, runs a [`Diffusion`] until its completion
//! signal fires. Each received distance is handled with the node marked
//! active, so the termination loop never forwards the token while a handling
//! (and the sends it triggers) is still in progress.
//!
//! A send waits for a free slot in the neighbor's mailbox. While it waits the
//! node keeps taking updates out of its own inbox and queues them locally, so
//! two nodes sending to each other over full mailboxes both make progress.
//! Queued updates count as in-progress handlings until they are consumed.

use std::collections::VecDeque;

use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::error::{SimError, SimResult};
use crate::message::DistanceUpdate;
use crate::node::{NodeContext, Relaxation};
use crate::topology::{Link, NodeId};
use crate::trace::TraceKind;

/// Relaxation side of one node
pub(crate) struct Diffusion<'a> {
    ctx: &'a NodeContext,
    inbox: mpsc::Receiver<DistanceUpdate>,
    /// Received while a send was waiting; each entry holds one active mark
    backlog: VecDeque<DistanceUpdate>,
    open: bool,
}

impl<'a> Diffusion<'a> {
    pub fn new(ctx: &'a NodeContext, inbox: mpsc::Receiver<DistanceUpdate>) -> Self {
        Self {
            ctx,
            inbox,
            backlog: VecDeque::new(),
            open: true,
        }
    }

    /// Root's initial announcement of distance 0 to every neighbor
    pub async fn broadcast(&mut self) -> SimResult<()> {
        self.ctx.enter_active().await;
        let result = self.announce(0.0, None).await;
        self.ctx.exit_active().await;
        result
    }

    /// Receive and relax until halted, then discard whatever is left
    pub async fn run(mut self) -> SimResult<()> {
        let mut done = self.ctx.completion();
        loop {
            self.settle().await?;
            tokio::select! {
                biased;
                _ = halted(&mut done) => break,
                update = self.inbox.recv() => match update {
                    Some(update) => self.defer(update).await,
                    None => break,
                },
            }
        }
        self.drain();
        Ok(())
    }

    async fn defer(&mut self, update: DistanceUpdate) {
        self.ctx.enter_active().await;
        self.backlog.push_back(update);
    }

    /// Handle queued updates in arrival order
    async fn settle(&mut self) -> SimResult<()> {
        while let Some(update) = self.backlog.pop_front() {
            let result = self.handle(update).await;
            self.ctx.exit_active().await;
            result?;
        }
        Ok(())
    }

    async fn handle(&mut self, update: DistanceUpdate) -> SimResult<()> {
        let ctx = self.ctx;
        let weight = ctx
            .link_to(&update.sender)
            .map(|link| link.weight)
            .ok_or_else(|| {
                SimError::protocol(
                    &ctx.id,
                    format!("distance message from non-neighbor {}", update.sender),
                )
            })?;

        match ctx.consume(&update, weight).await {
            Relaxation::Improved(distance) => self.announce(distance, Some(&update.sender)).await,
            Relaxation::Discarded => {
                trace!(node = %ctx.id, from = %update.sender, "no improvement");
                Ok(())
            }
        }
    }

    /// Send `distance` to every neighbor except `skip`
    async fn announce(&mut self, distance: f64, skip: Option<&NodeId>) -> SimResult<()> {
        let ctx = self.ctx;
        for link in ctx.neighbors().iter().filter(|link| Some(&link.id) != skip) {
            self.send(link, distance).await?;
        }
        Ok(())
    }

    async fn send(&mut self, to: &Link, distance: f64) -> SimResult<()> {
        let ctx = self.ctx;
        let mailbox = ctx.mailbox(to);
        let permit = loop {
            tokio::select! {
                biased;
                permit = mailbox.reserve() => {
                    break permit.map_err(|_| SimError::MailboxClosed { node: to.id.clone() })?;
                }
                update = self.inbox.recv(), if self.open => match update {
                    Some(update) => self.defer(update).await,
                    None => self.open = false,
                },
            }
        };
        ctx.count_send(to, distance).await;
        permit.send(DistanceUpdate::new(ctx.id.clone(), distance));
        Ok(())
    }

    /// Close the mailbox and discard anything still queued
    ///
    /// The final token round certified that no message was in flight, so this
    /// normally finds nothing.
    fn drain(&mut self) {
        self.inbox.close();
        while let Ok(update) = self.inbox.try_recv() {
            self.ctx.trace.emit(TraceKind::StragglerDiscarded {
                node: self.ctx.id.clone(),
                from: update.sender,
            });
        }
    }
}

async fn halted(done: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which only happens once the node
    // context itself is being dropped.
    let _ = done.wait_for(|halted| *halted).await;
}
