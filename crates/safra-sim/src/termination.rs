//! Token-circulation termination detection
//!
//! The root issues numbered rounds. In each round the token walks the graph
//! depth-first: a node forwards it to every unvisited neighbor in list order,
//! waiting for it to come back each time, then returns it to its parent. A
//! node's counter joins the sum on its first forward of the round; its taint
//! joins the token on every forward. A round whose sum is zero and whose token
//! came back untainted certifies quiescence, after which one `last` round
//! tells every node to halt.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::aggregator::RoundSummary;
use crate::error::{SimError, SimResult};
use crate::message::Token;
use crate::node::NodeContext;
use crate::topology::NodeId;
use crate::trace::TraceKind;

/// Token loop for whichever role this node plays
pub(crate) async fn token_loop(ctx: &NodeContext, inbox: mpsc::Receiver<Token>) -> SimResult<()> {
    if ctx.is_root() {
        root_loop(ctx, inbox).await
    } else {
        member_loop(ctx, inbox).await
    }
}

async fn root_loop(ctx: &NodeContext, mut inbox: mpsc::Receiver<Token>) -> SimResult<()> {
    let mut round = 0;
    // An isolated root sent nothing, so there is nothing to wait for.
    let mut settled = ctx.neighbors().is_empty();
    while !settled {
        round += 1;
        settled = circulate(ctx, &mut inbox, round, false).await?.is_conclusive();
    }

    round += 1;
    let flush = circulate(ctx, &mut inbox, round, true).await?;
    if !flush.is_conclusive() {
        return Err(SimError::protocol(
            &ctx.id,
            format!(
                "final round {} returned sum={} tainted={} after quiescence was certified",
                round, flush.sum, flush.tainted
            ),
        ));
    }

    info!(rounds = round, "termination detected");
    ctx.halt();
    Ok(())
}

/// Run one full depth-first circulation from the root
async fn circulate(
    ctx: &NodeContext,
    inbox: &mut mpsc::Receiver<Token>,
    round: u64,
    last: bool,
) -> SimResult<Token> {
    ctx.trace.emit(TraceKind::TokenIssued { round, last });

    let mut token = Token::issue(&ctx.id, round, last);
    let mut accumulated = false;
    for link in ctx.neighbors() {
        if token.has_visited(&link.id) {
            continue;
        }
        ctx.forward_token(token, link, !accumulated).await?;
        accumulated = true;
        token = await_return(ctx, inbox, &link.id, round).await?;
    }

    // The root stays on the traversal stack for the whole round, so anything it
    // consumed after its last forward still belongs to this round.
    let snapshot = ctx.passive_snapshot().await;
    if !accumulated {
        token.sum += snapshot.counter;
    }
    token.tainted |= snapshot.tainted;

    if token.visited.len() != ctx.topology.len() {
        return Err(SimError::protocol(
            &ctx.id,
            format!(
                "round {} visited {} of {} nodes",
                round,
                token.visited.len(),
                ctx.topology.len()
            ),
        ));
    }

    ctx.trace.emit(TraceKind::RoundCompleted {
        round,
        sum: token.sum,
        tainted: token.tainted,
        last,
    });
    ctx.trace.round(RoundSummary {
        round,
        sum: token.sum,
        tainted: token.tainted,
        last,
        visited: token.visited.len(),
    });
    Ok(token)
}

async fn member_loop(ctx: &NodeContext, mut inbox: mpsc::Receiver<Token>) -> SimResult<()> {
    loop {
        let mut token = receive(ctx, &mut inbox).await?;
        let round = token.round;
        let last = token.last;

        let parent = ctx
            .link_to(&token.sender)
            .ok_or_else(|| {
                SimError::protocol(&ctx.id, format!("token from non-neighbor {}", token.sender))
            })?
            .clone();
        if token.has_visited(&ctx.id) {
            return Err(SimError::protocol(
                &ctx.id,
                format!("round {} token arrived from {} after this node was visited", round, parent.id),
            ));
        }
        token.visited.insert(ctx.id.clone());
        ctx.trace.emit(TraceKind::ParentAssigned {
            node: ctx.id.clone(),
            parent: parent.id.clone(),
            round,
        });

        let mut accumulated = false;
        for link in ctx.neighbors() {
            if link.id == parent.id || token.has_visited(&link.id) {
                continue;
            }
            ctx.forward_token(token, link, !accumulated).await?;
            accumulated = true;
            token = await_return(ctx, &mut inbox, &link.id, round).await?;
        }
        ctx.forward_token(token, &parent, !accumulated).await?;
        debug!(node = %ctx.id, round, parent = %parent.id, "returned token to parent");

        if last {
            ctx.halt();
            return Ok(());
        }
    }
}

async fn receive(ctx: &NodeContext, inbox: &mut mpsc::Receiver<Token>) -> SimResult<Token> {
    inbox
        .recv()
        .await
        .ok_or_else(|| SimError::MailboxClosed { node: ctx.id.clone() })
}

/// Wait for the token to come back from the child it was handed to
async fn await_return(
    ctx: &NodeContext,
    inbox: &mut mpsc::Receiver<Token>,
    child: &NodeId,
    round: u64,
) -> SimResult<Token> {
    let token = receive(ctx, inbox).await?;
    if &token.sender != child || token.round != round {
        return Err(SimError::protocol(
            &ctx.id,
            format!(
                "expected round {} token back from {}, got round {} from {}",
                round, child, token.round, token.sender
            ),
        ));
    }
    Ok(token)
}
