//! Board loading and realtime session wiring.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::context::BoardSyncContext;
use crate::error::Result;
use crate::events::{InboundEvent, SocketEventRouter};
use crate::remote::BoardApi;
use crate::tracker::ExpirySweeper;
use crate::types::{BoardId, TicketId};

/// What a [`load_board`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Server snapshots merged into the store.
    pub applied: usize,
    /// Tickets left at their optimistic value because a local change is pending.
    pub kept_pending: usize,
    /// Local tickets the server no longer lists.
    pub removed: usize,
}

/// Fetch a board's layout and tickets (active and archived) and merge them.
///
/// Tickets with a pending local change keep their optimistic value.
/// Tickets the server no longer lists are removed unless pending.
pub async fn load_board<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    board_id: &BoardId,
) -> Result<LoadSummary> {
    let (layout, active, archived) = futures::try_join!(
        api.get_board(board_id),
        api.list_tickets_by_board(board_id),
        api.list_archived_tickets_by_board(board_id),
    )?;

    ctx.apply_board_layout(layout);

    let mut summary = LoadSummary::default();
    let mut listed: HashSet<TicketId> = HashSet::new();
    for ticket in active.into_iter().chain(archived) {
        listed.insert(ticket.id.clone());
        if ctx.is_pending(ticket.id.as_str()) {
            summary.kept_pending += 1;
            continue;
        }
        ctx.apply_remote(ticket);
        summary.applied += 1;
    }

    for ticket in ctx.store().tickets_in_board(board_id.as_str()) {
        if !listed.contains(&ticket.id) && !ctx.is_pending(ticket.id.as_str()) {
            ctx.remove_remote(ticket.id.as_str());
            summary.removed += 1;
        }
    }

    tracing::info!(
        board = %board_id,
        applied = summary.applied,
        kept_pending = summary.kept_pending,
        removed = summary.removed,
        "board loaded"
    );
    Ok(summary)
}

/// A running realtime subscription: a task feeding the router and a sweeper
/// that expires pending markers and replays deferred events.
///
/// Both stop when the session is dropped.
pub struct RealtimeSession {
    router: Arc<SocketEventRouter>,
    task: JoinHandle<()>,
    _sweeper: ExpirySweeper,
}

impl RealtimeSession {
    /// Consume JSON frames from `frames`.
    pub fn from_frames(router: Arc<SocketEventRouter>, frames: mpsc::Receiver<String>) -> Self {
        let feed = router.clone();
        let task = tokio::spawn(async move { feed.run(frames).await });
        Self::start(router, task)
    }

    /// Consume decoded events from a broadcast feed.
    pub fn from_events(
        router: Arc<SocketEventRouter>,
        events: broadcast::Receiver<InboundEvent>,
    ) -> Self {
        let feed = router.clone();
        let task = tokio::spawn(async move { feed.run_events(events).await });
        Self::start(router, task)
    }

    fn start(router: Arc<SocketEventRouter>, task: JoinHandle<()>) -> Self {
        let sweep = router.clone();
        let interval = router.context().config().sweep_interval();
        let sweeper = ExpirySweeper::spawn(interval, move || {
            sweep.context().expire_pending();
            sweep.replay_deferred();
        });
        Self {
            router,
            task,
            _sweeper: sweeper,
        }
    }

    pub fn router(&self) -> &Arc<SocketEventRouter> {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the feed to close.
    pub async fn join(mut self) {
        if let Err(e) = (&mut self.task).await
            && !e.is_cancelled()
        {
            tracing::warn!(error = %e, "realtime task failed");
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SyncConfig;
    use crate::remote::InMemoryServer;
    use crate::store::test_helpers::{make_board, make_ticket};
    use crate::types::{BoardLayout, ClientId, Identity};

    fn context(clock: Arc<ManualClock>) -> Arc<BoardSyncContext> {
        Arc::new(
            BoardSyncContext::new(SyncConfig::default(), Identity::member("me")).with_clock(clock),
        )
    }

    #[tokio::test]
    async fn test_load_board_merges_listing() {
        let clock = Arc::new(ManualClock::at_millis(1_000));
        let ctx = context(clock.clone());
        let server = InMemoryServer::new(clock);
        let (board, columns) = make_board(&["todo", "done"]);
        server.seed_board(BoardLayout { board, columns });
        server.seed_ticket(make_ticket("t-1", "todo", "m"));
        let mut archived = make_ticket("t-2", "done", "m");
        archived.archived_at = Some(jiff::Timestamp::UNIX_EPOCH);
        server.seed_ticket(archived);

        // Known locally but gone on the server.
        ctx.apply_remote(make_ticket("t-gone", "todo", "c"));
        // Pending locally: keeps its optimistic column.
        server.seed_ticket(make_ticket("t-3", "todo", "q"));
        ctx.apply_optimistic(&TicketId::from("t-3"), Some(make_ticket("t-3", "done", "q")));

        let summary = load_board(&ctx, &server.client("me"), &BoardId::from("b-1"))
            .await
            .unwrap();
        assert_eq!(
            summary,
            LoadSummary {
                applied: 2,
                kept_pending: 1,
                removed: 1,
            }
        );
        assert!(ctx.store().get("t-gone").is_none());
        assert_eq!(ctx.store().get("t-3").unwrap().column_id.as_str(), "done");
        assert_eq!(ctx.store().columns_of_board("b-1").len(), 2);
        assert_eq!(ctx.store().archived_in_board("b-1").len(), 1);
    }

    #[tokio::test]
    async fn test_load_board_propagates_failure() {
        let clock = Arc::new(ManualClock::default());
        let ctx = context(clock.clone());
        let server = InMemoryServer::new(clock);
        let result = load_board(&ctx, &server.client("me"), &BoardId::from("missing")).await;
        assert!(result.unwrap_err().is_network_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_replays_deferred_after_expiry() {
        let clock = Arc::new(ManualClock::at_millis(10_000));
        let ctx = context(clock.clone());
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));
        ctx.apply_optimistic(&TicketId::from("t-1"), Some(make_ticket("t-1", "doing", "m")));

        let router = Arc::new(SocketEventRouter::new(ctx.clone()));
        let (tx, rx) = mpsc::channel(8);
        let session = RealtimeSession::from_frames(router, rx);

        let frame = InboundEvent::updated(
            make_ticket("t-1", "done", "m"),
            ClientId::from("other"),
            ctx.now(),
        )
        .to_json()
        .unwrap();
        tx.send(frame).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.router().deferred_len(), 1);
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "doing");

        clock.advance_millis(3_000);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.router().deferred_len(), 0);
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "done");
        assert!(ctx.tracker().is_empty());

        drop(tx);
        session.join().await;
    }

    #[tokio::test]
    async fn test_session_from_server_events() {
        let clock = Arc::new(ManualClock::at_millis(10_000));
        let ctx = context(clock.clone());
        let server = InMemoryServer::new(clock);
        server.seed_ticket(make_ticket("t-1", "todo", "m"));
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));

        let router = Arc::new(SocketEventRouter::new(ctx.clone()));
        let session = RealtimeSession::from_events(router, server.subscribe());
        assert!(session.is_running());

        let other = server.client("other");
        crate::remote::BoardApi::move_ticket(
            &other,
            &TicketId::from("t-1"),
            &crate::types::ColumnId::from("done"),
        )
        .await
        .unwrap();

        for _ in 0..50 {
            if ctx.store().get("t-1").unwrap().column_id.as_str() == "done" {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "done");
    }
}
