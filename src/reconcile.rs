//! Optimistic move orchestration.
//!
//! A [`MoveReconciler`] carries one [`MoveIntent`] through
//! `Idle -> OptimisticApplied -> Confirming -> Settled | RolledBack`.
//! Each instance owns the snapshot of exactly the tickets its move touched,
//! so concurrent moves of different tickets reconcile independently.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{BoardSyncContext, OptimisticChange};
use crate::error::{Result, SyncError};
use crate::rank::Allocation;
use crate::remote::BoardApi;
use crate::tracker::MutationToken;
use crate::types::{BoardId, MoveIntent, RankUpdate, Ticket, TicketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePhase {
    Idle,
    OptimisticApplied,
    Confirming,
    Settled,
    RolledBack,
}

enum_display!(MovePhase, {
    Idle => "idle",
    OptimisticApplied => "optimistic-applied",
    Confirming => "confirming",
    Settled => "settled",
    RolledBack => "rolled-back",
});

impl MovePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MovePhase::Settled | MovePhase::RolledBack)
    }
}

/// How a move ended.
#[derive(Debug)]
pub enum MoveOutcome {
    /// The ticket was already at the target position; nothing was applied
    /// or sent.
    NoOp,
    /// The server accepted the move. Holds the tickets as stored afterwards.
    Settled(Vec<Ticket>),
    /// The server refused or never answered; the touched tickets were
    /// restored and the user notified.
    RolledBack(SyncError),
}

impl MoveOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, MoveOutcome::Settled(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, MoveOutcome::RolledBack(_))
    }
}

pub struct MoveReconciler {
    ctx: Arc<BoardSyncContext>,
    intent: MoveIntent,
    phase: MovePhase,
    board_id: Option<BoardId>,
    changes: Vec<OptimisticChange>,
    supersedes: Option<MutationToken>,
}

impl MoveReconciler {
    pub fn new(ctx: Arc<BoardSyncContext>, intent: MoveIntent) -> Self {
        Self {
            ctx,
            intent,
            phase: MovePhase::Idle,
            board_id: None,
            changes: Vec::new(),
            supersedes: None,
        }
    }

    /// Apply, confirm and settle (or roll back) `intent` in one go.
    pub async fn run<A: BoardApi>(
        ctx: Arc<BoardSyncContext>,
        api: &A,
        intent: MoveIntent,
    ) -> Result<MoveOutcome> {
        let mut reconciler = Self::new(ctx, intent);
        if !reconciler.apply_optimistic()? {
            return Ok(MoveOutcome::NoOp);
        }
        Ok(reconciler.confirm(api).await)
    }

    pub fn phase(&self) -> MovePhase {
        self.phase
    }

    pub fn intent(&self) -> &MoveIntent {
        &self.intent
    }

    /// Tickets this move changed, with their state before the move.
    pub fn changes(&self) -> &[OptimisticChange] {
        &self.changes
    }

    /// Token of the still-pending change to the dragged ticket that this
    /// move replaced, if there was one.
    pub fn supersedes(&self) -> Option<MutationToken> {
        self.supersedes
    }

    /// Place the dragged ticket in the store ahead of the server.
    ///
    /// Returns `false` without touching anything if the ticket already sits
    /// at the target position, or if this move was already applied.
    pub fn apply_optimistic(&mut self) -> Result<bool> {
        if self.phase != MovePhase::Idle {
            return Ok(false);
        }
        self.ctx.ensure_can_move()?;

        let store = self.ctx.store();
        let ticket_id = &self.intent.ticket_id;
        let ticket = store
            .get(ticket_id.as_str())
            .ok_or_else(|| SyncError::TicketNotFound(ticket_id.to_string()))?;
        let target = &self.intent.target_column;

        if let Some(board) = store.board(ticket.board_id.as_str())
            && !board.has_column(target)
        {
            return Err(SyncError::ColumnNotFound(target.to_string()));
        }

        let column: Vec<Ticket> = store
            .tickets_in_column(target.as_str())
            .into_iter()
            .filter(|t| t.id != *ticket_id)
            .collect();
        let index = self.intent.target_index.min(column.len());

        if ticket.column_id == *target && store.index_in_column(ticket_id.as_str()) == Some(index) {
            tracing::debug!(ticket = %ticket_id, "move lands on current position, ignoring");
            return Ok(false);
        }

        let allocation = self.ctx.ranks().allocate(ticket_id, index, &column);
        let mut updated = Vec::new();
        let mut moved = ticket.clone();
        moved.column_id = target.clone();
        if let Some(rank) = allocation.rank_of(ticket_id) {
            moved.rank = rank.clone();
        }
        updated.push(moved);

        if let Allocation::Renumbered(ranks) = &allocation {
            let current: HashMap<&TicketId, &Ticket> = column.iter().map(|t| (&t.id, t)).collect();
            for (id, rank) in ranks {
                if let Some(existing) = current.get(id)
                    && existing.rank != *rank
                {
                    let mut shifted = (*existing).clone();
                    shifted.rank = rank.clone();
                    updated.push(shifted);
                }
            }
        }

        let now = self.ctx.now();
        self.supersedes = self
            .ctx
            .tracker()
            .get(ticket_id.as_str())
            .filter(|marker| marker.is_active(now))
            .map(|marker| marker.token);
        if let Some(token) = self.supersedes {
            tracing::debug!(ticket = %ticket_id, ?token, "move supersedes pending change");
        }

        self.board_id = Some(ticket.board_id.clone());
        self.changes = updated
            .into_iter()
            .map(|t| self.ctx.apply_optimistic(&t.id.clone(), Some(t)))
            .collect();
        self.phase = MovePhase::OptimisticApplied;

        tracing::debug!(
            ticket = %ticket_id,
            to = %target,
            touched = self.changes.len(),
            "move applied optimistically"
        );
        Ok(true)
    }

    /// Send the move to the server and settle or roll back on its answer.
    ///
    /// Does nothing unless the move was applied optimistically first.
    pub async fn confirm<A: BoardApi>(&mut self, api: &A) -> MoveOutcome {
        if self.phase != MovePhase::OptimisticApplied {
            return MoveOutcome::NoOp;
        }
        self.phase = MovePhase::Confirming;

        match self.send(api).await {
            Ok(confirmed) => self.settle(confirmed),
            Err(error) => self.roll_back(error),
        }
    }

    async fn send<A: BoardApi>(&self, api: &A) -> Result<HashMap<TicketId, Ticket>> {
        let mut confirmed = HashMap::new();

        if self.intent.changes_column() {
            let ticket = api
                .move_ticket(&self.intent.ticket_id, &self.intent.target_column)
                .await?;
            confirmed.insert(ticket.id.clone(), ticket);
        }

        let updates: Vec<RankUpdate> = self
            .changes
            .iter()
            .filter_map(|c| {
                c.applied.as_ref().map(|t| RankUpdate {
                    id: t.id.clone(),
                    rank: t.rank.clone(),
                })
            })
            .collect();
        if let Some(board_id) = &self.board_id
            && !updates.is_empty()
        {
            // Rank results are the later write and win over the move result.
            for ticket in api.bulk_update_ranks(board_id, &updates).await? {
                confirmed.insert(ticket.id.clone(), ticket);
            }
        }
        Ok(confirmed)
    }

    fn settle(&mut self, mut confirmed: HashMap<TicketId, Ticket>) -> MoveOutcome {
        let mut stored = Vec::new();
        for change in &self.changes {
            let snapshot = confirmed
                .remove(&change.ticket_id)
                .or_else(|| change.applied.clone());
            self.ctx.settle(change, snapshot);
            if let Some(ticket) = self.ctx.store().get(change.ticket_id.as_str()) {
                stored.push(ticket);
            }
        }
        self.phase = MovePhase::Settled;
        tracing::info!(
            ticket = %self.intent.ticket_id,
            column = %self.intent.target_column,
            "move settled"
        );
        MoveOutcome::Settled(stored)
    }

    fn roll_back(&mut self, error: SyncError) -> MoveOutcome {
        for change in self.changes.iter().rev() {
            self.ctx.rollback(change);
        }
        self.phase = MovePhase::RolledBack;
        tracing::info!(ticket = %self.intent.ticket_id, %error, "move rolled back");
        self.ctx.notify_failure("move ticket", &error);
        MoveOutcome::RolledBack(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{RankConfig, SyncConfig};
    use crate::error::NetworkFailure;
    use crate::notify::NoticeLog;
    use crate::remote::{ApiCall, ApiOp, InMemoryServer};
    use crate::store::test_helpers::{make_board, make_ticket};
    use crate::types::{BoardLayout, ColumnId, Identity};

    struct Fixture {
        ctx: Arc<BoardSyncContext>,
        server: Arc<InMemoryServer>,
        notices: Arc<NoticeLog>,
    }

    fn fixture_with(config: SyncConfig, tickets: &[(&str, &str, &str)]) -> Fixture {
        let clock = Arc::new(ManualClock::at_millis(50_000));
        let notices = Arc::new(NoticeLog::new());
        let ctx = Arc::new(
            BoardSyncContext::new(config, Identity::member("me"))
                .with_clock(clock.clone())
                .with_notifier(notices.clone()),
        );
        let server = InMemoryServer::new(clock);
        let (board, columns) = make_board(&["todo", "doing", "done"]);
        let layout = BoardLayout { board, columns };
        ctx.apply_board_layout(layout.clone());
        server.seed_board(layout);
        for (id, column, rank) in tickets {
            let ticket = make_ticket(id, column, rank);
            ctx.apply_remote(ticket.clone());
            server.seed_ticket(ticket);
        }
        Fixture {
            ctx,
            server,
            notices,
        }
    }

    fn fixture(tickets: &[(&str, &str, &str)]) -> Fixture {
        fixture_with(SyncConfig::default(), tickets)
    }

    fn intent(id: &str, from: &str, from_index: usize, to: &str, to_index: usize) -> MoveIntent {
        MoveIntent {
            ticket_id: TicketId::from(id),
            source_column: ColumnId::from(from),
            source_index: from_index,
            target_column: ColumnId::from(to),
            target_index: to_index,
        }
    }

    fn column_ids(ctx: &BoardSyncContext, column: &str) -> Vec<String> {
        ctx.store()
            .tickets_in_column(column)
            .into_iter()
            .map(|t| t.id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_move_to_empty_column_settles() {
        let f = fixture(&[("t-1", "todo", "m")]);
        let api = f.server.client("me");

        let outcome = MoveReconciler::run(f.ctx.clone(), &api, intent("t-1", "todo", 0, "doing", 0))
            .await
            .unwrap();
        assert!(outcome.is_settled());
        assert_eq!(column_ids(&f.ctx, "doing"), vec!["t-1"]);
        assert!(f.ctx.tracker().is_empty());

        let ranks = f.server.calls_of(ApiOp::BulkUpdateRanks);
        assert_eq!(ranks.len(), 1);
        let ApiCall::BulkUpdateRanks { updates, .. } = &ranks[0] else {
            panic!("expected a rank update");
        };
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id.as_str(), "t-1");
    }

    #[tokio::test]
    async fn test_reorder_within_column_skips_move_call() {
        let f = fixture(&[("a", "todo", "c"), ("b", "todo", "m"), ("c", "todo", "t")]);
        let api = f.server.client("me");

        let outcome = MoveReconciler::run(f.ctx.clone(), &api, intent("c", "todo", 2, "todo", 0))
            .await
            .unwrap();
        assert!(outcome.is_settled());
        assert_eq!(column_ids(&f.ctx, "todo"), vec!["c", "a", "b"]);
        assert!(f.server.calls_of(ApiOp::MoveTicket).is_empty());
        assert_eq!(f.server.calls_of(ApiOp::BulkUpdateRanks).len(), 1);
    }

    #[tokio::test]
    async fn test_noop_intent_touches_nothing() {
        let f = fixture(&[("a", "todo", "c"), ("b", "todo", "m")]);
        let api = f.server.client("me");

        let outcome = MoveReconciler::run(f.ctx.clone(), &api, intent("b", "todo", 1, "todo", 1))
            .await
            .unwrap();
        assert!(matches!(outcome, MoveOutcome::NoOp));
        assert!(f.server.calls().is_empty());
        assert!(f.ctx.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_permission_failure_rolls_back() {
        let f = fixture(&[("a", "todo", "c"), ("t-1", "todo", "m")]);
        let api = f.server.client("me");
        let before = f.ctx.store().get("t-1").unwrap();
        f.server.fail_next(
            ApiOp::MoveTicket,
            NetworkFailure::permission_denied("not allowed"),
        );

        let mut reconciler = MoveReconciler::new(f.ctx.clone(), intent("t-1", "todo", 1, "done", 0));
        assert!(reconciler.apply_optimistic().unwrap());
        assert_eq!(reconciler.phase(), MovePhase::OptimisticApplied);
        assert_eq!(column_ids(&f.ctx, "done"), vec!["t-1"]);

        let outcome = reconciler.confirm(&api).await;
        assert!(outcome.is_rolled_back());
        assert_eq!(reconciler.phase(), MovePhase::RolledBack);
        assert_eq!(f.ctx.store().get("t-1"), Some(before));
        assert_eq!(column_ids(&f.ctx, "todo"), vec!["a", "t-1"]);
        assert!(!f.ctx.is_pending("t-1"));
        assert_eq!(f.notices.errors().len(), 1);
        assert!(f.server.calls_of(ApiOp::BulkUpdateRanks).is_empty());
    }

    #[tokio::test]
    async fn test_rank_failure_after_move_rolls_back() {
        let f = fixture(&[("t-1", "todo", "m")]);
        let api = f.server.client("me");
        f.server
            .fail_next(ApiOp::BulkUpdateRanks, NetworkFailure::timed_out("slow"));

        let outcome = MoveReconciler::run(f.ctx.clone(), &api, intent("t-1", "todo", 0, "doing", 0))
            .await
            .unwrap();
        assert!(outcome.is_rolled_back());
        assert_eq!(f.ctx.store().get("t-1").unwrap().column_id.as_str(), "todo");
    }

    #[tokio::test]
    async fn test_exhausted_rank_space_renumbers_target_column() {
        let config = SyncConfig {
            rank: RankConfig {
                max_len: 2,
                renumber_width: 2,
            },
            ..SyncConfig::default()
        };
        let f = fixture_with(
            config,
            &[("a", "doing", "i"), ("b", "doing", "i1"), ("t-1", "todo", "m")],
        );
        let api = f.server.client("me");

        let mut reconciler =
            MoveReconciler::new(f.ctx.clone(), intent("t-1", "todo", 0, "doing", 1));
        assert!(reconciler.apply_optimistic().unwrap());
        assert_eq!(reconciler.changes().len(), 3);
        assert_eq!(column_ids(&f.ctx, "doing"), vec!["a", "t-1", "b"]);

        let outcome = reconciler.confirm(&api).await;
        assert!(outcome.is_settled());
        let ApiCall::BulkUpdateRanks { updates, .. } =
            &f.server.calls_of(ApiOp::BulkUpdateRanks)[0]
        else {
            panic!("expected a rank update");
        };
        assert_eq!(updates.len(), 3);
        assert!(f.ctx.store().duplicate_ranks("doing").is_empty());
    }

    #[test]
    fn test_second_move_records_superseded_token() {
        let f = fixture(&[("t-1", "todo", "m")]);
        let mut first = MoveReconciler::new(f.ctx.clone(), intent("t-1", "todo", 0, "doing", 0));
        assert!(first.apply_optimistic().unwrap());
        assert_eq!(first.supersedes(), None);

        let mut second = MoveReconciler::new(f.ctx.clone(), intent("t-1", "doing", 0, "done", 0));
        assert!(second.apply_optimistic().unwrap());
        assert_eq!(second.supersedes(), Some(first.changes()[0].token));
        assert!(f.ctx.tracker().is_current("t-1", second.changes()[0].token));
    }

    #[tokio::test]
    async fn test_unknown_target_column_is_rejected() {
        let f = fixture(&[("t-1", "todo", "m")]);
        let mut reconciler =
            MoveReconciler::new(f.ctx.clone(), intent("t-1", "todo", 0, "nowhere", 0));
        assert!(matches!(
            reconciler.apply_optimistic(),
            Err(SyncError::ColumnNotFound(_))
        ));
        assert!(f.ctx.tracker().is_empty());
    }

    #[test]
    fn test_viewer_cannot_move() {
        let ctx = Arc::new(BoardSyncContext::new(
            SyncConfig::default(),
            Identity::viewer("me"),
        ));
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));
        let mut reconciler = MoveReconciler::new(ctx, intent("t-1", "todo", 0, "doing", 0));
        assert!(matches!(
            reconciler.apply_optimistic(),
            Err(SyncError::PermissionDenied(_))
        ));
    }
}
