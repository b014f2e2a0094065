//! The explicitly owned board aggregate.
//!
//! [`BoardSyncContext`] bundles the store, the pending-mutation tracker, the
//! rank allocator and the host collaborators (clock, identity, notifier).
//! Components receive an `Arc<BoardSyncContext>` and change board state only
//! through the command methods below, which pair every store write with the
//! matching tracker bookkeeping.

use std::sync::Arc;

use jiff::Timestamp;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::notify::{Notice, NoticeLog, Notifier};
use crate::rank::RankAllocator;
use crate::store::{TicketStore, UpsertOutcome};
use crate::tracker::{MutationToken, OptimisticMutationTracker, PendingMutation};
use crate::types::{BoardLayout, ColumnId, Identity, Ticket, TicketId};

/// One optimistic change to one ticket, with what it replaced.
///
/// `prior` is `None` when the ticket did not exist locally; `applied` is
/// `None` when the change removed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticChange {
    pub ticket_id: TicketId,
    pub prior: Option<Ticket>,
    pub applied: Option<Ticket>,
    pub token: MutationToken,
}

pub struct BoardSyncContext {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    store: TicketStore,
    tracker: OptimisticMutationTracker,
    ranks: RankAllocator,
    identity: Identity,
    notifier: Arc<dyn Notifier>,
}

impl BoardSyncContext {
    /// A context on the system clock that keeps notices in a [`NoticeLog`].
    pub fn new(config: SyncConfig, identity: Identity) -> Self {
        Self {
            tracker: OptimisticMutationTracker::new(config.pending_window()),
            ranks: RankAllocator::from_config(&config.rank),
            config,
            clock: Arc::new(SystemClock),
            store: TicketStore::empty(),
            identity,
            notifier: Arc::new(NoticeLog::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Read access for rendering and queries.
    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    pub fn tracker(&self) -> &OptimisticMutationTracker {
        &self.tracker
    }

    pub fn ranks(&self) -> &RankAllocator {
        &self.ranks
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_pending(&self, ticket_id: &str) -> bool {
        self.tracker.is_pending(ticket_id, self.now())
    }

    pub fn ensure_can_move(&self) -> Result<()> {
        if self.identity.can_move_tickets {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied("move tickets".to_string()))
        }
    }

    pub fn ensure_can_edit(&self) -> Result<()> {
        if self.identity.can_edit_tickets {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied("edit tickets".to_string()))
        }
    }

    /// Apply a local change ahead of the server and mark it pending.
    ///
    /// `next = None` removes the ticket.
    pub fn apply_optimistic(&self, ticket_id: &TicketId, next: Option<Ticket>) -> OptimisticChange {
        let prior = self.store.get(ticket_id.as_str());
        let token = self.tracker.mark_pending(ticket_id, self.now());
        match &next {
            Some(ticket) => {
                self.store.upsert(ticket.clone());
            }
            None => {
                self.store.remove(ticket_id.as_str());
            }
        }
        OptimisticChange {
            ticket_id: ticket_id.clone(),
            prior,
            applied: next,
            token,
        }
    }

    /// Whether a confirmation for `change` may still write to the store:
    /// no newer local mutation of the ticket exists, settled or not.
    fn may_settle(&self, change: &OptimisticChange) -> bool {
        !self
            .tracker
            .is_superseded(change.ticket_id.as_str(), change.token)
    }

    /// Accept the server's answer for `change`. `confirmed = None` means the
    /// server confirmed a removal.
    ///
    /// Returns `false` when a newer local mutation owns the ticket, in which
    /// case the answer is discarded as stale.
    pub fn settle(&self, change: &OptimisticChange, confirmed: Option<Ticket>) -> bool {
        if !self.may_settle(change) {
            tracing::debug!(
                ticket = %change.ticket_id,
                "confirmation superseded by newer local change, discarding"
            );
            return false;
        }
        match confirmed {
            Some(ticket) => {
                self.store.upsert(ticket);
            }
            None => {
                self.store.remove(change.ticket_id.as_str());
            }
        }
        self.tracker.clear_if(change.ticket_id.as_str(), change.token);
        true
    }

    /// Restore what `change` replaced.
    ///
    /// Skipped when a newer local change exists for the ticket, or when the
    /// marker is gone and the ticket has since been changed by someone else.
    pub fn rollback(&self, change: &OptimisticChange) -> bool {
        let id = change.ticket_id.as_str();
        let owned = !self.tracker.is_superseded(id, change.token)
            && (self.tracker.is_current(id, change.token)
                || (!self.tracker.is_pending(id, self.now())
                    && self.store.get(id) == change.applied));
        if !owned {
            tracing::debug!(ticket = %change.ticket_id, "rollback skipped, ticket changed since");
            return false;
        }
        match &change.prior {
            Some(ticket) => {
                self.store.upsert(ticket.clone());
            }
            None => {
                self.store.remove(id);
            }
        }
        self.tracker.clear_if(id, change.token);
        true
    }

    /// Merge a ticket snapshot from outside (realtime event or listing).
    pub fn apply_remote(&self, ticket: Ticket) -> UpsertOutcome {
        self.store.upsert(ticket)
    }

    pub fn remove_remote(&self, ticket_id: &str) -> Option<Ticket> {
        self.store.remove(ticket_id)
    }

    /// Replace a board's structure. Columns the board no longer lists are
    /// removed together with their tickets. Ticket pending state is not
    /// touched.
    pub fn apply_board_layout(&self, layout: BoardLayout) {
        let board_id = layout.board.id.clone();
        let dropped: Vec<ColumnId> = self
            .store
            .board(board_id.as_str())
            .map(|previous| {
                previous
                    .columns
                    .into_iter()
                    .filter(|c| !layout.board.has_column(c))
                    .collect()
            })
            .unwrap_or_default();

        for column in layout.columns {
            self.store.upsert_column(column);
        }
        self.store.upsert_board(layout.board);
        for column in dropped {
            tracing::info!(board = %board_id, column = %column, "column removed from board");
            self.store.remove_column(column.as_str());
        }
    }

    /// Drop the marker for `ticket_id` if its window has elapsed. An active
    /// marker is kept.
    pub fn clear_stale_marker(&self, ticket_id: &str) -> bool {
        let now = self.now();
        match self.tracker.get(ticket_id) {
            Some(marker) if !marker.is_active(now) => {
                self.tracker.clear_if(ticket_id, marker.token)
            }
            _ => false,
        }
    }

    /// Surface a failed write to the user.
    pub fn notify_failure(&self, action: &str, error: &SyncError) {
        tracing::warn!(action, %error, "board write failed");
        let message = match error.as_network() {
            Some(failure) => format!("Could not {action}: {}", failure.message),
            None => format!("Could not {action}: {error}"),
        };
        self.notifier.notify(Notice::error(message));
    }

    /// Drop markers whose window has elapsed.
    pub fn expire_pending(&self) -> Vec<PendingMutation> {
        let expired = self.tracker.expire(self.now());
        for marker in &expired {
            tracing::debug!(ticket = %marker.entity_id, "pending marker expired unconfirmed");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::NetworkFailure;
    use crate::store::test_helpers::{make_board, make_ticket};

    fn context() -> (BoardSyncContext, Arc<ManualClock>, Arc<NoticeLog>) {
        let clock = Arc::new(ManualClock::at_millis(10_000));
        let notices = Arc::new(NoticeLog::new());
        let ctx = BoardSyncContext::new(SyncConfig::default(), Identity::member("me"))
            .with_clock(clock.clone())
            .with_notifier(notices.clone());
        (ctx, clock, notices)
    }

    #[test]
    fn test_apply_optimistic_marks_pending() {
        let (ctx, _, _) = context();
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));

        let change = ctx.apply_optimistic(
            &TicketId::from("t-1"),
            Some(make_ticket("t-1", "doing", "m")),
        );
        assert_eq!(change.prior.unwrap().column_id.as_str(), "todo");
        assert!(ctx.is_pending("t-1"));
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "doing");
    }

    #[test]
    fn test_settle_older_change_is_discarded() {
        let (ctx, _, _) = context();
        let id = TicketId::from("t-1");
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));
        let first = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "doing", "m")));
        let second = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "done", "m")));

        assert!(!ctx.settle(&first, Some(make_ticket("t-1", "doing", "m"))));
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "done");
        assert!(ctx.tracker().is_current("t-1", second.token));

        assert!(ctx.settle(&second, Some(make_ticket("t-1", "done", "m"))));
        assert!(!ctx.is_pending("t-1"));
    }

    #[test]
    fn test_settle_after_window_is_trusted() {
        let (ctx, clock, _) = context();
        let id = TicketId::from("t-1");
        let change = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "doing", "m")));
        clock.advance_millis(3_000);
        ctx.expire_pending();

        assert!(ctx.settle(&change, Some(make_ticket("t-1", "doing", "m"))));
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "doing");
    }

    #[test]
    fn test_late_older_confirmation_after_newer_settled() {
        let (ctx, _, _) = context();
        let id = TicketId::from("t-1");
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));
        let first = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "doing", "m")));
        let second = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "done", "m")));

        assert!(ctx.settle(&second, Some(make_ticket("t-1", "done", "m"))));
        assert!(ctx.tracker().is_empty());

        assert!(!ctx.settle(&first, Some(make_ticket("t-1", "doing", "m"))));
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "done");
    }

    #[test]
    fn test_late_older_rollback_after_newer_settled() {
        let (ctx, _, _) = context();
        let id = TicketId::from("t-1");
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));
        let first = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "doing", "m")));
        let second = ctx.apply_optimistic(&id, Some(make_ticket("t-1", "doing", "m")));
        assert!(ctx.settle(&second, Some(make_ticket("t-1", "doing", "m"))));

        // Same value as the older change applied, yet a newer one settled it.
        assert!(!ctx.rollback(&first));
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "doing");
    }

    #[test]
    fn test_rollback_restores_prior() {
        let (ctx, _, _) = context();
        let before = make_ticket("t-1", "todo", "m");
        ctx.apply_remote(before.clone());
        let change = ctx.apply_optimistic(&before.id, None);
        assert!(ctx.store().get("t-1").is_none());

        assert!(ctx.rollback(&change));
        assert_eq!(ctx.store().get("t-1"), Some(before));
        assert!(ctx.tracker().is_empty());
    }

    #[test]
    fn test_rollback_skipped_after_remote_change() {
        let (ctx, clock, _) = context();
        ctx.apply_remote(make_ticket("t-1", "todo", "m"));
        let change = ctx.apply_optimistic(
            &TicketId::from("t-1"),
            Some(make_ticket("t-1", "doing", "m")),
        );
        clock.advance_millis(5_000);
        ctx.expire_pending();
        ctx.apply_remote(make_ticket("t-1", "done", "q"));

        assert!(!ctx.rollback(&change));
        assert_eq!(ctx.store().get("t-1").unwrap().column_id.as_str(), "done");
    }

    #[test]
    fn test_board_layout_drops_removed_columns() {
        let (ctx, _, _) = context();
        let (board, columns) = make_board(&["todo", "doing", "done"]);
        ctx.apply_board_layout(BoardLayout { board, columns });
        ctx.apply_remote(make_ticket("t-1", "doing", "m"));

        let (board, columns) = make_board(&["todo", "done"]);
        ctx.apply_board_layout(BoardLayout { board, columns });
        assert!(ctx.store().column("doing").is_none());
        assert!(ctx.store().get("t-1").is_none());
        assert_eq!(ctx.store().columns_of_board("b-1").len(), 2);
    }

    #[test]
    fn test_permission_gate() {
        let ctx = BoardSyncContext::new(SyncConfig::default(), Identity::viewer("me"));
        assert!(matches!(
            ctx.ensure_can_move(),
            Err(SyncError::PermissionDenied(_))
        ));
        assert!(ctx.ensure_can_edit().is_err());
    }

    #[test]
    fn test_notify_failure_uses_failure_message() {
        let (ctx, _, notices) = context();
        let err = SyncError::Network(NetworkFailure::permission_denied("not a board member"));
        ctx.notify_failure("move ticket", &err);
        let errors = notices.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Could not move ticket: not a board member");
    }
}
