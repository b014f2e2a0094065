use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use super::types::{EventPayload, InboundEvent};
use crate::context::BoardSyncContext;
use crate::error::SyncError;
use crate::types::TicketId;

/// What the router did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Merged into the store.
    Applied,
    /// Board structure merged; ticket pending state untouched.
    StructureApplied,
    /// Authored by the local client.
    DroppedSelfEcho,
    /// Older than the local change still in flight, or than the stored ticket.
    DroppedStale,
    /// Held until the local change for the same ticket settles or expires.
    Deferred,
}

enum_display!(RouteOutcome, {
    Applied => "applied",
    StructureApplied => "structure-applied",
    DroppedSelfEcho => "dropped-self-echo",
    DroppedStale => "dropped-stale",
    Deferred => "deferred",
});

/// Gatekeeper between the realtime channel and the store.
///
/// Events never write to the store directly; each passes three checks in
/// order: self-echo, pending local change, merge.
pub struct SocketEventRouter {
    ctx: Arc<BoardSyncContext>,
    deferred: Mutex<HashMap<TicketId, InboundEvent>>,
}

impl SocketEventRouter {
    pub fn new(ctx: Arc<BoardSyncContext>) -> Self {
        Self {
            ctx,
            deferred: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<BoardSyncContext> {
        &self.ctx
    }

    /// Route one decoded event.
    pub fn route(&self, event: InboundEvent) -> RouteOutcome {
        if event.author_id == self.ctx.identity().client_id {
            tracing::debug!(kind = %event.kind(), "dropping self-echo");
            return RouteOutcome::DroppedSelfEcho;
        }

        let Some(ticket_id) = event.entity_id().cloned() else {
            self.apply(event);
            return RouteOutcome::StructureApplied;
        };

        let now = self.ctx.now();
        if let Some(marker) = self.ctx.tracker().get(ticket_id.as_str()) {
            if marker.is_active(now) {
                if event.timestamp < marker.submitted_at {
                    let stale = SyncError::ConflictStale(ticket_id.to_string());
                    tracing::debug!(
                        error = %stale,
                        event_at = %event.timestamp,
                        submitted_at = %marker.submitted_at,
                        "discarding event older than local change"
                    );
                    return RouteOutcome::DroppedStale;
                }
                self.defer(ticket_id, event);
                return RouteOutcome::Deferred;
            }
            // Window elapsed: the event is authoritative.
            self.ctx.clear_stale_marker(ticket_id.as_str());
        }

        {
            let mut deferred = self.deferred.lock();
            if deferred
                .get(&ticket_id)
                .is_some_and(|held| held.timestamp <= event.timestamp)
            {
                deferred.remove(&ticket_id);
            }
        }
        self.apply(event);
        RouteOutcome::Applied
    }

    /// Decode and route one JSON frame. Malformed frames are logged and
    /// skipped.
    pub fn route_frame(&self, frame: &str) -> Option<RouteOutcome> {
        match InboundEvent::from_json(frame) {
            Ok(event) => Some(self.route(event)),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed realtime frame");
                None
            }
        }
    }

    /// Apply held events whose ticket is no longer pending, oldest first.
    ///
    /// An event is dropped instead when the stored ticket was updated at or
    /// after the instant it was emitted; a held event always arrived before
    /// the confirmation that settled its ticket.
    pub fn replay_deferred(&self) -> Vec<(TicketId, RouteOutcome)> {
        let now = self.ctx.now();
        let mut ready: Vec<InboundEvent> = {
            let mut deferred = self.deferred.lock();
            let ids: Vec<TicketId> = deferred
                .keys()
                .filter(|id| !self.ctx.tracker().is_pending(id.as_str(), now))
                .cloned()
                .collect();
            ids.iter().filter_map(|id| deferred.remove(id)).collect()
        };
        ready.sort_by_key(|e| e.timestamp);

        ready
            .into_iter()
            .filter_map(|event| {
                let ticket_id = event.entity_id()?.clone();
                let outcome = if self.is_outdated(&ticket_id, event.timestamp) {
                    tracing::debug!(ticket = %ticket_id, "deferred event outdated, dropping");
                    RouteOutcome::DroppedStale
                } else {
                    self.ctx.clear_stale_marker(ticket_id.as_str());
                    self.apply(event);
                    RouteOutcome::Applied
                };
                Some((ticket_id, outcome))
            })
            .collect()
    }

    /// Number of events currently held.
    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Route JSON frames until the channel closes.
    pub async fn run(&self, mut frames: mpsc::Receiver<String>) {
        while let Some(frame) = frames.recv().await {
            self.route_frame(&frame);
        }
        tracing::debug!("realtime frame channel closed");
    }

    /// Route decoded events from a broadcast feed until it closes.
    pub async fn run_events(&self, mut events: broadcast::Receiver<InboundEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.route(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "realtime feed lagged, events lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("realtime event feed closed");
    }

    fn defer(&self, ticket_id: TicketId, event: InboundEvent) {
        let mut deferred = self.deferred.lock();
        if deferred
            .get(&ticket_id)
            .is_some_and(|held| held.timestamp > event.timestamp)
        {
            tracing::debug!(ticket = %ticket_id, "newer event already held");
            return;
        }
        tracing::debug!(ticket = %ticket_id, kind = %event.kind(), "deferring event for pending ticket");
        deferred.insert(ticket_id, event);
    }

    fn is_outdated(&self, ticket_id: &TicketId, emitted_at: Timestamp) -> bool {
        self.ctx
            .store()
            .get(ticket_id.as_str())
            .is_some_and(|stored| stored.updated_at >= emitted_at)
    }

    fn apply(&self, event: InboundEvent) {
        match event.payload {
            EventPayload::Created(ticket) | EventPayload::Updated(ticket) => {
                self.ctx.apply_remote(ticket);
            }
            EventPayload::Deleted(deleted) => {
                self.ctx.remove_remote(deleted.id.as_str());
            }
            EventPayload::BoardStructureChanged(layout) => {
                self.ctx.apply_board_layout(layout);
            }
        }
    }
}
