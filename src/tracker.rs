//! Per-entity record of optimistic changes still in flight.
//!
//! A marker is created the instant an optimistic change is applied to the
//! store and is trusted over competing signals (REST responses for older
//! mutations, realtime events) until it is cleared or its window elapses.
//! After that, external signals are trusted unconditionally so a dropped
//! confirmation can never leave an entity desynchronized. The one
//! exception is an answer for an older local mutation: once a newer one has
//! been issued for the same entity, the older answer is never applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use jiff::{SignedDuration, Timestamp};
use tokio::task::JoinHandle;

use crate::types::TicketId;

/// Identifies the mutation that created a marker.
///
/// Tokens increase monotonically, so a later `mark_pending` for the same
/// entity always carries a larger token than the one it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub entity_id: TicketId,
    pub submitted_at: Timestamp,
    pub expires_at: Timestamp,
    pub token: MutationToken,
}

impl PendingMutation {
    /// True while `now - submitted_at` is inside the window.
    pub fn is_active(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

pub struct OptimisticMutationTracker {
    window: SignedDuration,
    pending: DashMap<TicketId, PendingMutation>,
    /// Newest token issued per entity. Outlives the marker, so answers for
    /// older mutations stay recognisable after the newest one settles.
    newest: DashMap<TicketId, MutationToken>,
    next_token: AtomicU64,
}

impl OptimisticMutationTracker {
    pub fn new(window: SignedDuration) -> Self {
        Self {
            window,
            pending: DashMap::new(),
            newest: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn window(&self) -> SignedDuration {
        self.window
    }

    /// Record a local change for `entity_id`, replacing any earlier marker.
    pub fn mark_pending(&self, entity_id: &TicketId, now: Timestamp) -> MutationToken {
        let token = MutationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let marker = PendingMutation {
            entity_id: entity_id.clone(),
            submitted_at: now,
            expires_at: now + self.window,
            token,
        };
        self.newest
            .entry(entity_id.clone())
            .and_modify(|t| *t = (*t).max(token))
            .or_insert(token);
        if let Some(previous) = self.pending.insert(entity_id.clone(), marker) {
            tracing::debug!(
                entity = %entity_id,
                replaced = previous.token.0,
                "pending marker superseded by newer mutation"
            );
        }
        token
    }

    /// Whether a local change for `entity_id` is unconfirmed and still trusted.
    pub fn is_pending(&self, entity_id: &str, now: Timestamp) -> bool {
        self.pending
            .get(entity_id)
            .is_some_and(|m| m.is_active(now))
    }

    /// The marker for `entity_id`, active or not.
    pub fn get(&self, entity_id: &str) -> Option<PendingMutation> {
        self.pending.get(entity_id).map(|m| m.clone())
    }

    /// Whether the marker for `entity_id` is still the one `token` created.
    pub fn is_current(&self, entity_id: &str, token: MutationToken) -> bool {
        self.pending
            .get(entity_id)
            .is_some_and(|m| m.token == token)
    }

    /// Whether a newer mutation than `token` has been issued for `entity_id`,
    /// settled or not.
    pub fn is_superseded(&self, entity_id: &str, token: MutationToken) -> bool {
        self.newest.get(entity_id).is_some_and(|t| *t > token)
    }

    /// Drop the marker for `entity_id` regardless of who created it.
    pub fn clear(&self, entity_id: &str) -> Option<PendingMutation> {
        self.pending.remove(entity_id).map(|(_, m)| m)
    }

    /// Drop the marker only if `token` created it. A newer mutation's
    /// marker is left alone.
    pub fn clear_if(&self, entity_id: &str, token: MutationToken) -> bool {
        self.pending
            .remove_if(entity_id, |_, m| m.token == token)
            .is_some()
    }

    /// Remove and return every marker whose window has elapsed.
    pub fn expire(&self, now: Timestamp) -> Vec<PendingMutation> {
        let expired: Vec<TicketId> = self
            .pending
            .iter()
            .filter(|m| !m.is_active(now))
            .map(|m| m.entity_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                self.pending
                    .remove_if(&id, |_, m| !m.is_active(now))
                    .map(|(_, m)| m)
            })
            .collect()
    }

    /// Ids with an active marker.
    pub fn pending_ids(&self, now: Timestamp) -> Vec<TicketId> {
        let mut ids: Vec<TicketId> = self
            .pending
            .iter()
            .filter(|m| m.is_active(now))
            .map(|m| m.entity_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of markers held, expired ones not yet swept included.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Owned periodic task that sweeps expired markers.
///
/// One sweeper serves every marker. Expiry is also checked on read, so the
/// interval only bounds how long expired markers linger.
///
/// The task stops when the sweeper is cancelled or dropped, so its lifetime
/// is tied to whoever owns it rather than to the runtime.
pub struct ExpirySweeper {
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Run `on_tick` every `interval` on the current tokio runtime.
    pub fn spawn<F>(interval: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                on_tick();
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
