//! Realtime change feed types.
//!
//! Frames arrive as JSON objects `{kind, entity, authorId, timestamp}`.
//! They never mutate state directly; the
//! [`SocketEventRouter`](super::SocketEventRouter) decides what happens
//! to each one.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{BoardId, BoardLayout, ClientId, ColumnId, Ticket, TicketId};

/// The kind of change a frame reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    BoardStructureChanged,
}

enum_display_fromstr!(
    EventKind,
    SyncError::invalid_event_kind,
    {
        Created => "created",
        Updated => "updated",
        Deleted => "deleted",
        BoardStructureChanged => "board-structure-changed",
    }
);

/// Entity carried by a `deleted` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTicket {
    pub id: TicketId,
    pub board_id: BoardId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<ColumnId>,
}

/// Typed entity snapshot of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Created(Ticket),
    Updated(Ticket),
    Deleted(DeletedTicket),
    BoardStructureChanged(BoardLayout),
}

/// One change reported by the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub payload: EventPayload,
    pub author_id: ClientId,
    pub timestamp: Timestamp,
}

/// Frame layout on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    kind: EventKind,
    entity: serde_json::Value,
    author_id: ClientId,
    timestamp: Timestamp,
}

impl InboundEvent {
    pub fn new(payload: EventPayload, author_id: ClientId, timestamp: Timestamp) -> Self {
        Self {
            payload,
            author_id,
            timestamp,
        }
    }

    pub fn created(ticket: Ticket, author_id: ClientId, timestamp: Timestamp) -> Self {
        Self::new(EventPayload::Created(ticket), author_id, timestamp)
    }

    pub fn updated(ticket: Ticket, author_id: ClientId, timestamp: Timestamp) -> Self {
        Self::new(EventPayload::Updated(ticket), author_id, timestamp)
    }

    pub fn deleted(ticket: &Ticket, author_id: ClientId, timestamp: Timestamp) -> Self {
        Self::new(
            EventPayload::Deleted(DeletedTicket {
                id: ticket.id.clone(),
                board_id: ticket.board_id.clone(),
                column_id: Some(ticket.column_id.clone()),
            }),
            author_id,
            timestamp,
        )
    }

    pub fn board_changed(layout: BoardLayout, author_id: ClientId, timestamp: Timestamp) -> Self {
        Self::new(
            EventPayload::BoardStructureChanged(layout),
            author_id,
            timestamp,
        )
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Created(_) => EventKind::Created,
            EventPayload::Updated(_) => EventKind::Updated,
            EventPayload::Deleted(_) => EventKind::Deleted,
            EventPayload::BoardStructureChanged(_) => EventKind::BoardStructureChanged,
        }
    }

    /// The ticket this frame is about; `None` for board-structure frames.
    pub fn entity_id(&self) -> Option<&TicketId> {
        match &self.payload {
            EventPayload::Created(t) | EventPayload::Updated(t) => Some(&t.id),
            EventPayload::Deleted(d) => Some(&d.id),
            EventPayload::BoardStructureChanged(_) => None,
        }
    }

    /// Decode a JSON frame.
    pub fn from_json(frame: &str) -> Result<Self> {
        let wire: WireFrame =
            serde_json::from_str(frame).map_err(|e| SyncError::MalformedFrame(e.to_string()))?;
        let malformed = |e: serde_json::Error| {
            SyncError::MalformedFrame(format!("bad {} entity: {e}", wire.kind))
        };

        let payload = match wire.kind {
            EventKind::Created => {
                EventPayload::Created(serde_json::from_value(wire.entity.clone()).map_err(malformed)?)
            }
            EventKind::Updated => {
                EventPayload::Updated(serde_json::from_value(wire.entity.clone()).map_err(malformed)?)
            }
            EventKind::Deleted => {
                EventPayload::Deleted(serde_json::from_value(wire.entity.clone()).map_err(malformed)?)
            }
            EventKind::BoardStructureChanged => EventPayload::BoardStructureChanged(
                serde_json::from_value(wire.entity.clone()).map_err(malformed)?,
            ),
        };

        Ok(Self {
            payload,
            author_id: wire.author_id,
            timestamp: wire.timestamp,
        })
    }

    /// Encode as a JSON frame.
    pub fn to_json(&self) -> Result<String> {
        let entity = match &self.payload {
            EventPayload::Created(t) | EventPayload::Updated(t) => serde_json::to_value(t)?,
            EventPayload::Deleted(d) => serde_json::to_value(d)?,
            EventPayload::BoardStructureChanged(l) => serde_json::to_value(l)?,
        };
        let wire = WireFrame {
            kind: self.kind(),
            entity,
            author_id: self.author_id.clone(),
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_string(&wire)?)
    }
}
