use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

string_id!(
    /// Stable identity of a ticket.
    TicketId
);
string_id!(
    /// Identity of a column on a board.
    ColumnId
);
string_id!(
    /// Identity of a board.
    BoardId
);
string_id!(
    /// Identity of a connected client (or of the user behind it).
    ClientId
);

/// Opaque position key ordering tickets within a column.
///
/// Only string comparison is meaningful; no component other than the
/// [`RankAllocator`](crate::rank::RankAllocator) looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(String);

impl Rank {
    pub fn new(rank: impl Into<String>) -> Self {
        Self(rank.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Rank {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TicketType {
    #[default]
    Task,
    Bug,
    Story,
    Epic,
    Subtask,
}

enum_display_fromstr!(
    TicketType,
    SyncError::invalid_ticket_type,
    {
        Task => "task",
        Bug => "bug",
        Story => "story",
        Epic => "epic",
        Subtask => "subtask",
    }
);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Lowest,
    Low,
    #[default]
    Medium,
    High,
    Highest,
}

enum_display_fromstr!(
    TicketPriority,
    SyncError::invalid_priority,
    {
        Lowest => "lowest",
        Low => "low",
        Medium => "medium",
        High => "high",
        Highest => "highest",
    }
);

/// A unit of work on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: TicketId,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    pub rank: Rank,
    pub title: String,
    #[serde(default, rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<ClientId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<Timestamp>,
}

impl Ticket {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Apply a partial field update in place, leaving column and rank alone.
    pub fn apply_patch(&mut self, patch: &TicketPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(ticket_type) = patch.ticket_type {
            self.ticket_type = ticket_type;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(assignee) = &patch.assignee_id {
            self.assignee_id = assignee.clone();
        }
        if let Some(archived_at) = patch.archived_at {
            self.archived_at = archived_at;
        }
    }
}

/// A named bucket on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub title: String,
}

/// A board and the display order of its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub columns: Vec<ColumnId>,
}

impl Board {
    pub fn has_column(&self, column_id: &ColumnId) -> bool {
        self.columns.contains(column_id)
    }

    /// Display position of a column among its siblings.
    pub fn column_order(&self, column_id: &ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c == column_id)
    }
}

/// A board together with its columns, as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardLayout {
    pub board: Board,
    pub columns: Vec<Column>,
}

/// Partial field update for a ticket. `None` leaves a field untouched;
/// the nested options on nullable fields distinguish "clear" from "keep".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<TicketType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TicketPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<ClientId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<Option<Timestamp>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.ticket_type.is_none()
            && self.priority.is_none()
            && self.assignee_id.is_none()
            && self.archived_at.is_none()
    }
}

/// Fields supplied when creating a ticket. The server assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    pub board_id: BoardId,
    pub column_id: ColumnId,
    pub title: String,
    #[serde(default, rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<Rank>,
}

/// One `{id, rank}` entry of a bulk rank update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankUpdate {
    pub id: TicketId,
    pub rank: Rank,
}

/// A completed drag gesture, produced once per drop.
///
/// `target_index` is the final position of the dragged ticket in the target
/// column once the ticket itself is no longer counted in that column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveIntent {
    pub ticket_id: TicketId,
    pub source_column: ColumnId,
    pub source_index: usize,
    pub target_column: ColumnId,
    pub target_index: usize,
}

impl MoveIntent {
    pub fn changes_column(&self) -> bool {
        self.source_column != self.target_column
    }
}

/// The local user as seen by the permission provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: ClientId,
    pub can_move_tickets: bool,
    pub can_edit_tickets: bool,
}

impl Identity {
    /// An identity allowed to do everything.
    pub fn member(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            can_move_tickets: true,
            can_edit_tickets: true,
        }
    }

    /// An identity that may look but not touch.
    pub fn viewer(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            can_move_tickets: false,
            can_edit_tickets: false,
        }
    }
}
