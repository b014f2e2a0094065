use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::types::{Board, BoardId, Column, ColumnId, Ticket, TicketId};

pub mod queries;

/// Capacity of the change broadcast channel. Slow subscribers lag and
/// re-read the store rather than blocking writers.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification sent to the rendering layer after the store changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Tickets in these columns were inserted, moved, updated or removed.
    TicketsChanged { columns: Vec<ColumnId> },
    /// A board's column list (or one of its columns) changed.
    BoardChanged { board: BoardId },
}

/// What an `upsert` did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated { previous_column: ColumnId },
    /// The stored snapshot was already identical.
    Unchanged,
}

/// In-memory store for tickets, columns and boards.
///
/// The store is the single mutation gateway: optimistic applies, REST
/// confirmations and accepted realtime events all go through `upsert` and
/// `remove`. A ticket is keyed by id and carries exactly one `column_id`,
/// so an upsert that changes the column implicitly takes the ticket out of
/// its former column's derived view.
pub struct TicketStore {
    tickets: DashMap<TicketId, Ticket>,
    columns: DashMap<ColumnId, Column>,
    boards: DashMap<BoardId, Board>,
    changes: broadcast::Sender<StoreEvent>,
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl TicketStore {
    /// Create an empty store.
    pub fn empty() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        TicketStore {
            tickets: DashMap::new(),
            columns: DashMap::new(),
            boards: DashMap::new(),
            changes,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.changes.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }

    /// Get a copy of a ticket.
    pub fn get(&self, id: &str) -> Option<Ticket> {
        self.tickets.get(id).map(|t| t.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tickets.contains_key(id)
    }

    /// Insert or replace a ticket.
    pub fn upsert(&self, ticket: Ticket) -> UpsertOutcome {
        let column = ticket.column_id.clone();
        let previous = self.tickets.insert(ticket.id.clone(), ticket.clone());

        let outcome = match previous {
            None => UpsertOutcome::Inserted,
            Some(prev) if prev == ticket => UpsertOutcome::Unchanged,
            Some(prev) => UpsertOutcome::Updated {
                previous_column: prev.column_id,
            },
        };

        match &outcome {
            UpsertOutcome::Unchanged => {}
            UpsertOutcome::Inserted => self.publish(StoreEvent::TicketsChanged {
                columns: vec![column],
            }),
            UpsertOutcome::Updated { previous_column } => {
                let mut columns = vec![column];
                if *previous_column != columns[0] {
                    columns.push(previous_column.clone());
                }
                self.publish(StoreEvent::TicketsChanged { columns });
            }
        }
        outcome
    }

    /// Remove a ticket, returning what was stored.
    pub fn remove(&self, id: &str) -> Option<Ticket> {
        let (_, removed) = self.tickets.remove(id)?;
        self.publish(StoreEvent::TicketsChanged {
            columns: vec![removed.column_id.clone()],
        });
        Some(removed)
    }

    /// Get a copy of a board.
    pub fn board(&self, id: &str) -> Option<Board> {
        self.boards.get(id).map(|b| b.clone())
    }

    /// Get a copy of a column.
    pub fn column(&self, id: &str) -> Option<Column> {
        self.columns.get(id).map(|c| c.clone())
    }

    /// Insert or replace a board and its column order.
    pub fn upsert_board(&self, board: Board) {
        let id = board.id.clone();
        let previous = self.boards.insert(id.clone(), board.clone());
        if previous.as_ref() != Some(&board) {
            self.publish(StoreEvent::BoardChanged { board: id });
        }
    }

    /// Insert or replace a column.
    pub fn upsert_column(&self, column: Column) {
        let board = column.board_id.clone();
        let previous = self.columns.insert(column.id.clone(), column.clone());
        if previous.as_ref() != Some(&column) {
            self.publish(StoreEvent::BoardChanged { board });
        }
    }

    /// Remove a column and every ticket that lives in it.
    pub fn remove_column(&self, id: &str) -> Option<Column> {
        let (_, column) = self.columns.remove(id)?;
        let orphaned: Vec<TicketId> = self
            .tickets
            .iter()
            .filter(|t| t.column_id.as_str() == id)
            .map(|t| t.id.clone())
            .collect();
        for ticket_id in &orphaned {
            self.tickets.remove(ticket_id);
        }
        if !orphaned.is_empty() {
            self.publish(StoreEvent::TicketsChanged {
                columns: vec![column.id.clone()],
            });
        }
        self.publish(StoreEvent::BoardChanged {
            board: column.board_id.clone(),
        });
        Some(column)
    }

    /// Remove a board along with its columns and tickets.
    pub fn remove_board(&self, id: &str) -> Option<Board> {
        let (_, board) = self.boards.remove(id)?;
        self.columns.retain(|_, c| c.board_id.as_str() != id);
        self.tickets.retain(|_, t| t.board_id.as_str() != id);
        self.publish(StoreEvent::BoardChanged {
            board: board.id.clone(),
        });
        Some(board)
    }

    /// Number of tickets in the store, archived ones included.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub(crate) fn tickets(&self) -> &DashMap<TicketId, Ticket> {
        &self.tickets
    }

    pub(crate) fn columns(&self) -> &DashMap<ColumnId, Column> {
        &self.columns
    }
}
