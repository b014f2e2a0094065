//! Derived, read-only views over the store.

use std::collections::HashSet;

use super::TicketStore;
use crate::types::{Column, Ticket, TicketId};

/// A ticket that breaks the one-column-per-board invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub ticket_id: TicketId,
    pub reason: String,
}

fn by_rank(a: &Ticket, b: &Ticket) -> std::cmp::Ordering {
    a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id))
}

impl TicketStore {
    /// Active tickets in a column, in display order.
    ///
    /// Equal ranks (possible for at most one round trip) are broken by id
    /// so the order is always total.
    pub fn tickets_in_column(&self, column_id: &str) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets()
            .iter()
            .filter(|t| t.column_id.as_str() == column_id && !t.is_archived())
            .map(|t| t.clone())
            .collect();
        tickets.sort_by(by_rank);
        tickets
    }

    /// Display index of a ticket within its column.
    pub fn index_in_column(&self, ticket_id: &str) -> Option<usize> {
        let ticket = self.get(ticket_id)?;
        self.tickets_in_column(ticket.column_id.as_str())
            .iter()
            .position(|t| t.id == ticket.id)
    }

    /// Every ticket on a board, archived ones included.
    pub fn tickets_in_board(&self, board_id: &str) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets()
            .iter()
            .filter(|t| t.board_id.as_str() == board_id)
            .map(|t| t.clone())
            .collect();
        tickets.sort_by(|a, b| a.id.cmp(&b.id));
        tickets
    }

    /// Archived tickets on a board, most recently archived first.
    pub fn archived_in_board(&self, board_id: &str) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets()
            .iter()
            .filter(|t| t.board_id.as_str() == board_id && t.is_archived())
            .map(|t| t.clone())
            .collect();
        tickets.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        tickets
    }

    /// A board's columns in display order. Columns the board lists but the
    /// store does not know are skipped.
    pub fn columns_of_board(&self, board_id: &str) -> Vec<Column> {
        let Some(board) = self.board(board_id) else {
            return Vec::new();
        };
        board
            .columns
            .iter()
            .filter_map(|id| self.columns().get(id.as_str()).map(|c| c.clone()))
            .collect()
    }

    /// Ranks shared by more than one active ticket in a column.
    pub fn duplicate_ranks(&self, column_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for ticket in self.tickets_in_column(column_id) {
            let rank = ticket.rank.as_str().to_string();
            if !seen.insert(rank.clone()) && !duplicates.contains(&rank) {
                duplicates.push(rank);
            }
        }
        duplicates
    }

    /// Tickets on a board whose column is not one of the board's columns.
    pub fn violations(&self, board_id: &str) -> Vec<Violation> {
        let Some(board) = self.board(board_id) else {
            return Vec::new();
        };
        self.tickets_in_board(board_id)
            .into_iter()
            .filter(|t| !board.has_column(&t.column_id))
            .map(|t| Violation {
                reason: format!(
                    "column '{}' is not on board '{}'",
                    t.column_id, board.id
                ),
                ticket_id: t.id,
            })
            .collect()
    }
}
