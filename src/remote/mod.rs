//! REST operations the engine consumes.
//!
//! [`BoardApi`] is the seam between the reconciliation engine and whatever
//! talks to the server. [`http::HttpBoardApi`] speaks JSON over HTTP;
//! [`memory::InMemoryServer`] is an authoritative in-process server used by
//! tests and scenario replay.

pub mod error;
pub mod http;
pub mod memory;

use std::future::Future;

use crate::error::Result;
use crate::types::{
    BoardId, BoardLayout, ColumnId, NewTicket, RankUpdate, Ticket, TicketId, TicketPatch,
};

pub use error::ApiError;
pub use http::HttpBoardApi;
pub use memory::{ApiCall, ApiOp, InMemoryBoardApi, InMemoryServer};

/// Common interface for the board REST API.
///
/// Every method either returns the server's authoritative snapshot or a
/// [`SyncError::Network`](crate::error::SyncError::Network) describing why
/// it could not.
pub trait BoardApi: Send + Sync {
    /// Reassign a ticket's column. Does not imply a rank.
    fn move_ticket(
        &self,
        ticket_id: &TicketId,
        target_column: &ColumnId,
    ) -> impl Future<Output = Result<Ticket>> + Send;

    /// Persist ranks for one or more tickets of a board.
    fn bulk_update_ranks(
        &self,
        board_id: &BoardId,
        updates: &[RankUpdate],
    ) -> impl Future<Output = Result<Vec<Ticket>>> + Send;

    /// Apply a partial field update.
    fn update_ticket(
        &self,
        ticket_id: &TicketId,
        patch: &TicketPatch,
    ) -> impl Future<Output = Result<Ticket>> + Send;

    fn create_ticket(&self, ticket: &NewTicket) -> impl Future<Output = Result<Ticket>> + Send;

    fn delete_ticket(&self, ticket_id: &TicketId) -> impl Future<Output = Result<()>> + Send;

    /// Active tickets of a board.
    fn list_tickets_by_board(
        &self,
        board_id: &BoardId,
    ) -> impl Future<Output = Result<Vec<Ticket>>> + Send;

    /// Archived tickets of a board.
    fn list_archived_tickets_by_board(
        &self,
        board_id: &BoardId,
    ) -> impl Future<Output = Result<Vec<Ticket>>> + Send;

    /// A board and its columns.
    fn get_board(&self, board_id: &BoardId) -> impl Future<Output = Result<BoardLayout>> + Send;
}
