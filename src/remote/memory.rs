//! In-process authoritative board server.
//!
//! [`InMemoryServer`] owns the canonical board state, records every call it
//! receives and broadcasts a realtime event for every write (echoes of the
//! caller's own writes included). Each connected client talks to it through
//! an [`InMemoryBoardApi`] carrying that client's identity.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;

use super::BoardApi;
use crate::clock::Clock;
use crate::error::{NetworkFailure, Result, SyncError};
use crate::events::InboundEvent;
use crate::types::{
    BoardId, BoardLayout, ClientId, ColumnId, NewTicket, Rank, RankUpdate, Ticket, TicketId,
    TicketPatch,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The REST operations, for failure injection and call filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiOp {
    MoveTicket,
    BulkUpdateRanks,
    UpdateTicket,
    CreateTicket,
    DeleteTicket,
    ListTickets,
    ListArchivedTickets,
    GetBoard,
}

enum_display!(ApiOp, {
    MoveTicket => "moveTicket",
    BulkUpdateRanks => "bulkUpdateRanks",
    UpdateTicket => "updateTicket",
    CreateTicket => "createTicket",
    DeleteTicket => "deleteTicket",
    ListTickets => "listTicketsByBoard",
    ListArchivedTickets => "listArchivedTicketsByBoard",
    GetBoard => "getBoard",
});

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    MoveTicket {
        ticket_id: TicketId,
        column_id: ColumnId,
    },
    BulkUpdateRanks {
        board_id: BoardId,
        updates: Vec<RankUpdate>,
    },
    UpdateTicket {
        ticket_id: TicketId,
        patch: TicketPatch,
    },
    CreateTicket {
        title: String,
    },
    DeleteTicket {
        ticket_id: TicketId,
    },
    ListTickets {
        board_id: BoardId,
    },
    ListArchivedTickets {
        board_id: BoardId,
    },
    GetBoard {
        board_id: BoardId,
    },
}

impl ApiCall {
    pub fn op(&self) -> ApiOp {
        match self {
            ApiCall::MoveTicket { .. } => ApiOp::MoveTicket,
            ApiCall::BulkUpdateRanks { .. } => ApiOp::BulkUpdateRanks,
            ApiCall::UpdateTicket { .. } => ApiOp::UpdateTicket,
            ApiCall::CreateTicket { .. } => ApiOp::CreateTicket,
            ApiCall::DeleteTicket { .. } => ApiOp::DeleteTicket,
            ApiCall::ListTickets { .. } => ApiOp::ListTickets,
            ApiCall::ListArchivedTickets { .. } => ApiOp::ListArchivedTickets,
            ApiCall::GetBoard { .. } => ApiOp::GetBoard,
        }
    }
}

#[derive(Default)]
struct ServerState {
    boards: HashMap<BoardId, BoardLayout>,
    tickets: HashMap<TicketId, Ticket>,
    calls: Vec<ApiCall>,
    failures: VecDeque<(ApiOp, NetworkFailure)>,
    next_ticket: u64,
}

pub struct InMemoryServer {
    state: Mutex<ServerState>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<InboundEvent>,
}

impl InMemoryServer {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            clock,
            events,
        })
    }

    /// A client handle acting as `author`.
    pub fn client(self: &Arc<Self>, author: impl Into<ClientId>) -> InMemoryBoardApi {
        InMemoryBoardApi {
            server: Arc::clone(self),
            author: author.into(),
        }
    }

    /// Install a board without recording a call or emitting an event.
    pub fn seed_board(&self, layout: BoardLayout) {
        self.state.lock().boards.insert(layout.board.id.clone(), layout);
    }

    /// Install a ticket without recording a call or emitting an event.
    pub fn seed_ticket(&self, ticket: Ticket) {
        self.state.lock().tickets.insert(ticket.id.clone(), ticket);
    }

    /// Make the next call of `op` fail with `failure`.
    pub fn fail_next(&self, op: ApiOp, failure: NetworkFailure) {
        self.state.lock().failures.push_back((op, failure));
    }

    /// Realtime events for every write, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_of(&self, op: ApiOp) -> Vec<ApiCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn ticket(&self, id: &str) -> Option<Ticket> {
        self.state.lock().tickets.get(id).cloned()
    }

    fn begin(&self, call: ApiCall) -> Result<()> {
        let mut state = self.state.lock();
        let op = call.op();
        state.calls.push(call);
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, failure)) = state.failures.remove(pos) {
                return Err(SyncError::Network(failure));
            }
        }
        Ok(())
    }

    fn emit(&self, event: InboundEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn move_ticket(&self, author: &ClientId, id: &TicketId, column: &ColumnId) -> Result<Ticket> {
        self.begin(ApiCall::MoveTicket {
            ticket_id: id.clone(),
            column_id: column.clone(),
        })?;
        let now = self.clock.now();
        let ticket = {
            let mut state = self.state.lock();
            let board_id = state
                .tickets
                .get(id.as_str())
                .map(|t| t.board_id.clone())
                .ok_or_else(|| SyncError::Network(NetworkFailure::rejected(format!("no ticket {id}"))))?;
            let column_known = state
                .boards
                .get(board_id.as_str())
                .is_none_or(|layout| layout.board.has_column(column));
            if !column_known {
                return Err(SyncError::Network(NetworkFailure::rejected(format!(
                    "no column {column} on board {board_id}"
                ))));
            }
            let ticket = state
                .tickets
                .get_mut(id.as_str())
                .ok_or_else(|| SyncError::TicketNotFound(id.to_string()))?;
            ticket.column_id = column.clone();
            ticket.updated_at = now;
            ticket.clone()
        };
        self.emit(InboundEvent::updated(ticket.clone(), author.clone(), now));
        Ok(ticket)
    }

    fn bulk_update_ranks(
        &self,
        author: &ClientId,
        board_id: &BoardId,
        updates: &[RankUpdate],
    ) -> Result<Vec<Ticket>> {
        self.begin(ApiCall::BulkUpdateRanks {
            board_id: board_id.clone(),
            updates: updates.to_vec(),
        })?;
        let now = self.clock.now();
        let updated: Vec<Ticket> = {
            let mut state = self.state.lock();
            if let Some(missing) = updates.iter().find(|u| !state.tickets.contains_key(&u.id)) {
                return Err(SyncError::Network(NetworkFailure::rejected(format!(
                    "no ticket {}",
                    missing.id
                ))));
            }
            updates
                .iter()
                .filter_map(|u| {
                    let ticket = state.tickets.get_mut(&u.id)?;
                    ticket.rank = u.rank.clone();
                    ticket.updated_at = now;
                    Some(ticket.clone())
                })
                .collect()
        };
        for ticket in &updated {
            self.emit(InboundEvent::updated(ticket.clone(), author.clone(), now));
        }
        Ok(updated)
    }

    fn update_ticket(&self, author: &ClientId, id: &TicketId, patch: &TicketPatch) -> Result<Ticket> {
        self.begin(ApiCall::UpdateTicket {
            ticket_id: id.clone(),
            patch: patch.clone(),
        })?;
        let now = self.clock.now();
        let ticket = {
            let mut state = self.state.lock();
            let ticket = state.tickets.get_mut(id.as_str()).ok_or_else(|| {
                SyncError::Network(NetworkFailure::rejected(format!("no ticket {id}")))
            })?;
            ticket.apply_patch(patch);
            ticket.updated_at = now;
            ticket.clone()
        };
        self.emit(InboundEvent::updated(ticket.clone(), author.clone(), now));
        Ok(ticket)
    }

    fn create_ticket(&self, author: &ClientId, new: &NewTicket) -> Result<Ticket> {
        self.begin(ApiCall::CreateTicket {
            title: new.title.clone(),
        })?;
        let now = self.clock.now();
        let ticket = {
            let mut state = self.state.lock();
            state.next_ticket += 1;
            let id = TicketId::new(format!("srv-{}", state.next_ticket));
            let rank = match &new.rank {
                Some(rank) => rank.clone(),
                None => {
                    // Append after the current last ticket of the column.
                    let last = state
                        .tickets
                        .values()
                        .filter(|t| t.column_id == new.column_id)
                        .map(|t| t.rank.clone())
                        .max();
                    let allocator = crate::rank::RankAllocator::default();
                    allocator
                        .between(last.as_ref(), None)
                        .unwrap_or_else(|| Rank::from("z"))
                }
            };
            let ticket = Ticket {
                id: id.clone(),
                board_id: new.board_id.clone(),
                column_id: new.column_id.clone(),
                rank,
                title: new.title.clone(),
                ticket_type: new.ticket_type,
                priority: new.priority,
                assignee_id: new.assignee_id.clone(),
                created_at: now,
                updated_at: now,
                archived_at: None,
            };
            state.tickets.insert(id, ticket.clone());
            ticket
        };
        self.emit(InboundEvent::created(ticket.clone(), author.clone(), now));
        Ok(ticket)
    }

    fn delete_ticket(&self, author: &ClientId, id: &TicketId) -> Result<()> {
        self.begin(ApiCall::DeleteTicket {
            ticket_id: id.clone(),
        })?;
        let removed = self.state.lock().tickets.remove(id.as_str()).ok_or_else(|| {
            SyncError::Network(NetworkFailure::rejected(format!("no ticket {id}")))
        })?;
        self.emit(InboundEvent::deleted(&removed, author.clone(), self.clock.now()));
        Ok(())
    }

    fn list(&self, board_id: &BoardId, archived: bool) -> Result<Vec<Ticket>> {
        self.begin(if archived {
            ApiCall::ListArchivedTickets {
                board_id: board_id.clone(),
            }
        } else {
            ApiCall::ListTickets {
                board_id: board_id.clone(),
            }
        })?;
        let state = self.state.lock();
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.board_id == *board_id && t.is_archived() == archived)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tickets)
    }

    fn get_board(&self, board_id: &BoardId) -> Result<BoardLayout> {
        self.begin(ApiCall::GetBoard {
            board_id: board_id.clone(),
        })?;
        self.state
            .lock()
            .boards
            .get(board_id.as_str())
            .cloned()
            .ok_or_else(|| {
                SyncError::Network(NetworkFailure::rejected(format!("no board {board_id}")))
            })
    }

    /// Replace a board's layout as if another user edited it, emitting a
    /// board-structure event authored by `author`.
    pub fn restructure_board(&self, author: impl Into<ClientId>, layout: BoardLayout) {
        self.seed_board(layout.clone());
        self.emit(InboundEvent::board_changed(layout, author.into(), self.clock.now()));
    }
}

/// One client's connection to an [`InMemoryServer`].
#[derive(Clone)]
pub struct InMemoryBoardApi {
    server: Arc<InMemoryServer>,
    author: ClientId,
}

impl InMemoryBoardApi {
    pub fn server(&self) -> &Arc<InMemoryServer> {
        &self.server
    }

    pub fn author(&self) -> &ClientId {
        &self.author
    }
}

impl BoardApi for InMemoryBoardApi {
    async fn move_ticket(&self, ticket_id: &TicketId, target_column: &ColumnId) -> Result<Ticket> {
        self.server.move_ticket(&self.author, ticket_id, target_column)
    }

    async fn bulk_update_ranks(
        &self,
        board_id: &BoardId,
        updates: &[RankUpdate],
    ) -> Result<Vec<Ticket>> {
        self.server.bulk_update_ranks(&self.author, board_id, updates)
    }

    async fn update_ticket(&self, ticket_id: &TicketId, patch: &TicketPatch) -> Result<Ticket> {
        self.server.update_ticket(&self.author, ticket_id, patch)
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket> {
        self.server.create_ticket(&self.author, ticket)
    }

    async fn delete_ticket(&self, ticket_id: &TicketId) -> Result<()> {
        self.server.delete_ticket(&self.author, ticket_id)
    }

    async fn list_tickets_by_board(&self, board_id: &BoardId) -> Result<Vec<Ticket>> {
        self.server.list(board_id, false)
    }

    async fn list_archived_tickets_by_board(&self, board_id: &BoardId) -> Result<Vec<Ticket>> {
        self.server.list(board_id, true)
    }

    async fn get_board(&self, board_id: &BoardId) -> Result<BoardLayout> {
        self.server.get_board(board_id)
    }
}
