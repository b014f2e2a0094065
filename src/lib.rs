#[macro_use]
mod macros;

pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod context;
pub mod drag;
pub mod edit;
pub mod error;
pub mod events;
pub mod notify;
pub mod rank;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use context::{BoardSyncContext, OptimisticChange};
pub use drag::{DragDropController, DragEffect, PointerInput};
pub use error::{FailureKind, NetworkFailure, Result, SyncError};
pub use events::{InboundEvent, RouteOutcome, SocketEventRouter};
pub use notify::{Notice, NoticeLevel, NoticeLog, Notifier};
pub use rank::{Allocation, RankAllocator};
pub use reconcile::{MoveOutcome, MovePhase, MoveReconciler};
pub use remote::{BoardApi, HttpBoardApi, InMemoryBoardApi, InMemoryServer};
pub use store::{StoreEvent, TicketStore, UpsertOutcome};
pub use sync::{LoadSummary, RealtimeSession, load_board};
pub use tracker::{ExpirySweeper, MutationToken, OptimisticMutationTracker, PendingMutation};
pub use types::{
    Board, BoardId, BoardLayout, ClientId, Column, ColumnId, Identity, MoveIntent, NewTicket, Rank,
    RankUpdate, Ticket, TicketId, TicketPatch, TicketPriority, TicketType,
};
