#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;

use jiff::Timestamp;
use tempfile::TempDir;
use tokio::sync::broadcast;

use kanban_sync::{
    Board, BoardId, BoardLayout, BoardSyncContext, Column, ColumnId, Identity, InMemoryBoardApi,
    InMemoryServer, InboundEvent, ManualClock, NoticeLog, Rank, RouteOutcome, SocketEventRouter,
    SyncConfig, Ticket, TicketId, TicketPriority, TicketType, load_board,
};

pub const BOARD: &str = "b-1";
pub const LOCAL: &str = "me";
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Helper struct to run kanban-sync commands in an isolated temp directory
pub struct SyncTest {
    pub temp_dir: TempDir,
}

impl SyncTest {
    pub fn new() -> Self {
        SyncTest {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kanban-sync"))
            .args(args)
            .current_dir(self.temp_dir.path())
            .env_remove("KANBAN_SYNC_API_TOKEN")
            .env_remove("KANBAN_SYNC_API_URL")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute kanban-sync command")
    }

    pub fn run_success(&self, args: &[&str]) -> String {
        let output = self.run(args);
        if !output.status.success() {
            panic!(
                "Command {:?} failed with status {:?}\nstdout: {}\nstderr: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    pub fn run_failure(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            !output.status.success(),
            "Command {:?} should have failed\nstdout: {}",
            args,
            String::from_utf8_lossy(&output.stdout)
        );
        String::from_utf8_lossy(&output.stderr).to_string()
    }

    /// Write a file relative to the temp directory and return its path.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }
}

pub fn ticket(id: &str, column: &str, rank: &str) -> Ticket {
    Ticket {
        id: TicketId::from(id),
        board_id: BoardId::from(BOARD),
        column_id: ColumnId::from(column),
        rank: Rank::from(rank),
        title: format!("Ticket {id}"),
        ticket_type: TicketType::Task,
        priority: TicketPriority::Medium,
        assignee_id: None,
        created_at: Timestamp::UNIX_EPOCH,
        updated_at: Timestamp::UNIX_EPOCH,
        archived_at: None,
    }
}

pub fn layout(columns: &[&str]) -> BoardLayout {
    BoardLayout {
        board: Board {
            id: BoardId::from(BOARD),
            name: "Sprint".to_string(),
            columns: columns.iter().map(|c| ColumnId::from(*c)).collect(),
        },
        columns: columns
            .iter()
            .map(|c| Column {
                id: ColumnId::from(*c),
                board_id: BoardId::from(BOARD),
                title: c.to_uppercase(),
            })
            .collect(),
    }
}

/// One local client wired to an in-memory server, with a manual clock.
pub struct BoardFixture {
    pub clock: Arc<ManualClock>,
    pub server: Arc<InMemoryServer>,
    pub api: InMemoryBoardApi,
    pub notices: Arc<NoticeLog>,
    pub ctx: Arc<BoardSyncContext>,
    pub router: SocketEventRouter,
    feed: broadcast::Receiver<InboundEvent>,
}

impl BoardFixture {
    pub fn new(columns: &[&str]) -> Self {
        Self::with_identity(columns, Identity::member(LOCAL))
    }

    pub fn with_identity(columns: &[&str], identity: Identity) -> Self {
        Self::build(columns, SyncConfig::default(), identity)
    }

    pub fn with_config(columns: &[&str], config: SyncConfig) -> Self {
        Self::build(columns, config, Identity::member(LOCAL))
    }

    fn build(columns: &[&str], config: SyncConfig, identity: Identity) -> Self {
        let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
        let server = InMemoryServer::new(clock.clone());
        server.seed_board(layout(columns));
        let api = server.client(identity.client_id.clone());
        let notices = Arc::new(NoticeLog::new());
        let ctx = Arc::new(
            BoardSyncContext::new(config, identity)
                .with_clock(clock.clone())
                .with_notifier(notices.clone()),
        );
        let router = SocketEventRouter::new(ctx.clone());
        let feed = server.subscribe();
        BoardFixture {
            clock,
            server,
            api,
            notices,
            ctx,
            router,
            feed,
        }
    }

    /// Seed tickets on the server and load the board into the local store.
    pub async fn load(&self, tickets: &[Ticket]) {
        for t in tickets {
            self.server.seed_ticket(t.clone());
        }
        load_board(&self.ctx, &self.api, &BoardId::from(BOARD))
            .await
            .expect("load_board failed");
        self.server.clear_calls();
    }

    /// A second client writing to the same server.
    pub fn remote(&self, author: &str) -> InMemoryBoardApi {
        self.server.client(author)
    }

    /// Route every server event emitted so far through the router.
    pub fn drain(&mut self) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(event) = self.feed.try_recv() {
            outcomes.push(self.router.route(event));
        }
        outcomes
    }

    /// Ticket ids of a column, in display order.
    pub fn column(&self, column: &str) -> Vec<String> {
        self.ctx
            .store()
            .tickets_in_column(column)
            .into_iter()
            .map(|t| t.id.to_string())
            .collect()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.ctx.is_pending(id)
    }
}
