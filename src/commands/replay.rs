//! `replay`: run a scripted board session against the in-memory server.
//!
//! A scenario seeds a board, then plays steps: local drags, injected server
//! failures, writes by other users, and clock advances. Every realtime event
//! the server emits is routed after each step, so the output shows exactly
//! what the local client ends up displaying.
//!
//! ```yaml
//! client-id: me
//! board:
//!   id: b-1
//!   columns:
//!     - id: todo
//!     - id: doing
//! tickets:
//!   - { id: t-1, column: todo, rank: m }
//! steps:
//!   - fail-next: { op: move-ticket, kind: permission-denied }
//!   - drag: { ticket: t-1, to: doing, index: 0 }
//!   - advance: 3000
//! ```

use std::path::Path;
use std::sync::Arc;

use owo_colors::OwoColorize;
use serde::Deserialize;
use serde_json::json;

use super::{print_board, print_json};
use crate::clock::ManualClock;
use crate::config::SyncConfig;
use crate::context::BoardSyncContext;
use crate::drag::{CardBounds, DragDropController, DragEffect, PointerInput};
use crate::error::{FailureKind, NetworkFailure, Result, SyncError};
use crate::events::{RouteOutcome, SocketEventRouter};
use crate::notify::{Notice, NoticeLevel, NoticeLog};
use crate::reconcile::{MoveOutcome, MoveReconciler};
use crate::remote::{ApiCall, ApiOp, BoardApi, InMemoryBoardApi, InMemoryServer};
use crate::store::queries::Violation;
use crate::sync::load_board;
use crate::types::{
    Board, BoardId, BoardLayout, ClientId, Column, ColumnId, Identity, Rank, Ticket, TicketId,
    TicketPatch, TicketPriority, TicketType,
};

const START_MILLIS: i64 = 1_700_000_000_000;
const CARD_HEIGHT: f32 = 40.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Scenario {
    /// Local client id; falls back to the configured one.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Replay as a user without move/edit permission.
    #[serde(default)]
    pub viewer: bool,
    pub board: ScenarioBoard,
    #[serde(default)]
    pub tickets: Vec<ScenarioTicket>,
    /// Steps are written as single-key maps (`- drag: {...}`) or, for
    /// unit steps, bare names (`- settle`).
    #[serde(default, with = "serde_yaml_ng::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioBoard {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<ScenarioColumn>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioColumn {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioTicket {
    pub id: String,
    pub column: String,
    /// Appended after the column's last ticket when absent.
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub priority: TicketPriority,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Drag a ticket to slot `index` of column `to`, as displayed.
    Drag(DragStep),
    /// Make the server's next call of an operation fail.
    FailNext(FailStep),
    /// Another user writes through the server.
    Event(EventStep),
    /// Move the clock forward, expiring pending markers.
    Advance(i64),
    /// Confirm every move held back with `confirm: false`.
    Settle,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DragStep {
    pub ticket: String,
    pub to: String,
    pub index: usize,
    /// Hold the move in flight until a `settle` step.
    #[serde(default = "default_confirm")]
    pub confirm: bool,
}

fn default_confirm() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailStep {
    pub op: ApiOp,
    #[serde(default = "default_failure_kind")]
    pub kind: FailureKind,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_failure_kind() -> FailureKind {
    FailureKind::Rejected
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventStep {
    pub author: String,
    pub ticket: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub delete: bool,
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Step::Drag(d) => format!("drag {} to {}[{}]", d.ticket, d.to, d.index),
            Step::FailNext(f) => format!("fail next {}", f.op),
            Step::Event(e) if e.delete => format!("{} deletes {}", e.author, e.ticket),
            Step::Event(e) => format!("{} edits {}", e.author, e.ticket),
            Step::Advance(ms) => format!("advance {ms} ms"),
            Step::Settle => "settle in-flight moves".to_string(),
        }
    }
}

/// One played step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub number: usize,
    pub action: String,
    pub outcome: String,
    /// Realtime events delivered after the step, in arrival order.
    pub routed: Vec<RouteOutcome>,
}

/// A column with its active tickets in display order.
#[derive(Debug, Clone)]
pub struct ColumnReport {
    pub column: Column,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub steps: Vec<StepReport>,
    pub columns: Vec<ColumnReport>,
    pub notices: Vec<Notice>,
    pub calls: Vec<ApiCall>,
    pub violations: Vec<Violation>,
    /// Tickets whose local change is still in flight at the end.
    pub pending: Vec<TicketId>,
}

impl ReplayReport {
    /// Ticket ids of a column, in display order.
    pub fn column_ids(&self, column: &str) -> Vec<String> {
        self.columns
            .iter()
            .find(|c| c.column.id.as_str() == column)
            .map(|c| c.tickets.iter().map(|t| t.id.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn calls_of(&self, op: ApiOp) -> usize {
        self.calls.iter().filter(|c| c.op() == op).count()
    }
}

impl Scenario {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    fn layout(&self) -> BoardLayout {
        let board_id = BoardId::from(self.board.id.as_str());
        let columns: Vec<Column> = self
            .board
            .columns
            .iter()
            .map(|c| Column {
                id: ColumnId::from(c.id.as_str()),
                board_id: board_id.clone(),
                title: c.title.clone().unwrap_or_else(|| c.id.clone()),
            })
            .collect();
        BoardLayout {
            board: Board {
                id: board_id.clone(),
                name: self.board.name.clone().unwrap_or_else(|| board_id.to_string()),
                columns: columns.iter().map(|c| c.id.clone()).collect(),
            },
            columns,
        }
    }

    fn seed_tickets(&self, ctx: &BoardSyncContext) -> Result<Vec<Ticket>> {
        let now = ctx.now();
        let board_id = BoardId::from(self.board.id.as_str());
        let mut seeded: Vec<Ticket> = Vec::new();
        for seed in &self.tickets {
            if !self.board.columns.iter().any(|c| c.id == seed.column) {
                return Err(SyncError::ColumnNotFound(seed.column.clone()));
            }
            let rank = match &seed.rank {
                Some(rank) => Rank::from(rank.as_str()),
                None => {
                    let last = seeded
                        .iter()
                        .filter(|t| t.column_id.as_str() == seed.column)
                        .map(|t| &t.rank)
                        .max();
                    ctx.ranks().between(last, None).ok_or_else(|| {
                        SyncError::Config(format!("cannot rank ticket {}", seed.id))
                    })?
                }
            };
            seeded.push(Ticket {
                id: TicketId::from(seed.id.as_str()),
                board_id: board_id.clone(),
                column_id: ColumnId::from(seed.column.as_str()),
                rank,
                title: seed.title.clone().unwrap_or_else(|| seed.id.clone()),
                ticket_type: seed.ticket_type,
                priority: seed.priority,
                assignee_id: None,
                created_at: now,
                updated_at: now,
                archived_at: None,
            });
        }
        Ok(seeded)
    }
}

/// Pointer position that makes the drag controller pick `slot` in a column
/// of `len` cards.
fn pointer_for_slot(len: usize, slot: usize) -> f32 {
    if len == 0 {
        0.0
    } else if slot < len {
        slot as f32 * CARD_HEIGHT + CARD_HEIGHT * 0.25
    } else {
        (len - 1) as f32 * CARD_HEIGHT + CARD_HEIGHT * 0.75
    }
}

struct Replay {
    ctx: Arc<BoardSyncContext>,
    clock: Arc<ManualClock>,
    server: Arc<InMemoryServer>,
    api: InMemoryBoardApi,
    router: SocketEventRouter,
    drag: DragDropController,
    in_flight: Vec<MoveReconciler>,
}

impl Replay {
    async fn drag(&mut self, step: &DragStep) -> Result<String> {
        let store = self.ctx.store();
        let ticket = store
            .get(&step.ticket)
            .ok_or_else(|| SyncError::TicketNotFound(step.ticket.clone()))?;
        let origin = store.index_in_column(&step.ticket).unwrap_or(0);
        let cards: Vec<CardBounds> = store
            .tickets_in_column(&step.to)
            .into_iter()
            .enumerate()
            .map(|(i, t)| CardBounds {
                ticket_id: t.id,
                top: i as f32 * CARD_HEIGHT,
                height: CARD_HEIGHT,
            })
            .collect();
        let pointer_y = pointer_for_slot(cards.len(), step.index);

        let pressed = self.drag.handle(PointerInput::Down {
            ticket_id: ticket.id.clone(),
            column: ticket.column_id.clone(),
            index: origin,
        });
        if pressed == DragEffect::Refused {
            return Ok("refused: not allowed to move tickets".to_string());
        }
        self.drag.handle(PointerInput::Move {
            column: ColumnId::from(step.to.as_str()),
            pointer_y,
            cards,
        });

        let intent = match self.drag.handle(PointerInput::Drop) {
            DragEffect::Move(intent) => intent,
            _ => return Ok("dropped at origin, nothing sent".to_string()),
        };

        if !step.confirm {
            let mut reconciler = MoveReconciler::new(self.ctx.clone(), intent);
            if !reconciler.apply_optimistic()? {
                return Ok("already in place".to_string());
            }
            self.in_flight.push(reconciler);
            return Ok("applied, awaiting confirmation".to_string());
        }

        let outcome = MoveReconciler::run(self.ctx.clone(), &self.api, intent).await?;
        Ok(describe_outcome(&outcome))
    }

    async fn settle(&mut self) -> String {
        let mut outcomes = Vec::new();
        for mut reconciler in std::mem::take(&mut self.in_flight) {
            let outcome = reconciler.confirm(&self.api).await;
            outcomes.push(format!(
                "{}: {}",
                reconciler.intent().ticket_id,
                describe_outcome(&outcome)
            ));
        }
        if outcomes.is_empty() {
            "nothing in flight".to_string()
        } else {
            outcomes.join("; ")
        }
    }

    async fn remote_write(&self, step: &EventStep) -> String {
        let other = self.server.client(step.author.as_str());
        write_as(&other, step)
            .await
            .unwrap_or_else(|e| format!("server refused: {e}"))
    }

    fn advance(&self, millis: i64) -> String {
        self.clock.advance_millis(millis);
        let expired = self.ctx.expire_pending();
        let replayed = self.router.replay_deferred();
        format!(
            "{} marker(s) expired, {} deferred event(s) replayed",
            expired.len(),
            replayed.len()
        )
    }
}

/// Perform another user's write through their own connection.
async fn write_as(other: &InMemoryBoardApi, step: &EventStep) -> Result<String> {
    let ticket_id = TicketId::from(step.ticket.as_str());
    if step.delete {
        other.delete_ticket(&ticket_id).await?;
        return Ok("deleted on server".to_string());
    }
    let mut done = Vec::new();
    if let Some(to) = &step.to {
        other
            .move_ticket(&ticket_id, &ColumnId::from(to.as_str()))
            .await?;
        done.push(format!("moved to {to}"));
    }
    if let Some(title) = &step.title {
        let patch = TicketPatch {
            title: Some(title.clone()),
            ..Default::default()
        };
        other.update_ticket(&ticket_id, &patch).await?;
        done.push("retitled".to_string());
    }
    if done.is_empty() {
        done.push("no change".to_string());
    }
    Ok(done.join(", "))
}

fn describe_outcome(outcome: &MoveOutcome) -> String {
    match outcome {
        MoveOutcome::NoOp => "already in place".to_string(),
        MoveOutcome::Settled(tickets) => format!("settled ({} ticket(s))", tickets.len()),
        MoveOutcome::RolledBack(e) => format!("rolled back: {e}"),
    }
}

/// Play `scenario` and report the resulting board.
pub async fn run_scenario(scenario: &Scenario, config: &SyncConfig) -> Result<ReplayReport> {
    let client_id = scenario
        .client_id
        .clone()
        .unwrap_or_else(|| config.client_id_or_random());
    let identity = if scenario.viewer {
        Identity::viewer(client_id.as_str())
    } else {
        Identity::member(client_id.as_str())
    };

    let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
    let notices = Arc::new(NoticeLog::new());
    let ctx = Arc::new(
        BoardSyncContext::new(config.clone(), identity)
            .with_clock(clock.clone())
            .with_notifier(notices.clone()),
    );

    let server = InMemoryServer::new(clock.clone());
    let layout = scenario.layout();
    let board_id = layout.board.id.clone();
    server.seed_board(layout);
    for ticket in scenario.seed_tickets(&ctx)? {
        server.seed_ticket(ticket);
    }

    let api = server.client(ClientId::from(client_id.as_str()));
    let mut feed = server.subscribe();
    load_board(&ctx, &api, &board_id).await?;
    server.clear_calls();

    let mut replay = Replay {
        router: SocketEventRouter::new(ctx.clone()),
        drag: DragDropController::new(ctx.identity()),
        ctx: ctx.clone(),
        clock,
        server: server.clone(),
        api,
        in_flight: Vec::new(),
    };

    let mut steps = Vec::new();
    for (i, step) in scenario.steps.iter().enumerate() {
        let outcome = match step {
            Step::Drag(drag) => replay.drag(drag).await?,
            Step::FailNext(fail) => {
                let message = fail
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("injected {} failure", fail.kind));
                server.fail_next(fail.op, NetworkFailure::new(fail.kind, message));
                format!("next {} will fail ({})", fail.op, fail.kind)
            }
            Step::Event(event) => replay.remote_write(event).await,
            Step::Advance(millis) => replay.advance(*millis),
            Step::Settle => replay.settle().await,
        };

        let mut routed = Vec::new();
        while let Ok(event) = feed.try_recv() {
            routed.push(replay.router.route(event));
        }
        tracing::debug!(step = i + 1, %outcome, "scenario step played");
        steps.push(StepReport {
            number: i + 1,
            action: step.describe(),
            outcome,
            routed,
        });
    }

    let columns = ctx
        .store()
        .columns_of_board(board_id.as_str())
        .into_iter()
        .map(|column| ColumnReport {
            tickets: ctx.store().tickets_in_column(column.id.as_str()),
            column,
        })
        .collect();

    Ok(ReplayReport {
        steps,
        columns,
        notices: notices.all(),
        calls: server.calls(),
        violations: ctx.store().violations(board_id.as_str()),
        pending: ctx.tracker().pending_ids(ctx.now()),
    })
}

/// Replay a scenario file and print the outcome.
pub async fn cmd_replay(path: &Path, config_path: Option<&Path>, output_json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SyncError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read scenario at {}: {}", path.display(), e),
        ))
    })?;
    let scenario = Scenario::from_yaml(&content)?;
    let config = match config_path {
        Some(p) => SyncConfig::load_from(p)?,
        None => SyncConfig::load()?,
    };

    let report = run_scenario(&scenario, &config).await?;

    if output_json {
        return print_json(&report_json(&report));
    }

    println!("{}\n", "Steps:".cyan().bold());
    for step in &report.steps {
        let outcome = if step.outcome.starts_with("rolled back")
            || step.outcome.starts_with("refused")
            || step.outcome.starts_with("server refused")
        {
            step.outcome.red().to_string()
        } else {
            step.outcome.clone()
        };
        println!("{:>3}. {} -> {}", step.number, step.action.bold(), outcome);
        for routed in &step.routed {
            println!("       {} {}", "event".dimmed(), routed.dimmed());
        }
    }

    println!("\n{}\n", "Board:".cyan().bold());
    print_board(&report.columns);

    if !report.notices.is_empty() {
        println!("\n{}\n", "Notifications:".cyan().bold());
        for notice in &report.notices {
            let label = match notice.level {
                NoticeLevel::Error => notice.level.red().to_string(),
                NoticeLevel::Warning => notice.level.yellow().to_string(),
                NoticeLevel::Success => notice.level.green().to_string(),
                NoticeLevel::Info => notice.level.to_string(),
            };
            println!("  [{label}] {}", notice.message);
        }
    }

    if !report.pending.is_empty() {
        let ids: Vec<String> = report.pending.iter().map(|id| id.to_string()).collect();
        println!("\n{} {}", "Still pending:".yellow(), ids.join(", "));
    }
    for violation in &report.violations {
        println!("{} {}: {}", "Violation:".red().bold(), violation.ticket_id, violation.reason);
    }

    println!("\n{} API call(s)", report.calls.len());
    Ok(())
}

fn report_json(report: &ReplayReport) -> serde_json::Value {
    json!({
        "steps": report.steps.iter().map(|s| json!({
            "number": s.number,
            "action": s.action,
            "outcome": s.outcome,
            "routed": s.routed.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
        "columns": report.columns.iter().map(|c| json!({
            "id": c.column.id,
            "title": c.column.title,
            "tickets": c.tickets,
        })).collect::<Vec<_>>(),
        "notices": report.notices.iter().map(|n| json!({
            "level": n.level.to_string(),
            "message": n.message,
        })).collect::<Vec<_>>(),
        "calls": report.calls.iter().map(|c| c.op().to_string()).collect::<Vec<_>>(),
        "pending": report.pending,
        "violations": report.violations.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
client-id: me
board:
  id: b-1
  name: Team
  columns:
    - { id: todo, title: To do }
    - { id: doing, title: Doing }
tickets:
  - { id: t-1, column: todo, rank: m }
  - { id: t-2, column: todo }
steps:
  - drag: { ticket: t-1, to: doing, index: 0 }
  - fail-next: { op: bulk-update-ranks, kind: timed-out }
  - drag: { ticket: t-2, to: doing, index: 1 }
  - advance: 500
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        assert_eq!(scenario.client_id.as_deref(), Some("me"));
        assert_eq!(scenario.tickets.len(), 2);
        assert!(matches!(scenario.steps[1], Step::FailNext(ref f) if f.kind == FailureKind::TimedOut));
        assert!(matches!(scenario.steps[3], Step::Advance(500)));
    }

    #[test]
    fn test_parse_every_step_shape() {
        let yaml = r#"
board: { id: b-1, columns: [{ id: todo }, { id: doing }] }
steps:
  - drag: { ticket: t-1, to: doing, index: 0, confirm: false }
  - fail-next: { op: move-ticket }
  - event: { author: alice, ticket: t-1, title: Renamed }
  - event: { author: bob, ticket: t-1, delete: true }
  - advance: 3000
  - settle
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.steps.len(), 6);
        assert!(matches!(scenario.steps[0], Step::Drag(ref d) if !d.confirm && d.to == "doing"));
        assert!(matches!(
            scenario.steps[1],
            Step::FailNext(ref f) if f.op == ApiOp::MoveTicket && f.kind == FailureKind::Rejected
        ));
        assert!(matches!(scenario.steps[2], Step::Event(ref e) if e.title.as_deref() == Some("Renamed")));
        assert!(matches!(scenario.steps[3], Step::Event(ref e) if e.delete));
        assert!(matches!(scenario.steps[4], Step::Advance(3000)));
        assert!(matches!(scenario.steps[5], Step::Settle));
    }

    #[test]
    fn test_demo_scenarios_parse() {
        for name in ["empty-column.yaml", "rollback.yaml", "concurrent-edit.yaml"] {
            let path = format!("{}/demos/{name}", env!("CARGO_MANIFEST_DIR"));
            let content = std::fs::read_to_string(&path).unwrap();
            let scenario = Scenario::from_yaml(&content)
                .unwrap_or_else(|e| panic!("{name} failed to parse: {e}"));
            assert!(!scenario.steps.is_empty(), "{name} has no steps");
        }
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let yaml = "board: { id: b, columns: [] }\nsteps:\n  - teleport: 1\n";
        assert!(matches!(
            Scenario::from_yaml(yaml),
            Err(SyncError::YamlParse(_))
        ));
    }

    #[test]
    fn test_pointer_for_slot() {
        assert_eq!(pointer_for_slot(0, 3), 0.0);
        assert_eq!(pointer_for_slot(3, 0), 10.0);
        assert_eq!(pointer_for_slot(3, 3), 110.0);
    }

    #[tokio::test]
    async fn test_run_scenario() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        let report = run_scenario(&scenario, &SyncConfig::default()).await.unwrap();

        assert!(report.steps[0].outcome.starts_with("settled"));
        assert_eq!(report.steps[0].routed, vec![
            RouteOutcome::DroppedSelfEcho,
            RouteOutcome::DroppedSelfEcho,
        ]);
        assert!(report.steps[2].outcome.starts_with("rolled back"));
        assert_eq!(report.column_ids("doing"), vec!["t-1"]);
        assert_eq!(report.column_ids("todo"), vec!["t-2"]);
        assert_eq!(report.notices.len(), 1);
        assert!(report.violations.is_empty());
        assert!(report.pending.is_empty());
    }
}
