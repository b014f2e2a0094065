mod board;
mod config;
pub mod replay;

pub use board::cmd_board;
pub use config::cmd_config_show;
pub use replay::{ColumnReport, ReplayReport, Scenario, cmd_replay, run_scenario};

use serde_json::Value;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::Result;

/// Print a JSON value to stdout, pretty-printed.
pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Tabled)]
struct TicketRow {
    #[tabled(rename = "Column")]
    column: String,
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Rank")]
    rank: String,
    #[tabled(rename = "Type")]
    ticket_type: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Title")]
    title: String,
}

/// Print columns and their tickets, in display order, as one table.
pub fn print_board(columns: &[ColumnReport]) {
    let rows: Vec<TicketRow> = columns
        .iter()
        .flat_map(|c| {
            c.tickets.iter().enumerate().map(|(i, t)| TicketRow {
                column: c.column.title.clone(),
                position: i,
                id: t.id.to_string(),
                rank: t.rank.to_string(),
                ticket_type: t.ticket_type.to_string(),
                priority: t.priority.to_string(),
                title: t.title.clone(),
            })
        })
        .collect();

    if rows.is_empty() {
        println!("No tickets.");
    } else {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}
