//! `board`: fetch a board over HTTP and print it.

use std::path::Path;

use owo_colors::OwoColorize;
use serde_json::json;

use super::{ColumnReport, print_board, print_json};
use crate::config::SyncConfig;
use crate::context::BoardSyncContext;
use crate::error::Result;
use crate::remote::HttpBoardApi;
use crate::sync::load_board;
use crate::types::{BoardId, Identity};

pub async fn cmd_board(id: &str, config_path: Option<&Path>, output_json: bool) -> Result<()> {
    let config = match config_path {
        Some(p) => SyncConfig::load_from(p)?,
        None => SyncConfig::load()?,
    };
    let api = HttpBoardApi::from_config(&config)?;
    let identity = Identity::viewer(config.client_id_or_random().as_str());
    let ctx = BoardSyncContext::new(config, identity);

    let board_id = BoardId::from(id);
    load_board(&ctx, &api, &board_id).await?;

    let store = ctx.store();
    let columns: Vec<ColumnReport> = store
        .columns_of_board(id)
        .into_iter()
        .map(|column| ColumnReport {
            tickets: store.tickets_in_column(column.id.as_str()),
            column,
        })
        .collect();
    let archived = store.archived_in_board(id);

    if output_json {
        return print_json(&json!({
            "board": store.board(id),
            "columns": columns.iter().map(|c| json!({
                "id": c.column.id,
                "title": c.column.title,
                "tickets": c.tickets,
            })).collect::<Vec<_>>(),
            "archived": archived,
        }));
    }

    let name = store
        .board(id)
        .map(|b| b.name)
        .unwrap_or_else(|| id.to_string());
    println!("{}\n", name.cyan().bold());
    print_board(&columns);
    if !archived.is_empty() {
        println!("\n{} archived ticket(s)", archived.len().dimmed());
    }
    Ok(())
}
