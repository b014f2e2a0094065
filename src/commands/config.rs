//! `config`: display the effective configuration.

use std::path::Path;

use owo_colors::OwoColorize;
use serde_json::json;

use super::print_json;
use crate::config::SyncConfig;
use crate::error::Result;

/// Show the configuration loaded from `path`, or from the default location.
pub fn cmd_config_show(path: Option<&Path>, output_json: bool) -> Result<()> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(SyncConfig::config_path);
    let config = SyncConfig::load_from(&config_path)?;
    let token_configured = config.api_token().is_some();

    if output_json {
        return print_json(&json!({
            "config_file": config_path.to_string_lossy(),
            "pending_window_ms": config.pending_window_ms,
            "sweep_interval_ms": config.sweep_interval_ms,
            "rank": {
                "max_len": config.rank.max_len,
                "renumber_width": config.rank.renumber_width,
            },
            "api": {
                "base_url": config.api_base_url(),
                "token_configured": token_configured,
                "timeout_secs": config.api.timeout_secs,
            },
            "client_id": config.client_id,
        }));
    }

    println!("{}\n", "Configuration:".cyan().bold());
    println!("{}: {}", "config_file".cyan(), config_path.display());
    println!(
        "{}: {} ms",
        "pending_window".cyan(),
        config.pending_window_ms
    );
    println!(
        "{}: {} ms",
        "sweep_interval".cyan(),
        config.sweep_interval_ms
    );
    println!(
        "{}: max_len={} renumber_width={}",
        "rank".cyan(),
        config.rank.max_len,
        config.rank.renumber_width
    );

    println!("\n{}:", "api".cyan());
    match config.api_base_url() {
        Some(url) => println!("  base_url: {url}"),
        None => println!("  base_url: {}", "not set".dimmed()),
    }
    if token_configured {
        println!("  token: {}", "configured".green());
    } else {
        println!("  token: {}", "not set".dimmed());
    }
    println!("  timeout: {}s", config.api.timeout_secs);

    match &config.client_id {
        Some(id) => println!("\n{}: {id}", "client_id".cyan()),
        None => println!("\n{}: {}", "client_id".cyan(), "random per session".dimmed()),
    }
    Ok(())
}
