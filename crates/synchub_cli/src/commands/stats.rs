//! Stats command implementation.

use super::Scenario;
use std::path::Path;
use synchub_core::ServerStats;

/// Runs the stats command.
pub fn run(
    scenario: &Path,
    root: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Scenario::load(scenario)?.into_server(root)?;
    let stats = server.stats()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        _ => print_text_output(&stats),
    }
    Ok(())
}

fn print_text_output(stats: &ServerStats) {
    println!("Store");
    println!("  Blobs:          {}", stats.store.blobs);
    println!("  Pending:        {}", stats.store.pending);
    println!("  Stored bytes:   {}", stats.store.stored_bytes);
    println!("  Users:          {}", stats.store.users);
    println!("Metadata");
    println!("  Users:          {}", stats.provider.users);
    println!("  Entries:        {}", stats.provider.entries);
    println!("  Events:         {}", stats.provider.events);
    println!("  Blocked keys:   {}", stats.provider.blocked_keys);
    println!("  Blocked events: {}", stats.provider.blocked_events);
    println!("  Last sync id:   {}", stats.provider.last_sync_id);
}
