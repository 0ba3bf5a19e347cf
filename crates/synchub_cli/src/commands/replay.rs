//! Replay command implementation.

use super::Scenario;
use serde::Serialize;
use std::path::Path;
use synchub_core::{FileChange, ServerData};
use synchub_types::{SyncId, UserId};

/// One user's change feed.
#[derive(Debug, Serialize)]
pub struct UserFeed {
    /// Owner of the feed.
    pub user: UserId,
    /// Cursor to pass on the next query.
    pub cursor: i64,
    /// Visible changes after the requested cursor.
    pub changes: Vec<FileChange>,
}

/// Collects the feeds of `user`, or of every user, after `cursor`.
pub fn feeds(
    server: &ServerData,
    user: Option<&str>,
    cursor: SyncId,
) -> Result<Vec<UserFeed>, Box<dyn std::error::Error>> {
    let users = match user {
        Some(user) => vec![UserId::new(user)],
        None => server.provider().users()?,
    };
    let mut feeds = Vec::with_capacity(users.len());
    for user in users {
        let batch = server.changes_since(&user, cursor)?;
        feeds.push(UserFeed {
            user,
            cursor: batch.cursor.as_i64(),
            changes: batch.changes,
        });
    }
    Ok(feeds)
}

/// Runs the replay command.
pub fn run(
    scenario: &Path,
    root: Option<&Path>,
    user: Option<&str>,
    cursor: i64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if cursor < 0 {
        return Err(format!("cursor must not be negative, got {cursor}").into());
    }
    let server = Scenario::load(scenario)?.into_server(root)?;
    let feeds = feeds(&server, user, SyncId::new(cursor))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&feeds)?),
        _ => print_text_output(&feeds),
    }
    Ok(())
}

fn print_text_output(feeds: &[UserFeed]) {
    for feed in feeds {
        println!("{} (cursor {})", feed.user, feed.cursor);
        if feed.changes.is_empty() {
            println!("  no changes");
        }
        for change in &feed.changes {
            println!("  {change}");
        }
    }
}
