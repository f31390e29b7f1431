use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{ActionHistoryEntry, NewActionHistoryEntry};
use crate::schema::action_history;

/// Append one entry to the action history.
pub fn record_action(
    conn: &mut PgConnection,
    username: &str,
    prepid: &str,
    action: &str,
    value: &str,
) -> Result<(), diesel::result::Error> {
    let entry = NewActionHistoryEntry {
        id: Uuid::new_v4(),
        username: username.to_string(),
        prepid: prepid.to_string(),
        action: action.to_string(),
        value: value.to_string(),
    };
    diesel::insert_into(action_history::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// All history entries, newest first, optionally for one user.
pub fn list_actions(
    conn: &mut PgConnection,
    username: Option<&str>,
) -> Result<Vec<Value>, diesel::result::Error> {
    let mut query = action_history::table
        .order(action_history::created_at.desc())
        .into_boxed();
    if let Some(username) = username {
        query = query.filter(action_history::username.eq(username));
    }

    let entries: Vec<ActionHistoryEntry> = query.load(conn)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            json!({
                "user": entry.username,
                "prepid": entry.prepid,
                "action": entry.action,
                "value": entry.value,
                "time": entry.created_at.and_utc().timestamp(),
            })
        })
        .collect())
}
