//! Agent sessions and their append-only event logs

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::collect_rows;
use crate::clock;
use crate::error::StorageError;
use crate::pagination::{Cursor, PageRequest};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub id: String,
    pub project_id: String,
    pub agent: String,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventRow {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub payload: Value,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
}

impl AgentEventRow {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id.clone())
    }
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Option<SessionRow>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT id, project_id, agent, created_at FROM agent_sessions WHERE id = ?",
            params![id],
            |row| {
                Ok(SessionRow {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    agent: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn insert_session(conn: &Connection, session: &SessionRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO agent_sessions (id, project_id, agent, created_at) VALUES (?, ?, ?, ?)",
        params![session.id, session.project_id, session.agent, session.created_at],
    )?;
    Ok(())
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<AgentEventRow> {
    let payload_json: String = row.get(3)?;
    Ok(AgentEventRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: row.get(2)?,
        payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
        created_at: row.get(4)?,
    })
}

pub fn list_events(
    conn: &Connection,
    session_id: &str,
    page: &PageRequest,
) -> Result<Vec<AgentEventRow>, StorageError> {
    let mut sql = String::from(
        "SELECT id, session_id, kind, payload_json, created_at FROM agent_events WHERE session_id = ?",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id.to_string())];

    page.push_keyset(&mut sql, &mut params_vec, "created_at", "id");
    page.push_order_limit(&mut sql, &mut params_vec, "created_at", "id");

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), map_event)?;
    collect_rows(rows)
}

pub fn insert_event(conn: &Connection, event: &AgentEventRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO agent_events (id, session_id, kind, payload_json, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            event.id,
            event.session_id,
            event.kind,
            event.payload.to_string(),
            event.created_at,
        ],
    )?;
    Ok(())
}
