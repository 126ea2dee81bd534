//! Append-only audit event storage

use rusqlite::{params, Connection, Row};
use serde_json::Value;

use super::collect_rows;
use crate::error::StorageError;
use crate::pagination::{Cursor, PageRequest};

/// Audit event row
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEventRow {
    pub event_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub project_id: Option<String>,
    pub source: String,
    pub actor: String,
    pub occurred_at: i64,
    pub diff: Value,
}

impl AuditEventRow {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.occurred_at, self.event_id.clone())
    }
}

/// Changefeed filters
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Inclusive lower bound on `occurred_at`
    pub since_ms: Option<i64>,
    pub project_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<AuditEventRow> {
    let diff_json: String = row.get(8)?;
    Ok(AuditEventRow {
        event_id: row.get(0)?,
        event_type: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        project_id: row.get(4)?,
        source: row.get(5)?,
        actor: row.get(6)?,
        occurred_at: row.get(7)?,
        diff: serde_json::from_str(&diff_json).unwrap_or(Value::Null),
    })
}

pub fn insert_event(conn: &Connection, event: &AuditEventRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO audit_events (event_id, event_type, entity_type, entity_id, project_id,
                                   source, actor, occurred_at, diff_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            event.event_id,
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.project_id,
            event.source,
            event.actor,
            event.occurred_at,
            event.diff.to_string(),
        ],
    )?;
    Ok(())
}

/// Newest-first page of events. Returns up to `page.fetch_limit()` rows.
pub fn list_events(
    conn: &Connection,
    query: &AuditQuery,
    page: &PageRequest,
) -> Result<Vec<AuditEventRow>, StorageError> {
    let mut sql = String::from(
        "SELECT event_id, event_type, entity_type, entity_id, project_id, source, actor,
                occurred_at, diff_json
         FROM audit_events WHERE 1=1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(since) = query.since_ms {
        sql.push_str(" AND occurred_at >= ?");
        params_vec.push(Box::new(since));
    }
    if let Some(ref project_id) = query.project_id {
        sql.push_str(" AND project_id = ?");
        params_vec.push(Box::new(project_id.clone()));
    }
    if let Some(ref entity_type) = query.entity_type {
        sql.push_str(" AND entity_type = ?");
        params_vec.push(Box::new(entity_type.clone()));
    }
    if let Some(ref entity_id) = query.entity_id {
        sql.push_str(" AND entity_id = ?");
        params_vec.push(Box::new(entity_id.clone()));
    }

    page.push_keyset(&mut sql, &mut params_vec, "occurred_at", "event_id");
    page.push_order_limit(&mut sql, &mut params_vec, "occurred_at", "event_id");

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), map_event)?;
    collect_rows(rows)
}

/// Count of events for an entity
#[cfg(test)]
pub fn count_for_entity(conn: &Connection, entity_id: &str) -> Result<u64, StorageError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM audit_events WHERE entity_id = ?",
        params![entity_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
