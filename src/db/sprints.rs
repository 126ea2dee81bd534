//! Sprint CRUD operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::collect_rows;
use super::models::SprintStatus;
use crate::clock;
use crate::error::StorageError;

/// Sprint row from database
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub goal: Option<String>,
    pub status: SprintStatus,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub updated_at: i64,
}

const SPRINT_COLUMNS: &str =
    "id, project_id, name, goal, status, starts_at, ends_at, created_at, updated_at";

fn map_sprint(row: &Row<'_>) -> rusqlite::Result<SprintRow> {
    Ok(SprintRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        goal: row.get(3)?,
        status: row.get(4)?,
        starts_at: row.get(5)?,
        ends_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn get_sprint(conn: &Connection, id: &str) -> Result<Option<SprintRow>, StorageError> {
    let sql = format!("SELECT {} FROM sprints WHERE id = ?", SPRINT_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_sprint).optional()?)
}

/// Sprints of a project, oldest first
pub fn list_sprints(conn: &Connection, project_id: &str) -> Result<Vec<SprintRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM sprints WHERE project_id = ? ORDER BY created_at, id",
        SPRINT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id], map_sprint)?;
    collect_rows(rows)
}

/// The active sprint of a project other than `exclude_id`, if any
pub fn find_active_sprint(
    conn: &Connection,
    project_id: &str,
    exclude_id: Option<&str>,
) -> Result<Option<String>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT id FROM sprints
             WHERE project_id = ? AND status = 'active' AND id <> COALESCE(?, '')
             LIMIT 1",
            params![project_id, exclude_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn insert_sprint(conn: &Connection, sprint: &SprintRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO sprints (id, project_id, name, goal, status, starts_at, ends_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            sprint.id,
            sprint.project_id,
            sprint.name,
            sprint.goal,
            sprint.status,
            sprint.starts_at,
            sprint.ends_at,
            sprint.created_at,
            sprint.updated_at,
        ],
    )?;
    Ok(())
}

pub fn update_sprint(conn: &Connection, sprint: &SprintRow) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE sprints SET name = ?, goal = ?, status = ?, starts_at = ?, ends_at = ?, updated_at = ?
         WHERE id = ?",
        params![
            sprint.name,
            sprint.goal,
            sprint.status,
            sprint.starts_at,
            sprint.ends_at,
            sprint.updated_at,
            sprint.id,
        ],
    )?;
    Ok(())
}
