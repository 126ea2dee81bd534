//! Project CRUD operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::collect_rows;
use crate::clock;
use crate::error::StorageError;

/// Project row from database
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub updated_at: i64,
}

const PROJECT_COLUMNS: &str = "id, name, description, created_at, updated_at";

fn map_project(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Get a project by ID
pub fn get_project(conn: &Connection, id: &str) -> Result<Option<ProjectRow>, StorageError> {
    let sql = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_project).optional()?)
}

/// List all projects, newest first
pub fn list_projects(conn: &Connection) -> Result<Vec<ProjectRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM projects ORDER BY created_at DESC, id DESC",
        PROJECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], map_project)?;
    collect_rows(rows)
}

pub fn insert_project(conn: &Connection, project: &ProjectRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO projects (id, name, description, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            project.id,
            project.name,
            project.description,
            project.created_at,
            project.updated_at,
        ],
    )?;
    Ok(())
}

pub fn update_project(conn: &Connection, project: &ProjectRow) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE projects SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        params![project.name, project.description, project.updated_at, project.id],
    )?;
    Ok(())
}

/// Delete a project; foreign keys cascade to everything it owns
pub fn delete_project(conn: &Connection, id: &str) -> Result<bool, StorageError> {
    let rows = conn.execute("DELETE FROM projects WHERE id = ?", params![id])?;
    Ok(rows > 0)
}
