//! Story dependency edges
//!
//! An edge `(story_id -> depends_on_story_id)` means `story_id` waits on the
//! target. The ordered pair is unique (`idx_dependencies_pair`).

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::collect_rows;
use super::models::DependencyType;
use crate::clock;
use crate::error::StorageError;

/// Dependency row from database
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRow {
    pub id: String,
    pub story_id: String,
    pub depends_on_story_id: String,
    #[serde(rename = "type")]
    pub dependency_type: DependencyType,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
}

const DEPENDENCY_COLUMNS: &str = "id, story_id, depends_on_story_id, dependency_type, created_at";

fn map_dependency(row: &Row<'_>) -> rusqlite::Result<DependencyRow> {
    Ok(DependencyRow {
        id: row.get(0)?,
        story_id: row.get(1)?,
        depends_on_story_id: row.get(2)?,
        dependency_type: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn get_dependency(conn: &Connection, id: &str) -> Result<Option<DependencyRow>, StorageError> {
    let sql = format!("SELECT {} FROM story_dependencies WHERE id = ?", DEPENDENCY_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_dependency).optional()?)
}

/// Edge for an ordered pair, if present
pub fn find_pair(
    conn: &Connection,
    story_id: &str,
    depends_on_story_id: &str,
) -> Result<Option<DependencyRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM story_dependencies WHERE story_id = ? AND depends_on_story_id = ?",
        DEPENDENCY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![story_id, depends_on_story_id], map_dependency)
        .optional()?)
}

/// Outgoing edges of a story
pub fn list_for_story(conn: &Connection, story_id: &str) -> Result<Vec<DependencyRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM story_dependencies WHERE story_id = ? ORDER BY created_at, id",
        DEPENDENCY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![story_id], map_dependency)?;
    collect_rows(rows)
}

/// IDs the story directly depends on
pub fn targets_of(conn: &Connection, story_id: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt =
        conn.prepare_cached("SELECT depends_on_story_id FROM story_dependencies WHERE story_id = ?")?;
    let rows = stmt.query_map(params![story_id], |row| row.get(0))?;
    collect_rows(rows)
}

/// IDs of stories that directly depend on `story_id`
pub fn dependents_of(conn: &Connection, story_id: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT story_id FROM story_dependencies WHERE depends_on_story_id = ? ORDER BY story_id",
    )?;
    let rows = stmt.query_map(params![story_id], |row| row.get(0))?;
    collect_rows(rows)
}

/// True iff any direct target of `story_id` is not completed
pub fn has_open_dependency(conn: &Connection, story_id: &str) -> Result<bool, StorageError> {
    Ok(conn.query_row(
        "SELECT EXISTS (
            SELECT 1 FROM story_dependencies d
            JOIN stories t ON t.id = d.depends_on_story_id
            WHERE d.story_id = ? AND t.status <> 'completed'
         )",
        params![story_id],
        |row| row.get(0),
    )?)
}

/// Insert an edge. A duplicate pair surfaces as a unique violation.
pub fn insert_dependency(conn: &Connection, dep: &DependencyRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO story_dependencies (id, story_id, depends_on_story_id, dependency_type, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            dep.id,
            dep.story_id,
            dep.depends_on_story_id,
            dep.dependency_type,
            dep.created_at,
        ],
    )?;
    Ok(())
}

pub fn delete_dependency(conn: &Connection, id: &str) -> Result<bool, StorageError> {
    let rows = conn.execute("DELETE FROM story_dependencies WHERE id = ?", params![id])?;
    Ok(rows > 0)
}
