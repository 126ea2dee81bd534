//! Story CRUD operations
//!
//! `blocked` is never stored. Every read computes it from the story's direct
//! dependency edges, so a status change on a target is visible on the next
//! read of each dependent without a write to the dependent's row.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::collect_rows;
use super::models::{Priority, StoryStatus};
use crate::clock;
use crate::error::StorageError;
use crate::pagination::{Cursor, PageRequest};

/// Story row from database, with derived `blocked`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRow {
    pub id: String,
    pub project_id: String,
    pub sprint_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: StoryStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub due_at: Option<String>,
    pub blocked: bool,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub updated_at: i64,
}

impl StoryRow {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.updated_at, self.id.clone())
    }
}

/// Filters for story lists
#[derive(Debug, Clone, Default)]
pub struct StoryFilter {
    pub project_id: Option<String>,
    pub sprint_id: Option<String>,
    pub status: Option<StoryStatus>,
    pub assignee: Option<String>,
    pub blocked: Option<bool>,
}

/// One-hop blocked predicate for the story aliased `s`
pub const BLOCKED_EXPR: &str = "EXISTS (
    SELECT 1 FROM story_dependencies d
    JOIN stories t ON t.id = d.depends_on_story_id
    WHERE d.story_id = s.id AND t.status <> 'completed'
)";

fn story_select() -> String {
    format!(
        "SELECT s.id, s.project_id, s.sprint_id, s.title, s.description, s.status, s.priority,
                s.assignee, s.due_at, {} AS blocked, s.created_at, s.updated_at
         FROM stories s",
        BLOCKED_EXPR
    )
}

fn map_story(row: &Row<'_>) -> rusqlite::Result<StoryRow> {
    Ok(StoryRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        sprint_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        assignee: row.get(7)?,
        due_at: row.get(8)?,
        blocked: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Get a story by ID
pub fn get_story(conn: &Connection, id: &str) -> Result<Option<StoryRow>, StorageError> {
    let sql = format!("{} WHERE s.id = ?", story_select());
    Ok(conn.query_row(&sql, params![id], map_story).optional()?)
}

/// List stories newest-updated first. Returns up to `page.fetch_limit()` rows.
pub fn list_stories(
    conn: &Connection,
    filter: &StoryFilter,
    page: &PageRequest,
) -> Result<Vec<StoryRow>, StorageError> {
    let mut sql = format!("{} WHERE 1=1", story_select());
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref project_id) = filter.project_id {
        sql.push_str(" AND s.project_id = ?");
        params_vec.push(Box::new(project_id.clone()));
    }
    if let Some(ref sprint_id) = filter.sprint_id {
        sql.push_str(" AND s.sprint_id = ?");
        params_vec.push(Box::new(sprint_id.clone()));
    }
    if let Some(status) = filter.status {
        sql.push_str(" AND s.status = ?");
        params_vec.push(Box::new(status));
    }
    if let Some(ref assignee) = filter.assignee {
        sql.push_str(" AND s.assignee = ?");
        params_vec.push(Box::new(assignee.clone()));
    }
    if let Some(blocked) = filter.blocked {
        sql.push_str(&format!(" AND {} = ?", BLOCKED_EXPR));
        params_vec.push(Box::new(blocked));
    }

    page.push_keyset(&mut sql, &mut params_vec, "s.updated_at", "s.id");
    page.push_order_limit(&mut sql, &mut params_vec, "s.updated_at", "s.id");

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), map_story)?;
    collect_rows(rows)
}

pub fn insert_story(conn: &Connection, story: &StoryRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO stories (id, project_id, sprint_id, title, description, status, priority,
                              assignee, due_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            story.id,
            story.project_id,
            story.sprint_id,
            story.title,
            story.description,
            story.status,
            story.priority,
            story.assignee,
            story.due_at,
            story.created_at,
            story.updated_at,
        ],
    )?;
    Ok(())
}

/// Write every mutable column of `story`
pub fn update_story(conn: &Connection, story: &StoryRow) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE stories SET sprint_id = ?, title = ?, description = ?, status = ?, priority = ?,
                            assignee = ?, due_at = ?, updated_at = ?
         WHERE id = ?",
        params![
            story.sprint_id,
            story.title,
            story.description,
            story.status,
            story.priority,
            story.assignee,
            story.due_at,
            story.updated_at,
            story.id,
        ],
    )?;
    Ok(())
}

/// Delete a story; edges and notes cascade
pub fn delete_story(conn: &Connection, id: &str) -> Result<bool, StorageError> {
    let rows = conn.execute("DELETE FROM stories WHERE id = ?", params![id])?;
    Ok(rows > 0)
}

/// Status of a story without loading the rest of the row
pub fn get_status(conn: &Connection, id: &str) -> Result<Option<StoryStatus>, StorageError> {
    Ok(conn
        .query_row("SELECT status FROM stories WHERE id = ?", params![id], |row| row.get(0))
        .optional()?)
}
