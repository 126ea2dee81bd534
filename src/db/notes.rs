//! Story notes

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::collect_rows;
use crate::clock;
use crate::error::StorageError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRow {
    pub id: String,
    pub story_id: String,
    pub body: String,
    pub author: Option<String>,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub updated_at: i64,
}

const NOTE_COLUMNS: &str = "id, story_id, body, author, created_at, updated_at";

fn map_note(row: &Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok(NoteRow {
        id: row.get(0)?,
        story_id: row.get(1)?,
        body: row.get(2)?,
        author: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn get_note(conn: &Connection, id: &str) -> Result<Option<NoteRow>, StorageError> {
    let sql = format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_note).optional()?)
}

pub fn list_for_story(conn: &Connection, story_id: &str) -> Result<Vec<NoteRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM notes WHERE story_id = ? ORDER BY created_at, id",
        NOTE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![story_id], map_note)?;
    collect_rows(rows)
}

pub fn insert_note(conn: &Connection, note: &NoteRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO notes (id, story_id, body, author, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            note.id,
            note.story_id,
            note.body,
            note.author,
            note.created_at,
            note.updated_at,
        ],
    )?;
    Ok(())
}

pub fn update_note(conn: &Connection, note: &NoteRow) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE notes SET body = ?, updated_at = ? WHERE id = ?",
        params![note.body, note.updated_at, note.id],
    )?;
    Ok(())
}
