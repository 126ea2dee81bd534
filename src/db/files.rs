//! File references
//!
//! Only metadata lives here. Upload and text extraction happen elsewhere; the
//! row exists so audit diffs and stories can point at a `fileId`.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::collect_rows;
use crate::clock;
use crate::error::StorageError;
use crate::pagination::{Cursor, PageRequest};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRow {
    pub id: String,
    pub project_id: String,
    pub story_id: Option<String>,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: Option<String>,
    #[serde(serialize_with = "clock::serialize_ms")]
    pub created_at: i64,
}

impl FileRow {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub project_id: Option<String>,
    pub story_id: Option<String>,
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        story_id: row.get(2)?,
        name: row.get(3)?,
        mime_type: row.get(4)?,
        size_bytes: row.get(5)?,
        storage_key: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn list_files(
    conn: &Connection,
    filter: &FileFilter,
    page: &PageRequest,
) -> Result<Vec<FileRow>, StorageError> {
    let mut sql = String::from(
        "SELECT id, project_id, story_id, name, mime_type, size_bytes, storage_key, created_at
         FROM files WHERE 1=1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref project_id) = filter.project_id {
        sql.push_str(" AND project_id = ?");
        params_vec.push(Box::new(project_id.clone()));
    }
    if let Some(ref story_id) = filter.story_id {
        sql.push_str(" AND story_id = ?");
        params_vec.push(Box::new(story_id.clone()));
    }

    page.push_keyset(&mut sql, &mut params_vec, "created_at", "id");
    page.push_order_limit(&mut sql, &mut params_vec, "created_at", "id");

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), map_file)?;
    collect_rows(rows)
}

pub fn insert_file(conn: &Connection, file: &FileRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO files (id, project_id, story_id, name, mime_type, size_bytes, storage_key, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            file.id,
            file.project_id,
            file.story_id,
            file.name,
            file.mime_type,
            file.size_bytes,
            file.storage_key,
            file.created_at,
        ],
    )?;
    Ok(())
}
