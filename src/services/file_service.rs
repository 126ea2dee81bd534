//! File reference registry

use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::clock;
use crate::db::files::{self, FileFilter, FileRow};
use crate::db::{projects, stories};
use crate::error::StorageError;
use crate::pagination::{Page, PageRequest};

use super::audit::{created_diff, AuditEntry, AuditRecorder};
use super::input::{optional_text, required_text};
use super::RequestContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterFileInput {
    pub project_id: String,
    #[serde(default)]
    pub story_id: Option<String>,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub storage_key: Option<String>,
}

pub struct FileService {
    audit: Arc<AuditRecorder>,
}

impl FileService {
    pub fn new(audit: Arc<AuditRecorder>) -> Self {
        Self { audit }
    }

    pub fn list(
        &self,
        conn: &Connection,
        filter: &FileFilter,
        page: &PageRequest,
    ) -> Result<Page<FileRow>, StorageError> {
        let rows = files::list_files(conn, filter, page)?;
        Ok(Page::from_rows(rows, page.limit, FileRow::cursor))
    }

    pub fn register(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        input: RegisterFileInput,
    ) -> Result<FileRow, StorageError> {
        if projects::get_project(conn, &input.project_id)?.is_none() {
            return Err(StorageError::NotFound(format!("project {} not found", input.project_id)));
        }
        if let Some(ref story_id) = input.story_id {
            let story = stories::get_story(conn, story_id)?
                .ok_or_else(|| StorageError::NotFound(format!("story {} not found", story_id)))?;
            if story.project_id != input.project_id {
                return Err(StorageError::Validation("story belongs to a different project".into()));
            }
        }
        if input.size_bytes < 0 {
            return Err(StorageError::Validation("sizeBytes must not be negative".into()));
        }

        let file = FileRow {
            id: Uuid::new_v4().to_string(),
            project_id: input.project_id,
            story_id: input.story_id,
            name: required_text("name", &input.name, 500)?,
            mime_type: required_text("mimeType", &input.mime_type, 200)?,
            size_bytes: input.size_bytes,
            storage_key: optional_text("storageKey", input.storage_key, 1_000)?,
            created_at: clock::next_write_ms(),
        };

        files::insert_file(conn, &file)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("file.registered", "file", &file.id, Some(&file.project_id), created_diff(&file)),
        );
        Ok(file)
    }
}
