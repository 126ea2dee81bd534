//! Note service - comments attached to stories

use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::clock;
use crate::db::notes::{self, NoteRow};
use crate::db::stories;
use crate::error::StorageError;

use super::audit::{created_diff, AuditEntry, AuditRecorder, ChangeSet};
use super::input::{optional_text, required_text};
use super::RequestContext;

const MAX_BODY_LEN: usize = 20_000;
const MAX_AUTHOR_LEN: usize = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateNoteInput {
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotePatch {
    #[serde(default)]
    pub body: Option<String>,
}

pub struct NoteService {
    audit: Arc<AuditRecorder>,
}

impl NoteService {
    pub fn new(audit: Arc<AuditRecorder>) -> Self {
        Self { audit }
    }

    pub fn list(&self, conn: &Connection, story_id: &str) -> Result<Vec<NoteRow>, StorageError> {
        if stories::get_status(conn, story_id)?.is_none() {
            return Err(StorageError::NotFound(format!("story {} not found", story_id)));
        }
        notes::list_for_story(conn, story_id)
    }

    /// Add a note. Without an explicit author the request actor is used.
    pub fn create(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        story_id: &str,
        input: CreateNoteInput,
    ) -> Result<NoteRow, StorageError> {
        let story = stories::get_story(conn, story_id)?
            .ok_or_else(|| StorageError::NotFound(format!("story {} not found", story_id)))?;

        let now = clock::next_write_ms();
        let author = optional_text("author", input.author, MAX_AUTHOR_LEN)?
            .or_else(|| Some(ctx.actor.clone()));
        let note = NoteRow {
            id: Uuid::new_v4().to_string(),
            story_id: story_id.to_string(),
            body: required_text("body", &input.body, MAX_BODY_LEN)?,
            author,
            created_at: now,
            updated_at: now,
        };

        notes::insert_note(conn, &note)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("note.created", "note", &note.id, Some(&story.project_id), created_diff(&note)),
        );
        Ok(note)
    }

    pub fn patch(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
        patch: NotePatch,
    ) -> Result<NoteRow, StorageError> {
        let Some(body) = patch.body else {
            return Err(StorageError::Validation("patch must change at least one field".into()));
        };

        let current = notes::get_note(conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("note {} not found", id)))?;
        let mut next = current.clone();
        next.body = required_text("body", &body, MAX_BODY_LEN)?;

        let mut changes = ChangeSet::new();
        changes.track("body", &current.body, &next.body);
        if changes.is_empty() {
            return Ok(current);
        }

        next.updated_at = clock::next_write_ms();
        notes::update_note(conn, &next)?;

        let project_id = stories::get_story(conn, &current.story_id)?.map(|s| s.project_id);
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("note.updated", "note", id, project_id.as_deref(), changes.into_diff()),
        );
        Ok(next)
    }
}
