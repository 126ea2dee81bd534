//! Agent sessions and their append-only event logs

use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::clock;
use crate::db::projects;
use crate::db::sessions::{self, AgentEventRow, SessionRow};
use crate::error::StorageError;
use crate::pagination::{Page, PageRequest};

use super::audit::{created_diff, AuditEntry, AuditRecorder};
use super::input::required_text;
use super::RequestContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSessionInput {
    pub project_id: String,
    pub agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppendEventInput {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

pub struct SessionService {
    audit: Arc<AuditRecorder>,
}

impl SessionService {
    pub fn new(audit: Arc<AuditRecorder>) -> Self {
        Self { audit }
    }

    fn get(&self, conn: &Connection, id: &str) -> Result<SessionRow, StorageError> {
        sessions::get_session(conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("agent session {} not found", id)))
    }

    pub fn create(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        input: CreateSessionInput,
    ) -> Result<SessionRow, StorageError> {
        if projects::get_project(conn, &input.project_id)?.is_none() {
            return Err(StorageError::NotFound(format!("project {} not found", input.project_id)));
        }

        let session = SessionRow {
            id: Uuid::new_v4().to_string(),
            project_id: input.project_id,
            agent: required_text("agent", &input.agent, 200)?,
            created_at: clock::next_write_ms(),
        };

        sessions::insert_session(conn, &session)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new(
                "agent_session.created",
                "agent_session",
                &session.id,
                Some(&session.project_id),
                created_diff(&session),
            ),
        );
        Ok(session)
    }

    pub fn append_event(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        session_id: &str,
        input: AppendEventInput,
    ) -> Result<AgentEventRow, StorageError> {
        let session = self.get(conn, session_id)?;

        let event = AgentEventRow {
            id: Uuid::new_v4().to_string(),
            session_id: session.id,
            kind: required_text("kind", &input.kind, 200)?,
            payload: input.payload,
            created_at: clock::next_write_ms(),
        };

        sessions::insert_event(conn, &event)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new(
                "agent_event.appended",
                "agent_event",
                &event.id,
                Some(&session.project_id),
                created_diff(&event),
            ),
        );
        Ok(event)
    }

    /// Newest-first page of a session's events
    pub fn list_events(
        &self,
        conn: &Connection,
        session_id: &str,
        page: &PageRequest,
    ) -> Result<Page<AgentEventRow>, StorageError> {
        self.get(conn, session_id)?;
        let rows = sessions::list_events(conn, session_id, page)?;
        Ok(Page::from_rows(rows, page.limit, AgentEventRow::cursor))
    }
}
