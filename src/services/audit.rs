//! Audit recorder - append-only changefeed of domain mutations
//!
//! Every service records its events through `AuditRecorder::record` on the
//! connection it is already writing with. The event lands in the caller's
//! transaction, so rolled-back work leaves no audit trail behind.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock;
use crate::db::audit::{self, AuditEventRow, AuditQuery};
use crate::error::StorageError;
use crate::pagination::{Page, PageRequest};

use super::RequestContext;

/// One event to append
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_type: &'static str,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub project_id: Option<String>,
    pub diff: Value,
}

impl AuditEntry {
    pub fn new(
        event_type: &'static str,
        entity_type: &'static str,
        entity_id: impl Into<String>,
        project_id: Option<&str>,
        diff: Value,
    ) -> Self {
        Self {
            event_type,
            entity_type,
            entity_id: entity_id.into(),
            project_id: project_id.map(|p| p.to_string()),
            diff,
        }
    }
}

/// `{"after": snapshot}`
pub fn created_diff<T: Serialize>(snapshot: &T) -> Value {
    json!({ "after": serde_json::to_value(snapshot).unwrap_or(Value::Null) })
}

/// `{"before": snapshot}`
pub fn deleted_diff<T: Serialize>(snapshot: &T) -> Value {
    json!({ "before": serde_json::to_value(snapshot).unwrap_or(Value::Null) })
}

/// Field-level changes of an update, `{"changes": {field: {from, to}}}`
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Map<String, Value>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `field` if the value actually changed
    pub fn track<T: Serialize + PartialEq>(&mut self, field: &str, from: &T, to: &T) {
        if from != to {
            self.changes.insert(
                field.to_string(),
                json!({
                    "from": serde_json::to_value(from).unwrap_or(Value::Null),
                    "to": serde_json::to_value(to).unwrap_or(Value::Null),
                }),
            );
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn into_diff(self) -> Value {
        json!({ "changes": Value::Object(self.changes) })
    }
}

/// Changefeed record as served by `GET /audit`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventView {
    pub event_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub project_id: Option<String>,
    pub source: String,
    pub actor: String,
    pub at: String,
    pub diff: Value,
}

impl From<AuditEventRow> for AuditEventView {
    fn from(row: AuditEventRow) -> Self {
        Self {
            at: clock::format_ms(row.occurred_at),
            event_id: row.event_id,
            event_type: row.event_type,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            project_id: row.project_id,
            source: row.source,
            actor: row.actor,
            diff: row.diff,
        }
    }
}

/// Audit recorder
#[derive(Debug, Default)]
pub struct AuditRecorder;

impl AuditRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Append an event. Failures are logged and never reach the caller.
    pub fn record(&self, conn: &Connection, ctx: &RequestContext, entry: AuditEntry) {
        let row = AuditEventRow {
            event_id: Uuid::now_v7().to_string(),
            event_type: entry.event_type.to_string(),
            entity_type: entry.entity_type.to_string(),
            entity_id: entry.entity_id,
            project_id: entry.project_id,
            source: ctx.source.clone(),
            actor: ctx.actor.clone(),
            occurred_at: clock::next_write_ms(),
            diff: entry.diff,
        };

        match audit::insert_event(conn, &row) {
            Ok(()) => debug!(
                event_type = %row.event_type,
                entity_id = %row.entity_id,
                "Audit event recorded"
            ),
            Err(e) => warn!(
                error = %e,
                event_type = %row.event_type,
                entity_id = %row.entity_id,
                "Failed to record audit event"
            ),
        }
    }

    /// Newest-first changefeed page
    pub fn list(
        &self,
        conn: &Connection,
        query: &AuditQuery,
        page: &PageRequest,
    ) -> Result<Page<AuditEventView>, StorageError> {
        let rows = audit::list_events(conn, query, page)?;
        Ok(Page::from_rows(rows, page.limit, AuditEventRow::cursor).map(AuditEventView::from))
    }
}
