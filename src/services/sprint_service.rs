//! Sprint service - lifecycle and the one-active-sprint rule

use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::clock;
use crate::db::models::{double_option, SprintStatus};
use crate::db::sprints::{self, SprintRow};
use crate::db::projects;
use crate::error::StorageError;

use super::audit::{created_diff, AuditEntry, AuditRecorder, ChangeSet};
use super::input::{optional_text, optional_timestamp, required_text};
use super::RequestContext;

const MAX_NAME_LEN: usize = 200;
const MAX_GOAL_LEN: usize = 2_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSprintInput {
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub status: Option<SprintStatus>,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SprintPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub goal: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<SprintStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub starts_at: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub ends_at: Option<Option<String>>,
}

impl SprintPatch {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.goal.is_none()
            && self.status.is_none()
            && self.starts_at.is_none()
            && self.ends_at.is_none()
    }
}

/// Sprint service
pub struct SprintService {
    audit: Arc<AuditRecorder>,
}

impl SprintService {
    pub fn new(audit: Arc<AuditRecorder>) -> Self {
        Self { audit }
    }

    pub fn get(&self, conn: &Connection, id: &str) -> Result<SprintRow, StorageError> {
        sprints::get_sprint(conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("sprint {} not found", id)))
    }

    pub fn list(&self, conn: &Connection, project_id: &str) -> Result<Vec<SprintRow>, StorageError> {
        if projects::get_project(conn, project_id)?.is_none() {
            return Err(StorageError::NotFound(format!("project {} not found", project_id)));
        }
        sprints::list_sprints(conn, project_id)
    }

    pub fn create(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        project_id: &str,
        input: CreateSprintInput,
    ) -> Result<SprintRow, StorageError> {
        if projects::get_project(conn, project_id)?.is_none() {
            return Err(StorageError::NotFound(format!("project {} not found", project_id)));
        }

        let now = clock::next_write_ms();
        let sprint = SprintRow {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: required_text("name", &input.name, MAX_NAME_LEN)?,
            goal: optional_text("goal", input.goal, MAX_GOAL_LEN)?,
            status: input.status.unwrap_or(SprintStatus::Planned),
            starts_at: optional_timestamp("startsAt", input.starts_at)?,
            ends_at: optional_timestamp("endsAt", input.ends_at)?,
            created_at: now,
            updated_at: now,
        };
        validate_window(&sprint)?;

        if sprint.status == SprintStatus::Active {
            ensure_no_other_active(conn, project_id, None)?;
        }

        sprints::insert_sprint(conn, &sprint).map_err(translate_active_violation)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("sprint.created", "sprint", &sprint.id, Some(project_id), created_diff(&sprint)),
        );
        Ok(sprint)
    }

    pub fn patch(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
        patch: SprintPatch,
    ) -> Result<SprintRow, StorageError> {
        if patch.is_empty() {
            return Err(StorageError::Validation("patch must change at least one field".into()));
        }

        let current = self.get(conn, id)?;
        let mut next = current.clone();

        if let Some(name) = patch.name {
            next.name = required_text("name", &name, MAX_NAME_LEN)?;
        }
        if let Some(goal) = patch.goal {
            next.goal = optional_text("goal", goal, MAX_GOAL_LEN)?;
        }
        if let Some(starts_at) = patch.starts_at {
            next.starts_at = optional_timestamp("startsAt", starts_at)?;
        }
        if let Some(ends_at) = patch.ends_at {
            next.ends_at = optional_timestamp("endsAt", ends_at)?;
        }
        if let Some(status) = patch.status {
            if !current.status.can_transition_to(status) {
                return Err(StorageError::conflict(format!(
                    "sprint cannot move from {} to {}",
                    current.status, status
                )));
            }
            next.status = status;
        }
        validate_window(&next)?;

        let mut changes = ChangeSet::new();
        changes.track("name", &current.name, &next.name);
        changes.track("goal", &current.goal, &next.goal);
        changes.track("status", &current.status, &next.status);
        changes.track("startsAt", &current.starts_at, &next.starts_at);
        changes.track("endsAt", &current.ends_at, &next.ends_at);
        if changes.is_empty() {
            return Ok(current);
        }

        if changes.contains("status") && next.status == SprintStatus::Active {
            ensure_no_other_active(conn, &current.project_id, Some(id))?;
        }

        next.updated_at = clock::next_write_ms();
        sprints::update_sprint(conn, &next).map_err(translate_active_violation)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("sprint.updated", "sprint", id, Some(&current.project_id), changes.into_diff()),
        );
        Ok(next)
    }
}

fn validate_window(sprint: &SprintRow) -> Result<(), StorageError> {
    if let (Some(starts), Some(ends)) = (&sprint.starts_at, &sprint.ends_at) {
        // normalized RFC 3339 UTC strings order lexicographically
        if ends < starts {
            return Err(StorageError::Validation("endsAt must not be before startsAt".into()));
        }
    }
    Ok(())
}

fn ensure_no_other_active(
    conn: &Connection,
    project_id: &str,
    exclude_id: Option<&str>,
) -> Result<(), StorageError> {
    if let Some(active) = sprints::find_active_sprint(conn, project_id, exclude_id)? {
        return Err(StorageError::conflict(format!(
            "project already has an active sprint ({})",
            active
        )));
    }
    Ok(())
}

/// `idx_sprints_one_active` hit from a concurrent activation
fn translate_active_violation(e: StorageError) -> StorageError {
    if e.is_unique_violation() {
        StorageError::conflict("project already has an active sprint")
    } else {
        e
    }
}
