//! Project service - top-level containers for sprints, stories and files

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;
use crate::db::models::double_option;
use crate::db::projects::{self, ProjectRow};
use crate::error::StorageError;

use super::audit::{created_diff, deleted_diff, AuditEntry, AuditRecorder, ChangeSet};
use super::input::{optional_text, required_text};
use super::RequestContext;

const MAX_NAME_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateProjectInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

/// Result of a project delete
#[derive(Debug, Clone, Serialize)]
pub struct DeletedProject {
    pub id: String,
    pub deleted: bool,
}

/// Project service
pub struct ProjectService {
    audit: Arc<AuditRecorder>,
}

impl ProjectService {
    pub fn new(audit: Arc<AuditRecorder>) -> Self {
        Self { audit }
    }

    pub fn get(&self, conn: &Connection, id: &str) -> Result<ProjectRow, StorageError> {
        projects::get_project(conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("project {} not found", id)))
    }

    pub fn list(&self, conn: &Connection) -> Result<Vec<ProjectRow>, StorageError> {
        projects::list_projects(conn)
    }

    pub fn create(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        input: CreateProjectInput,
    ) -> Result<ProjectRow, StorageError> {
        let now = clock::next_write_ms();
        let project = ProjectRow {
            id: Uuid::new_v4().to_string(),
            name: required_text("name", &input.name, MAX_NAME_LEN)?,
            description: optional_text("description", input.description, MAX_DESCRIPTION_LEN)?,
            created_at: now,
            updated_at: now,
        };

        projects::insert_project(conn, &project)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("project.created", "project", &project.id, Some(&project.id), created_diff(&project)),
        );
        Ok(project)
    }

    pub fn patch(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
        patch: ProjectPatch,
    ) -> Result<ProjectRow, StorageError> {
        if patch.name.is_none() && patch.description.is_none() {
            return Err(StorageError::Validation("patch must change at least one field".into()));
        }

        let current = self.get(conn, id)?;
        let mut next = current.clone();
        if let Some(name) = patch.name {
            next.name = required_text("name", &name, MAX_NAME_LEN)?;
        }
        if let Some(description) = patch.description {
            next.description = optional_text("description", description, MAX_DESCRIPTION_LEN)?;
        }

        let mut changes = ChangeSet::new();
        changes.track("name", &current.name, &next.name);
        changes.track("description", &current.description, &next.description);
        if changes.is_empty() {
            return Ok(current);
        }

        next.updated_at = clock::next_write_ms();
        projects::update_project(conn, &next)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("project.updated", "project", id, Some(id), changes.into_diff()),
        );
        Ok(next)
    }

    /// Delete a project and everything it owns
    pub fn delete(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<DeletedProject, StorageError> {
        let current = self.get(conn, id)?;
        projects::delete_project(conn, id)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("project.deleted", "project", id, Some(id), deleted_diff(&current)),
        );
        Ok(DeletedProject {
            id: id.to_string(),
            deleted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{audit, SprintDb};
    use crate::services::input::decode;
    use serde_json::json;

    #[test]
    fn test_create_patch_delete() {
        let db = SprintDb::open_in_memory().unwrap();
        let service = ProjectService::new(Arc::new(AuditRecorder::new()));
        let ctx = RequestContext::default();

        db.with_conn(|conn| {
            let project = service.create(
                conn,
                &ctx,
                CreateProjectInput { name: " Apollo ".into(), description: None },
            )?;
            assert_eq!(project.name, "Apollo");

            let patched = service.patch(
                conn,
                &ctx,
                &project.id,
                decode(json!({"description": "moon"}))?,
            )?;
            assert_eq!(patched.description.as_deref(), Some("moon"));
            assert!(patched.updated_at > project.updated_at);

            // same values again: no write, no event
            let events = audit::count_for_entity(conn, &project.id)?;
            service.patch(
                conn,
                &ctx,
                &project.id,
                decode(json!({"description": "moon"}))?,
            )?;
            assert_eq!(audit::count_for_entity(conn, &project.id)?, events);

            service.delete(conn, &ctx, &project.id)?;
            assert_eq!(service.get(conn, &project.id).unwrap_err().code(), "NOT_FOUND");
            assert_eq!(audit::count_for_entity(conn, &project.id)?, 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_empty_patch_rejected() {
        let db = SprintDb::open_in_memory().unwrap();
        let service = ProjectService::new(Arc::new(AuditRecorder::new()));
        db.with_conn(|conn| {
            let err = service
                .patch(conn, &RequestContext::default(), "p1", ProjectPatch::default())
                .unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");
            Ok(())
        })
        .unwrap();
    }
}
