//! Story service - business logic for the board
//!
//! Wraps the story and dependency repositories with validation, sprint
//! membership rules, audit events and `blocked` recompute through the
//! dependency graph engine. Batch items call the same `move_story` and
//! `patch` entry points as single requests.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;
use crate::db::dependencies::DependencyRow;
use crate::db::models::{double_option, DependencyType, Priority, SprintStatus, StoryStatus};
use crate::db::stories::{self, StoryFilter, StoryRow};
use crate::db::{dependencies, projects, sprints};
use crate::error::StorageError;
use crate::pagination::{Page, PageRequest};

use super::audit::{created_diff, deleted_diff, AuditEntry, AuditRecorder, ChangeSet};
use super::graph::{BlockedState, DependencyGraph};
use super::input::{optional_text, optional_timestamp, required_text};
use super::RequestContext;

const MAX_TITLE_LEN: usize = 500;
const MAX_DESCRIPTION_LEN: usize = 20_000;
const MAX_ASSIGNEE_LEN: usize = 200;

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateStoryInput {
    pub project_id: String,
    #[serde(default)]
    pub sprint_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<StoryStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub due_at: Option<String>,
}

/// Content fields of a story. Status and sprint change through moves.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoryPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_at: Option<Option<String>>,
}

impl StoryPatch {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.assignee.is_none()
            && self.due_at.is_none()
    }
}

/// Board move: new column and/or sprint. `sprintId: null` leaves the sprint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoryMove {
    #[serde(default)]
    pub status: Option<StoryStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub sprint_id: Option<Option<String>>,
}

impl StoryMove {
    fn is_empty(&self) -> bool {
        self.status.is_none() && self.sprint_id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddDependencyInput {
    pub depends_on_story_id: String,
    #[serde(rename = "type", default)]
    pub dependency_type: DependencyType,
}

// =============================================================================
// Results
// =============================================================================

/// Story after a move, with the recomputed state of its dependents
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovedStory {
    #[serde(flatten)]
    pub story: StoryRow,
    pub dependents: Vec<BlockedState>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedStory {
    pub id: String,
    pub deleted: bool,
    pub dependents: Vec<BlockedState>,
}

/// New edge plus the owning story's `blocked`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDependency {
    #[serde(flatten)]
    pub dependency: DependencyRow,
    pub story_blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedDependency {
    pub id: String,
    pub deleted: bool,
    pub story_id: String,
    pub story_blocked: bool,
}

/// Story service
pub struct StoryService {
    graph: Arc<DependencyGraph>,
    audit: Arc<AuditRecorder>,
}

impl StoryService {
    pub fn new(graph: Arc<DependencyGraph>, audit: Arc<AuditRecorder>) -> Self {
        Self { graph, audit }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, conn: &Connection, id: &str) -> Result<StoryRow, StorageError> {
        stories::get_story(conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("story {} not found", id)))
    }

    /// Newest-updated first
    pub fn list(
        &self,
        conn: &Connection,
        filter: &StoryFilter,
        page: &PageRequest,
    ) -> Result<Page<StoryRow>, StorageError> {
        let rows = stories::list_stories(conn, filter, page)?;
        Ok(Page::from_rows(rows, page.limit, StoryRow::cursor))
    }

    pub fn dependencies(&self, conn: &Connection, story_id: &str) -> Result<Vec<DependencyRow>, StorageError> {
        self.get(conn, story_id)?;
        self.graph.dependencies_of(conn, story_id)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn create(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        input: CreateStoryInput,
    ) -> Result<StoryRow, StorageError> {
        if projects::get_project(conn, &input.project_id)?.is_none() {
            return Err(StorageError::NotFound(format!("project {} not found", input.project_id)));
        }
        if let Some(ref sprint_id) = input.sprint_id {
            ensure_assignable_sprint(conn, &input.project_id, sprint_id)?;
        }

        let now = clock::next_write_ms();
        let story = StoryRow {
            id: Uuid::new_v4().to_string(),
            project_id: input.project_id,
            sprint_id: input.sprint_id,
            title: required_text("title", &input.title, MAX_TITLE_LEN)?,
            description: optional_text("description", input.description, MAX_DESCRIPTION_LEN)?,
            status: input.status.unwrap_or_default(),
            priority: input.priority.unwrap_or_default(),
            assignee: optional_text("assignee", input.assignee, MAX_ASSIGNEE_LEN)?,
            due_at: optional_timestamp("dueAt", input.due_at)?,
            blocked: false,
            created_at: now,
            updated_at: now,
        };

        stories::insert_story(conn, &story)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("story.created", "story", &story.id, Some(&story.project_id), created_diff(&story)),
        );
        Ok(story)
    }

    /// Update content fields. A patch that changes nothing writes nothing.
    pub fn patch(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
        patch: StoryPatch,
    ) -> Result<StoryRow, StorageError> {
        if patch.is_empty() {
            return Err(StorageError::Validation("patch must change at least one field".into()));
        }

        let current = self.get(conn, id)?;
        let mut next = current.clone();

        if let Some(title) = patch.title {
            next.title = required_text("title", &title, MAX_TITLE_LEN)?;
        }
        if let Some(description) = patch.description {
            next.description = optional_text("description", description, MAX_DESCRIPTION_LEN)?;
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(assignee) = patch.assignee {
            next.assignee = optional_text("assignee", assignee, MAX_ASSIGNEE_LEN)?;
        }
        if let Some(due_at) = patch.due_at {
            next.due_at = optional_timestamp("dueAt", due_at)?;
        }

        let mut changes = ChangeSet::new();
        changes.track("title", &current.title, &next.title);
        changes.track("description", &current.description, &next.description);
        changes.track("priority", &current.priority, &next.priority);
        changes.track("assignee", &current.assignee, &next.assignee);
        changes.track("dueAt", &current.due_at, &next.due_at);
        if changes.is_empty() {
            return Ok(current);
        }

        next.updated_at = clock::next_write_ms();
        stories::update_story(conn, &next)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("story.updated", "story", id, Some(&current.project_id), changes.into_diff()),
        );
        Ok(next)
    }

    /// Change status and/or sprint. A status change recomputes `blocked` for
    /// the story's direct dependents.
    pub fn move_story(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
        mv: StoryMove,
    ) -> Result<MovedStory, StorageError> {
        if mv.is_empty() {
            return Err(StorageError::Validation("move must set status or sprintId".into()));
        }

        let current = self.get(conn, id)?;
        let mut next = current.clone();

        if let Some(sprint_id) = mv.sprint_id {
            if let Some(ref sprint_id) = sprint_id {
                if current.sprint_id.as_deref() != Some(sprint_id.as_str()) {
                    ensure_assignable_sprint(conn, &current.project_id, sprint_id)?;
                }
            }
            next.sprint_id = sprint_id;
        }
        if let Some(status) = mv.status {
            next.status = status;
        }

        let mut changes = ChangeSet::new();
        changes.track("status", &current.status, &next.status);
        changes.track("sprintId", &current.sprint_id, &next.sprint_id);
        if changes.is_empty() {
            return Ok(MovedStory {
                story: current,
                dependents: Vec::new(),
            });
        }
        let status_changed = changes.contains("status");

        next.updated_at = clock::next_write_ms();
        stories::update_story(conn, &next)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("story.moved", "story", id, Some(&current.project_id), changes.into_diff()),
        );

        let dependents = if status_changed {
            self.graph.on_story_status_changed(conn, id, next.status)?
        } else {
            Vec::new()
        };

        Ok(MovedStory {
            story: next,
            dependents,
        })
    }

    /// Delete a story. Its edges and notes cascade; former dependents are
    /// recomputed after the delete.
    pub fn delete(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<DeletedStory, StorageError> {
        let current = self.get(conn, id)?;
        let dependents = dependencies::dependents_of(conn, id)?;

        stories::delete_story(conn, id)?;
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new("story.deleted", "story", id, Some(&current.project_id), deleted_diff(&current)),
        );

        Ok(DeletedStory {
            id: id.to_string(),
            deleted: true,
            dependents: self.graph.recompute_dependents(conn, &dependents)?,
        })
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    pub fn add_dependency(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        story_id: &str,
        input: AddDependencyInput,
    ) -> Result<CreatedDependency, StorageError> {
        let target = input.depends_on_story_id.trim();
        let (dependency, story_blocked) =
            self.graph.add_edge(conn, story_id, target, input.dependency_type)?;

        let project_id = stories::get_story(conn, story_id)?.map(|s| s.project_id);
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new(
                "dependency.created",
                "dependency",
                &dependency.id,
                project_id.as_deref(),
                created_diff(&dependency),
            ),
        );

        Ok(CreatedDependency {
            dependency,
            story_blocked,
        })
    }

    pub fn remove_dependency(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        dependency_id: &str,
    ) -> Result<DeletedDependency, StorageError> {
        let (dependency, story_blocked) = self.graph.remove_edge(conn, dependency_id)?;

        let project_id = stories::get_story(conn, &dependency.story_id)?.map(|s| s.project_id);
        self.audit.record(
            conn,
            ctx,
            AuditEntry::new(
                "dependency.deleted",
                "dependency",
                &dependency.id,
                project_id.as_deref(),
                deleted_diff(&dependency),
            ),
        );

        Ok(DeletedDependency {
            id: dependency.id,
            deleted: true,
            story_id: dependency.story_id,
            story_blocked,
        })
    }
}

/// A story may join a sprint of its own project that is not closed
fn ensure_assignable_sprint(conn: &Connection, project_id: &str, sprint_id: &str) -> Result<(), StorageError> {
    let sprint = sprints::get_sprint(conn, sprint_id)?
        .ok_or_else(|| StorageError::NotFound(format!("sprint {} not found", sprint_id)))?;
    if sprint.project_id != project_id {
        return Err(StorageError::Validation(
            "sprint belongs to a different project".into(),
        ));
    }
    if sprint.status == SprintStatus::Closed {
        return Err(StorageError::conflict("sprint is closed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::projects::ProjectRow;
    use crate::db::sprints::SprintRow;
    use crate::db::{audit, SprintDb};
    use crate::services::input::decode;
    use serde_json::json;

    fn service() -> StoryService {
        StoryService::new(Arc::new(DependencyGraph::new()), Arc::new(AuditRecorder::new()))
    }

    fn setup() -> SprintDb {
        let db = SprintDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            for id in ["p1", "p2"] {
                projects::insert_project(
                    conn,
                    &ProjectRow {
                        id: id.into(),
                        name: id.into(),
                        description: None,
                        created_at: 1,
                        updated_at: 1,
                    },
                )?;
            }
            for (id, project, status) in [
                ("open", "p1", SprintStatus::Planned),
                ("closed", "p1", SprintStatus::Closed),
                ("foreign", "p2", SprintStatus::Planned),
            ] {
                sprints::insert_sprint(
                    conn,
                    &SprintRow {
                        id: id.into(),
                        project_id: project.into(),
                        name: id.into(),
                        goal: None,
                        status,
                        starts_at: None,
                        ends_at: None,
                        created_at: 1,
                        updated_at: 1,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    fn create(service: &StoryService, conn: &Connection, title: &str) -> StoryRow {
        service
            .create(
                conn,
                &RequestContext::default(),
                decode(json!({"projectId": "p1", "title": title})).unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let db = setup();
        let service = service();
        db.with_conn(|conn| {
            let story = create(&service, conn, "Write docs");
            assert_eq!(story.status, StoryStatus::Waiting);
            assert_eq!(story.priority, Priority::Medium);
            assert!(!story.blocked);
            assert_eq!(story.created_at, story.updated_at);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_sprint_membership_rules() {
        let db = setup();
        let service = service();
        let ctx = RequestContext::default();
        db.with_conn(|conn| {
            let story = create(&service, conn, "A");
            let mv = |sprint: &str| StoryMove {
                status: None,
                sprint_id: Some(Some(sprint.to_string())),
            };

            assert_eq!(service.move_story(conn, &ctx, &story.id, mv("closed")).unwrap_err().code(), "CONFLICT");
            assert_eq!(
                service.move_story(conn, &ctx, &story.id, mv("foreign")).unwrap_err().code(),
                "VALIDATION_ERROR"
            );
            assert_eq!(service.move_story(conn, &ctx, &story.id, mv("ghost")).unwrap_err().code(), "NOT_FOUND");

            let moved = service.move_story(conn, &ctx, &story.id, mv("open"))?;
            assert_eq!(moved.story.sprint_id.as_deref(), Some("open"));

            let removed = service.move_story(conn, &ctx, &story.id, decode(json!({"sprintId": null}))?)?;
            assert_eq!(removed.story.sprint_id, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_noop_patch_writes_nothing() {
        let db = setup();
        let service = service();
        let ctx = RequestContext::default();
        db.with_conn(|conn| {
            let story = create(&service, conn, "A");
            let before = audit::count_for_entity(conn, &story.id)?;

            let same = service.patch(conn, &ctx, &story.id, decode(json!({"title": "A"}))?)?;
            assert_eq!(same.updated_at, story.updated_at);
            assert_eq!(audit::count_for_entity(conn, &story.id)?, before);

            let err = service.patch(conn, &ctx, &story.id, StoryPatch::default()).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");

            let err = decode::<StoryPatch>(json!({"status": "completed"})).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_move_recomputes_dependents_and_delete_unblocks() {
        let db = setup();
        let service = service();
        let ctx = RequestContext::default();
        db.with_conn(|conn| {
            let a = create(&service, conn, "A");
            let b = create(&service, conn, "B");

            let dep = service.add_dependency(
                conn,
                &ctx,
                &a.id,
                decode(json!({"dependsOnStoryId": b.id}))?,
            )?;
            assert!(dep.story_blocked);

            let moved = service.move_story(conn, &ctx, &b.id, decode(json!({"status": "completed"}))?)?;
            assert_eq!(
                moved.dependents,
                vec![BlockedState { story_id: a.id.clone(), blocked: false }]
            );
            assert!(!service.get(conn, &a.id)?.blocked);

            service.move_story(conn, &ctx, &b.id, decode(json!({"status": "in_progress"}))?)?;
            assert!(service.get(conn, &a.id)?.blocked);

            let deleted = service.delete(conn, &ctx, &b.id)?;
            assert_eq!(
                deleted.dependents,
                vec![BlockedState { story_id: a.id.clone(), blocked: false }]
            );
            assert!(service.dependencies(conn, &a.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_pages_by_updated_at() {
        let db = setup();
        let service = service();
        let config = Config::default();
        db.with_conn(|conn| {
            let ids: Vec<String> = (0..5).map(|i| create(&service, conn, &format!("S{}", i)).id).collect();

            let filter = StoryFilter {
                project_id: Some("p1".into()),
                ..Default::default()
            };
            let first = service.list(conn, &filter, &PageRequest::from_query(Some("3"), None, &config)?)?;
            assert_eq!(first.data.len(), 3);
            assert_eq!(first.data[0].id, ids[4]);
            assert!(first.info.has_more);

            let second = service.list(
                conn,
                &filter,
                &PageRequest::from_query(Some("3"), first.info.next_cursor.as_deref(), &config)?,
            )?;
            let seen: Vec<&str> = first.data.iter().chain(second.data.iter()).map(|s| s.id.as_str()).collect();
            assert_eq!(seen.len(), 5);
            assert!(!second.info.has_more);
            Ok(())
        })
        .unwrap();
    }
}
