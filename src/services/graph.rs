//! Dependency graph engine
//!
//! Owns the "story depends on story" edges and the derived `blocked` state.
//! A story is blocked while at least one of its direct targets is not
//! completed. The property is one hop, so a status change only needs to
//! revisit the stories pointing straight at the changed one.

use std::collections::HashSet;

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::clock;
use crate::db::dependencies::{self, DependencyRow};
use crate::db::models::{DependencyType, StoryStatus};
use crate::db::stories;
use crate::error::StorageError;

/// Recomputed `blocked` value of one story
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedState {
    pub story_id: String,
    pub blocked: bool,
}

/// Edge operations over the dependency graph
#[derive(Debug, Default)]
pub struct DependencyGraph;

impl DependencyGraph {
    pub fn new() -> Self {
        Self
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Add `story_id -> depends_on_story_id`. Returns the edge and the
    /// recomputed `blocked` of `story_id`.
    pub fn add_edge(
        &self,
        conn: &Connection,
        story_id: &str,
        depends_on_story_id: &str,
        dependency_type: DependencyType,
    ) -> Result<(DependencyRow, bool), StorageError> {
        if story_id == depends_on_story_id {
            return Err(StorageError::Validation(
                "a story cannot depend on itself".into(),
            ));
        }

        let story = stories::get_story(conn, story_id)?
            .ok_or_else(|| StorageError::NotFound(format!("story {} not found", story_id)))?;
        let target = stories::get_story(conn, depends_on_story_id)?.ok_or_else(|| {
            StorageError::NotFound(format!("story {} not found", depends_on_story_id))
        })?;

        if story.project_id != target.project_id {
            return Err(StorageError::Validation(
                "dependencies must link stories of the same project".into(),
            ));
        }

        if dependencies::find_pair(conn, story_id, depends_on_story_id)?.is_some() {
            return Err(StorageError::conflict("dependency already exists"));
        }

        if self.would_create_cycle(conn, story_id, depends_on_story_id)? {
            return Err(StorageError::Validation(
                "this dependency would create a cycle".into(),
            ));
        }

        let edge = DependencyRow {
            id: Uuid::new_v4().to_string(),
            story_id: story_id.to_string(),
            depends_on_story_id: depends_on_story_id.to_string(),
            dependency_type,
            created_at: clock::next_write_ms(),
        };

        dependencies::insert_dependency(conn, &edge).map_err(|e| {
            if e.is_unique_violation() {
                StorageError::conflict("dependency already exists")
            } else {
                e
            }
        })?;

        let blocked = self.compute_blocked(conn, story_id)?;
        debug!(story_id = %story_id, blocked, "Recomputed blocked after edge add");
        Ok((edge, blocked))
    }

    /// Remove an edge. Returns the removed edge and the recomputed `blocked`
    /// of its owning story.
    pub fn remove_edge(
        &self,
        conn: &Connection,
        edge_id: &str,
    ) -> Result<(DependencyRow, bool), StorageError> {
        let edge = dependencies::get_dependency(conn, edge_id)?
            .ok_or_else(|| StorageError::NotFound(format!("dependency {} not found", edge_id)))?;

        dependencies::delete_dependency(conn, edge_id)?;

        let blocked = self.compute_blocked(conn, &edge.story_id)?;
        debug!(story_id = %edge.story_id, blocked, "Recomputed blocked after edge removal");
        Ok((edge, blocked))
    }

    /// Outgoing edges of a story
    pub fn dependencies_of(
        &self,
        conn: &Connection,
        story_id: &str,
    ) -> Result<Vec<DependencyRow>, StorageError> {
        dependencies::list_for_story(conn, story_id)
    }

    // =========================================================================
    // Derived state
    // =========================================================================

    /// True iff any direct target of `story_id` is not completed
    pub fn compute_blocked(&self, conn: &Connection, story_id: &str) -> Result<bool, StorageError> {
        dependencies::has_open_dependency(conn, story_id)
    }

    /// Recompute `blocked` for every direct dependent of `story_id`
    pub fn on_story_status_changed(
        &self,
        conn: &Connection,
        story_id: &str,
        new_status: StoryStatus,
    ) -> Result<Vec<BlockedState>, StorageError> {
        let affected = self.recompute_dependents(conn, &dependencies::dependents_of(conn, story_id)?)?;
        debug!(
            story_id = %story_id,
            status = %new_status,
            dependents = affected.len(),
            "Recomputed blocked for dependents"
        );
        Ok(affected)
    }

    /// Recompute `blocked` for an explicit list of stories, e.g. the former
    /// dependents of a deleted story.
    pub fn recompute_dependents(
        &self,
        conn: &Connection,
        story_ids: &[String],
    ) -> Result<Vec<BlockedState>, StorageError> {
        story_ids
            .iter()
            .map(|id| {
                Ok(BlockedState {
                    story_id: id.clone(),
                    blocked: self.compute_blocked(conn, id)?,
                })
            })
            .collect()
    }

    /// Adding `story_id -> depends_on_story_id` closes a cycle iff the target
    /// already reaches `story_id`.
    pub fn would_create_cycle(
        &self,
        conn: &Connection,
        story_id: &str,
        depends_on_story_id: &str,
    ) -> Result<bool, StorageError> {
        let mut visited = HashSet::new();
        let mut stack = vec![depends_on_story_id.to_string()];

        while let Some(current) = stack.pop() {
            if current == story_id {
                return Ok(true);
            }

            if !visited.insert(current.clone()) {
                continue;
            }

            for next in dependencies::targets_of(conn, &current)? {
                if !visited.contains(&next) {
                    stack.push(next);
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::projects::{self, ProjectRow};
    use crate::db::stories::StoryRow;
    use crate::db::SprintDb;

    fn seed_project(conn: &Connection, id: &str) {
        projects::insert_project(
            conn,
            &ProjectRow {
                id: id.into(),
                name: id.into(),
                description: None,
                created_at: 1,
                updated_at: 1,
            },
        )
        .unwrap();
    }

    fn seed_story(conn: &Connection, id: &str, project_id: &str, status: StoryStatus) {
        let ts = clock::next_write_ms();
        stories::insert_story(
            conn,
            &StoryRow {
                id: id.into(),
                project_id: project_id.into(),
                sprint_id: None,
                title: id.into(),
                description: None,
                status,
                priority: Default::default(),
                assignee: None,
                due_at: None,
                blocked: false,
                created_at: ts,
                updated_at: ts,
            },
        )
        .unwrap();
    }

    fn set_status(conn: &Connection, id: &str, status: StoryStatus) {
        conn.execute(
            "UPDATE stories SET status = ? WHERE id = ?",
            rusqlite::params![status, id],
        )
        .unwrap();
    }

    fn setup() -> SprintDb {
        let db = SprintDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed_project(conn, "p1");
            seed_project(conn, "p2");
            for id in ["a", "b", "c", "d"] {
                seed_story(conn, id, "p1", StoryStatus::Waiting);
            }
            seed_story(conn, "x", "p2", StoryStatus::Waiting);
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_add_edge_blocks_until_target_completes() {
        let db = setup();
        let graph = DependencyGraph::new();
        db.with_conn(|conn| {
            let (edge, blocked) = graph.add_edge(conn, "a", "b", DependencyType::default())?;
            assert_eq!(edge.dependency_type, DependencyType::FinishToStart);
            assert!(blocked);
            assert!(stories::get_story(conn, "a")?.unwrap().blocked);

            set_status(conn, "b", StoryStatus::Completed);
            let affected = graph.on_story_status_changed(conn, "b", StoryStatus::Completed)?;
            assert_eq!(
                affected,
                vec![BlockedState { story_id: "a".into(), blocked: false }]
            );
            assert!(!stories::get_story(conn, "a")?.unwrap().blocked);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_add_edge_rejections() {
        let db = setup();
        let graph = DependencyGraph::new();
        db.with_conn(|conn| {
            let err = graph.add_edge(conn, "a", "a", DependencyType::default()).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");

            let err = graph.add_edge(conn, "a", "missing", DependencyType::default()).unwrap_err();
            assert_eq!(err.code(), "NOT_FOUND");

            let err = graph.add_edge(conn, "a", "x", DependencyType::default()).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");

            graph.add_edge(conn, "a", "b", DependencyType::default())?;
            let err = graph.add_edge(conn, "a", "b", DependencyType::StartToStart).unwrap_err();
            assert_eq!(err.code(), "CONFLICT");
            assert_eq!(err.public_message(), "dependency already exists");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cycles_are_rejected_and_graph_stays_acyclic() {
        let db = setup();
        let graph = DependencyGraph::new();
        db.with_conn(|conn| {
            graph.add_edge(conn, "a", "b", DependencyType::default())?;
            graph.add_edge(conn, "b", "c", DependencyType::default())?;
            graph.add_edge(conn, "c", "d", DependencyType::StartToStart)?;

            for (from, to) in [("d", "a"), ("c", "a"), ("b", "a"), ("d", "b")] {
                let err = graph.add_edge(conn, from, to, DependencyType::default()).unwrap_err();
                assert_eq!(err.code(), "VALIDATION_ERROR", "{} -> {}", from, to);
            }

            // a diamond is fine
            graph.add_edge(conn, "a", "d", DependencyType::default())?;

            for id in ["a", "b", "c", "d"] {
                for dep in graph.dependencies_of(conn, id)? {
                    // an existing edge whose target reaches back to its source is a cycle
                    assert!(!graph.would_create_cycle(conn, &dep.story_id, &dep.depends_on_story_id)?);
                }
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_remove_edge_unblocks() {
        let db = setup();
        let graph = DependencyGraph::new();
        db.with_conn(|conn| {
            let (edge, _) = graph.add_edge(conn, "a", "b", DependencyType::default())?;
            let (removed, blocked) = graph.remove_edge(conn, &edge.id)?;
            assert_eq!(removed.id, edge.id);
            assert!(!blocked);

            let err = graph.remove_edge(conn, &edge.id).unwrap_err();
            assert_eq!(err.code(), "NOT_FOUND");
            Ok(())
        })
        .unwrap();
    }
}
