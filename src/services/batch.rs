//! Batch mutation coordinator
//!
//! Applies a list of story moves or patches in input order. Each item runs in
//! its own savepoint nested inside a batch savepoint, so a failed item can be
//! undone alone (partial mode) and the whole batch can be undone at once
//! (`all_or_nothing` failures and dry runs).

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::db::{rollback_savepoint, with_savepoint};
use crate::error::StorageError;

use super::input::decode;
use super::story_service::{StoryMove, StoryPatch, StoryService};
use super::RequestContext;

const BATCH_SAVEPOINT: &str = "batch";
const ITEM_SAVEPOINT: &str = "batch_item";

/// Which single-item operation every item maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Move,
    Patch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRequest {
    pub items: Vec<Value>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub all_or_nothing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub dry_run: bool,
    pub results: Vec<ItemResult>,
}

enum ItemOp {
    Move(StoryMove),
    Patch(StoryPatch),
}

/// Batch mutation coordinator
pub struct BatchCoordinator {
    stories: Arc<StoryService>,
    max_items: usize,
}

impl BatchCoordinator {
    pub fn new(stories: Arc<StoryService>, max_items: usize) -> Self {
        Self { stories, max_items }
    }

    pub fn run(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        kind: BatchKind,
        request: BatchRequest,
    ) -> Result<BatchOutcome, StorageError> {
        if request.items.is_empty() || request.items.len() > self.max_items {
            return Err(StorageError::Validation(format!(
                "items must contain between 1 and {} entries",
                self.max_items
            )));
        }

        let ctx = ctx.with_source("batch");
        let dry_run = request.dry_run;
        let all_or_nothing = request.all_or_nothing;
        let total = request.items.len();

        conn.execute_batch(&format!("SAVEPOINT {}", BATCH_SAVEPOINT))?;

        let mut results = Vec::with_capacity(total);
        let mut aborted = false;
        for (index, item) in request.items.into_iter().enumerate() {
            let (id, outcome) = self.apply_item(conn, &ctx, kind, item);
            match outcome {
                Ok(()) => results.push(ItemResult { id, ok: true, error: None }),
                Err(e) if e.status().is_server_error() => {
                    rollback_savepoint(conn, BATCH_SAVEPOINT)?;
                    return Err(e);
                }
                Err(e) => {
                    debug!(index, code = e.code(), "Batch item failed");
                    results.push(ItemResult {
                        id,
                        ok: false,
                        error: Some(ItemError {
                            code: e.code().to_string(),
                            message: e.public_message(),
                        }),
                    });
                    // a dry run reports every item's outcome
                    if all_or_nothing && !dry_run {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if dry_run || aborted {
            rollback_savepoint(conn, BATCH_SAVEPOINT)?;
        } else {
            conn.execute_batch(&format!("RELEASE {}", BATCH_SAVEPOINT))?;
        }

        let succeeded = results.iter().filter(|r| r.ok).count();
        info!(
            kind = ?kind,
            total,
            succeeded,
            dry_run,
            all_or_nothing,
            committed = !(dry_run || aborted),
            "Batch processed"
        );

        if aborted {
            return Err(StorageError::conflict_with(
                format!("batch aborted at item {}; no changes were applied", results.len()),
                json!({ "dry_run": dry_run, "results": results }),
            ));
        }

        Ok(BatchOutcome { dry_run, results })
    }

    /// Parse and apply one item inside its own savepoint
    fn apply_item(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        kind: BatchKind,
        item: Value,
    ) -> (Option<String>, Result<(), StorageError>) {
        let (id, op) = match parse_item(kind, item) {
            Ok(parsed) => parsed,
            Err((id, e)) => return (id, Err(e)),
        };

        let outcome = with_savepoint(conn, ITEM_SAVEPOINT, |conn| match op {
            ItemOp::Move(mv) => self.stories.move_story(conn, ctx, &id, mv).map(|_| ()),
            ItemOp::Patch(patch) => self.stories.patch(conn, ctx, &id, patch).map(|_| ()),
        });
        (Some(id), outcome)
    }
}

/// Split `{id, ...payload}` into the story id and the typed payload
fn parse_item(kind: BatchKind, item: Value) -> Result<(String, ItemOp), (Option<String>, StorageError)> {
    let Value::Object(mut object) = item else {
        return Err((None, StorageError::Validation("batch item must be an object".into())));
    };

    let id = match object.remove("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        _ => {
            return Err((
                None,
                StorageError::Validation("batch item requires a string id".into()),
            ))
        }
    };

    let payload = Value::Object(object);
    let op = match kind {
        BatchKind::Move => decode(payload).map(ItemOp::Move),
        BatchKind::Patch => decode(payload).map(ItemOp::Patch),
    };
    match op {
        Ok(op) => Ok((id, op)),
        Err(e) => Err((Some(id), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_splits_id() {
        let (id, op) = parse_item(BatchKind::Move, json!({"id": "s1", "status": "completed"})).unwrap();
        assert_eq!(id, "s1");
        assert!(matches!(op, ItemOp::Move(StoryMove { status: Some(_), sprint_id: None })));

        let (id, err) = parse_item(BatchKind::Patch, json!({"id": "s1", "status": "completed"})).err().unwrap();
        assert_eq!(id.as_deref(), Some("s1"));
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let (id, _) = parse_item(BatchKind::Move, json!({"status": "completed"})).err().unwrap();
        assert_eq!(id, None);
        assert!(parse_item(BatchKind::Move, json!([1])).is_err());
    }
}
