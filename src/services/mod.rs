//! Service layer for sprint-storage
//!
//! Services hold the business rules between the API router and the
//! repositories. Every operation takes the `&Connection` of the request
//! transaction it runs in, so domain writes, graph recompute, audit events
//! and the idempotency capture all commit or roll back together.
//!
//! ## Architecture
//!
//! ```text
//! HTTP server (hyper)
//!     ↓
//! Api router + idempotency guard
//!     ↓
//! Service layer (validation, graph, audit)
//!     ↓
//! Repository layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod input;
pub mod audit;
pub mod graph;
pub mod idempotency;
pub mod project_service;
pub mod sprint_service;
pub mod story_service;
pub mod note_service;
pub mod file_service;
pub mod session_service;
pub mod batch;

// Re-exports
pub use response::ApiResponse;
pub use audit::AuditRecorder;
pub use graph::DependencyGraph;
pub use idempotency::IdempotencyGuard;
pub use project_service::ProjectService;
pub use sprint_service::SprintService;
pub use story_service::StoryService;
pub use note_service::NoteService;
pub use file_service::FileService;
pub use session_service::SessionService;
pub use batch::BatchCoordinator;

use std::sync::Arc;

use crate::config::Config;

pub const DEFAULT_ACTOR: &str = "anonymous";
pub const DEFAULT_SOURCE: &str = "api";

/// Who is making the request and through which surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: String,
    pub source: String,
}

impl RequestContext {
    /// Blank or missing values fall back to the defaults
    pub fn new(actor: Option<&str>, source: Option<&str>) -> Self {
        Self {
            actor: non_blank_or(actor, DEFAULT_ACTOR),
            source: non_blank_or(source, DEFAULT_SOURCE),
        }
    }

    pub fn with_source(&self, source: &str) -> Self {
        Self {
            actor: self.actor.clone(),
            source: source.to_string(),
        }
    }
}

fn non_blank_or(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Service container
///
/// Holds every service with the shared graph engine and audit recorder.
pub struct Services {
    pub projects: Arc<ProjectService>,
    pub sprints: Arc<SprintService>,
    pub stories: Arc<StoryService>,
    pub notes: Arc<NoteService>,
    pub files: Arc<FileService>,
    pub sessions: Arc<SessionService>,
    pub batch: Arc<BatchCoordinator>,
    pub graph: Arc<DependencyGraph>,
    pub audit: Arc<AuditRecorder>,
    pub idempotency: Arc<IdempotencyGuard>,
}

impl Services {
    pub fn new(config: &Config) -> Self {
        let audit = Arc::new(AuditRecorder::new());
        let graph = Arc::new(DependencyGraph::new());
        let stories = Arc::new(StoryService::new(graph.clone(), audit.clone()));

        Self {
            projects: Arc::new(ProjectService::new(audit.clone())),
            sprints: Arc::new(SprintService::new(audit.clone())),
            notes: Arc::new(NoteService::new(audit.clone())),
            files: Arc::new(FileService::new(audit.clone())),
            sessions: Arc::new(SessionService::new(audit.clone())),
            batch: Arc::new(BatchCoordinator::new(stories.clone(), config.max_batch_items)),
            idempotency: Arc::new(IdempotencyGuard::new(config.idempotency_ttl_ms())),
            stories,
            graph,
            audit,
        }
    }
}
