//! Request router and write-path pipeline
//!
//! `Api::handle` is transport independent: the hyper server and the
//! integration tests both hand it an `ApiRequest` and get back the finished
//! status and body.
//!
//! Mutating requests run in one IMMEDIATE transaction:
//!
//! 1. idempotency check (replay or conflict short-circuits)
//! 2. the handler, inside a savepoint that is rolled back when it fails
//! 3. capture of the response for the idempotency key
//! 4. commit
//!
//! Audit events are written by the handlers on the same connection, so they
//! commit with the domain change or not at all.

use std::collections::BTreeMap;
use std::sync::Arc;

use hyper::{Method, StatusCode};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::clock;
use crate::config::Config;
use crate::db::audit::AuditQuery;
use crate::db::files::FileFilter;
use crate::db::models::StoryStatus;
use crate::db::stories::StoryFilter;
use crate::db::{with_savepoint, SprintDb};
use crate::error::StorageError;
use crate::pagination::PageRequest;
use crate::services::batch::{BatchKind, BatchRequest};
use crate::services::idempotency::{CaptureOutcome, GuardDecision, IdempotentRequest};
use crate::services::input::decode;
use crate::services::{ApiResponse, IdempotencyGuard, RequestContext, Services};

const REQUEST_SAVEPOINT: &str = "request";

// =============================================================================
// Routes
// =============================================================================

/// Every path the API serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Ready,
    Projects,
    Project(String),
    ProjectSprints(String),
    Sprint(String),
    Stories,
    Story(String),
    StoryMove(String),
    StoryDependencies(String),
    StoryNotes(String),
    BatchMove,
    BatchPatch,
    Dependency(String),
    Note(String),
    Files,
    AgentSessions,
    AgentSessionEvents(String),
    Audit,
}

impl Route {
    pub fn parse(path: &str) -> Option<Route> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let route = match segments.as_slice() {
            ["health"] => Route::Health,
            ["ready"] => Route::Ready,
            ["projects"] => Route::Projects,
            ["projects", p] => Route::Project(p.to_string()),
            ["projects", p, "sprints"] => Route::ProjectSprints(p.to_string()),
            ["sprints", s] => Route::Sprint(s.to_string()),
            ["stories"] => Route::Stories,
            ["stories", "batch", "move"] => Route::BatchMove,
            ["stories", "batch", "patch"] => Route::BatchPatch,
            ["stories", s] => Route::Story(s.to_string()),
            ["stories", s, "move"] => Route::StoryMove(s.to_string()),
            ["stories", s, "dependencies"] => Route::StoryDependencies(s.to_string()),
            ["stories", s, "notes"] => Route::StoryNotes(s.to_string()),
            ["dependencies", d] => Route::Dependency(d.to_string()),
            ["notes", n] => Route::Note(n.to_string()),
            ["files"] => Route::Files,
            ["agent", "sessions"] => Route::AgentSessions,
            ["agent", "sessions", s, "events"] => Route::AgentSessionEvents(s.to_string()),
            ["audit"] => Route::Audit,
            _ => return None,
        };
        Some(route)
    }

    /// Route template used for idempotency keys and fingerprints
    pub fn template(&self) -> &'static str {
        match self {
            Route::Health => "/health",
            Route::Ready => "/ready",
            Route::Projects => "/projects",
            Route::Project(_) => "/projects/:id",
            Route::ProjectSprints(_) => "/projects/:id/sprints",
            Route::Sprint(_) => "/sprints/:id",
            Route::Stories => "/stories",
            Route::Story(_) => "/stories/:id",
            Route::StoryMove(_) => "/stories/:id/move",
            Route::StoryDependencies(_) => "/stories/:id/dependencies",
            Route::StoryNotes(_) => "/stories/:id/notes",
            Route::BatchMove => "/stories/batch/move",
            Route::BatchPatch => "/stories/batch/patch",
            Route::Dependency(_) => "/dependencies/:id",
            Route::Note(_) => "/notes/:id",
            Route::Files => "/files",
            Route::AgentSessions => "/agent/sessions",
            Route::AgentSessionEvents(_) => "/agent/sessions/:id/events",
            Route::Audit => "/audit",
        }
    }

    /// Path parameters as a JSON object
    pub fn params(&self) -> Value {
        match self.id() {
            Some(id) => json!({ "id": id }),
            None => json!({}),
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            Route::Project(id)
            | Route::ProjectSprints(id)
            | Route::Sprint(id)
            | Route::Story(id)
            | Route::StoryMove(id)
            | Route::StoryDependencies(id)
            | Route::StoryNotes(id)
            | Route::Dependency(id)
            | Route::Note(id)
            | Route::AgentSessionEvents(id) => Some(id),
            _ => None,
        }
    }

    pub fn allows(&self, method: &Method) -> bool {
        let get = *method == Method::GET;
        let post = *method == Method::POST;
        let patch = *method == Method::PATCH;
        let delete = *method == Method::DELETE;
        match self {
            Route::Health | Route::Ready | Route::Audit => get,
            Route::Projects | Route::ProjectSprints(_) | Route::Stories | Route::Files => get || post,
            Route::StoryDependencies(_) | Route::StoryNotes(_) | Route::AgentSessionEvents(_) => get || post,
            Route::Project(_) | Route::Story(_) => get || patch || delete,
            Route::Sprint(_) => get || patch,
            Route::StoryMove(_) | Route::BatchMove | Route::BatchPatch | Route::AgentSessions => post,
            Route::Dependency(_) => delete,
            Route::Note(_) => patch,
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Transport-independent request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub body: Option<Value>,
    pub idempotency_key: Option<String>,
    pub actor: Option<String>,
    pub source: Option<String>,
}

impl ApiRequest {
    /// `target` is a path with an optional `?query`
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            body: None,
            idempotency_key: None,
            actor: None,
            source: None,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str, body: Value) -> Self {
        Self::new(Method::POST, target).json(body)
    }

    pub fn patch(target: &str, body: Value) -> Self {
        Self::new(Method::PATCH, target).json(body)
    }

    pub fn delete(target: &str) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Parse a raw body. Empty bodies are absent; anything else must be JSON.
    pub fn body_bytes(mut self, bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            self.body = None;
            return Ok(self);
        }
        let value = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::BadRequest(format!("malformed JSON body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn query_params(&self) -> Result<Query, StorageError> {
        let pairs: Vec<(String, String)> = match self.query.as_deref() {
            Some(raw) if !raw.is_empty() => serde_urlencoded::from_str(raw)
                .map_err(|e| StorageError::BadRequest(format!("malformed query string: {}", e)))?,
            _ => Vec::new(),
        };
        Ok(Query(pairs.into_iter().collect()))
    }
}

/// Decoded query string; the last value of a repeated name wins
struct Query(BTreeMap<String, String>);

impl Query {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn owned(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    fn page(&self, config: &Config) -> Result<PageRequest, StorageError> {
        PageRequest::from_query(self.get("limit"), self.get("cursor"), config)
    }

    fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

// =============================================================================
// Api
// =============================================================================

/// Router over the services
pub struct Api {
    db: Arc<SprintDb>,
    services: Services,
    config: Arc<Config>,
}

impl Api {
    pub fn new(db: Arc<SprintDb>, config: Arc<Config>) -> Self {
        let services = Services::new(&config);
        Self { db, services, config }
    }

    pub fn db(&self) -> &SprintDb {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve one request
    pub fn handle(&self, req: &ApiRequest) -> ApiResponse {
        let response = ApiResponse::from_result(self.dispatch(req));
        debug!(
            method = %req.method,
            path = %req.path,
            status = response.status.as_u16(),
            replayed = response.replayed,
            "Request handled"
        );
        response
    }

    /// Delete expired idempotency records
    pub fn purge_expired_idempotency(&self) -> Result<usize, StorageError> {
        self.db
            .with_conn(|conn| self.services.idempotency.purge_expired(conn))
    }

    fn dispatch(&self, req: &ApiRequest) -> Result<ApiResponse, StorageError> {
        let route = Route::parse(&req.path)
            .ok_or_else(|| StorageError::NotFound(format!("no route for {}", req.path)))?;
        if !route.allows(&req.method) {
            return Err(StorageError::MethodNotAllowed);
        }
        let query = req.query_params()?;

        match route {
            Route::Health => ApiResponse::ok(&json!({ "status": "ok" })),
            Route::Ready => {
                self.db.ping()?;
                ApiResponse::ok(&json!({ "status": "ready" }))
            }
            _ if req.method == Method::GET => self.db.with_conn(|conn| self.read(conn, &route, &query)),
            _ => self.execute_mutation(req, &route, &query),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn read(&self, conn: &Connection, route: &Route, query: &Query) -> Result<ApiResponse, StorageError> {
        let s = &self.services;
        match route {
            Route::Projects => ApiResponse::ok(&s.projects.list(conn)?),
            Route::Project(id) => ApiResponse::ok(&s.projects.get(conn, id)?),
            Route::ProjectSprints(id) => ApiResponse::ok(&s.sprints.list(conn, id)?),
            Route::Sprint(id) => ApiResponse::ok(&s.sprints.get(conn, id)?),
            Route::Stories => {
                let filter = StoryFilter {
                    project_id: query.owned("projectId"),
                    sprint_id: query.owned("sprintId"),
                    status: query.get("status").map(StoryStatus::parse).transpose()?,
                    assignee: query.owned("assignee"),
                    blocked: query.get("blocked").map(parse_bool("blocked")).transpose()?,
                };
                ApiResponse::page(&s.stories.list(conn, &filter, &query.page(&self.config)?)?)
            }
            Route::Story(id) => ApiResponse::ok(&s.stories.get(conn, id)?),
            Route::StoryDependencies(id) => ApiResponse::ok(&s.stories.dependencies(conn, id)?),
            Route::StoryNotes(id) => ApiResponse::ok(&s.notes.list(conn, id)?),
            Route::Files => {
                let filter = FileFilter {
                    project_id: query.owned("projectId"),
                    story_id: query.owned("storyId"),
                };
                ApiResponse::page(&s.files.list(conn, &filter, &query.page(&self.config)?)?)
            }
            Route::AgentSessionEvents(id) => {
                ApiResponse::page(&s.sessions.list_events(conn, id, &query.page(&self.config)?)?)
            }
            Route::Audit => {
                let audit_query = AuditQuery {
                    since_ms: query
                        .get("since")
                        .map(|v| clock::parse_rfc3339_ms("since", v))
                        .transpose()?,
                    project_id: query.owned("projectId"),
                    entity_type: query.owned("entityType"),
                    entity_id: query.owned("entityId"),
                };
                ApiResponse::page(&s.audit.list(conn, &audit_query, &query.page(&self.config)?)?)
            }
            _ => Err(StorageError::MethodNotAllowed),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn execute_mutation(
        &self,
        req: &ApiRequest,
        route: &Route,
        query: &Query,
    ) -> Result<ApiResponse, StorageError> {
        let ctx = RequestContext::new(req.actor.as_deref(), req.source.as_deref());
        let body = req.body.clone().unwrap_or(Value::Null);

        let guarded = match req.idempotency_key {
            Some(ref key) if req.method == Method::POST || req.method == Method::PATCH => {
                IdempotencyGuard::validate_key(key)?;
                Some(IdempotentRequest {
                    key: key.clone(),
                    method: req.method.as_str().to_string(),
                    route: route.template().to_string(),
                    fingerprint: IdempotencyGuard::fingerprint(
                        req.method.as_str(),
                        route.template(),
                        &route.params(),
                        &query.to_json(),
                        &body,
                    ),
                })
            }
            _ => None,
        };

        self.db.with_transaction(|tx| {
            if let Some(ref guarded) = guarded {
                if let GuardDecision::Replay(record) = self.services.idempotency.check(&tx, guarded)? {
                    return Ok(ApiResponse::replay(&record));
                }
            }

            let result = with_savepoint(&tx, REQUEST_SAVEPOINT, |conn| {
                self.mutate(conn, &ctx, &req.method, route, body)
            });
            let response = match result {
                // nothing is captured or committed for server errors
                Err(e) if e.status().is_server_error() => return Err(e),
                other => ApiResponse::from_result(other),
            };

            if let Some(ref guarded) = guarded {
                if let CaptureOutcome::Raced(winner) =
                    self.services.idempotency.capture(&tx, guarded, &response)?
                {
                    return IdempotencyGuard::resolve_race(guarded, &winner);
                }
            }

            tx.commit()?;
            Ok(response)
        })
    }

    fn mutate(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        method: &Method,
        route: &Route,
        body: Value,
    ) -> Result<ApiResponse, StorageError> {
        let s = &self.services;
        let delete = *method == Method::DELETE;
        match route {
            Route::Projects => ApiResponse::created(&s.projects.create(conn, ctx, decode(body)?)?),
            Route::Project(id) if delete => ApiResponse::ok(&s.projects.delete(conn, ctx, id)?),
            Route::Project(id) => ApiResponse::ok(&s.projects.patch(conn, ctx, id, decode(body)?)?),
            Route::ProjectSprints(id) => ApiResponse::created(&s.sprints.create(conn, ctx, id, decode(body)?)?),
            Route::Sprint(id) => ApiResponse::ok(&s.sprints.patch(conn, ctx, id, decode(body)?)?),
            Route::Stories => ApiResponse::created(&s.stories.create(conn, ctx, decode(body)?)?),
            Route::Story(id) if delete => ApiResponse::ok(&s.stories.delete(conn, ctx, id)?),
            Route::Story(id) => ApiResponse::ok(&s.stories.patch(conn, ctx, id, decode(body)?)?),
            Route::StoryMove(id) => ApiResponse::ok(&s.stories.move_story(conn, ctx, id, decode(body)?)?),
            Route::StoryDependencies(id) => {
                ApiResponse::created(&s.stories.add_dependency(conn, ctx, id, decode(body)?)?)
            }
            Route::Dependency(id) => ApiResponse::ok(&s.stories.remove_dependency(conn, ctx, id)?),
            Route::StoryNotes(id) => ApiResponse::created(&s.notes.create(conn, ctx, id, decode(body)?)?),
            Route::Note(id) => ApiResponse::ok(&s.notes.patch(conn, ctx, id, decode(body)?)?),
            Route::Files => ApiResponse::created(&s.files.register(conn, ctx, decode(body)?)?),
            Route::AgentSessions => ApiResponse::created(&s.sessions.create(conn, ctx, decode(body)?)?),
            Route::AgentSessionEvents(id) => {
                ApiResponse::created(&s.sessions.append_event(conn, ctx, id, decode(body)?)?)
            }
            Route::BatchMove => self.batch(conn, ctx, BatchKind::Move, body),
            Route::BatchPatch => self.batch(conn, ctx, BatchKind::Patch, body),
            _ => Err(StorageError::MethodNotAllowed),
        }
    }

    fn batch(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        kind: BatchKind,
        body: Value,
    ) -> Result<ApiResponse, StorageError> {
        let request: BatchRequest = decode(body)?;
        let outcome = self.services.batch.run(conn, ctx, kind, request)?;
        ApiResponse::data(StatusCode::OK, &outcome)
    }
}

fn parse_bool(field: &'static str) -> impl Fn(&str) -> Result<bool, StorageError> {
    move |value| match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(StorageError::Validation(format!("{} must be true or false", field))),
    }
}
