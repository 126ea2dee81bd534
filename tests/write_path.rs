//! Integration tests for the write path
//!
//! Requests go through `Api::handle`, the same entry point the HTTP server
//! uses, against a fresh database per test.

use serde_json::{json, Value};
use sprint_storage::{Api, ApiRequest, Config, SprintDb};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn create_api() -> Api {
    let db = Arc::new(SprintDb::open_in_memory().unwrap());
    Api::new(db, Arc::new(Config::default()))
}

fn send(api: &Api, req: ApiRequest) -> (u16, Value) {
    let resp = api.handle(&req);
    (resp.status.as_u16(), resp.json())
}

fn create_project(api: &Api) -> String {
    let (status, body) = send(api, ApiRequest::post("/projects", json!({"name": "Apollo"})));
    assert_eq!(status, 201, "{}", body);
    body["data"]["id"].as_str().unwrap().to_string()
}

fn create_story(api: &Api, project_id: &str, title: &str) -> String {
    let (status, body) = send(
        api,
        ApiRequest::post("/stories", json!({"projectId": project_id, "title": title})),
    );
    assert_eq!(status, 201, "{}", body);
    body["data"]["id"].as_str().unwrap().to_string()
}

fn story(api: &Api, id: &str) -> Value {
    let (status, body) = send(api, ApiRequest::get(&format!("/stories/{}", id)));
    assert_eq!(status, 200, "{}", body);
    body["data"].clone()
}

fn audit_count(api: &Api, query: &str) -> usize {
    let (status, body) = send(api, ApiRequest::get(&format!("/audit?limit=100&{}", query)));
    assert_eq!(status, 200, "{}", body);
    body["data"].as_array().unwrap().len()
}

// =============================================================================
// Dependencies
// =============================================================================

#[test]
fn test_dependency_blocks_until_target_completed() {
    let api = create_api();
    let project = create_project(&api);
    let a = create_story(&api, &project, "A");
    let b = create_story(&api, &project, "B");

    let (status, body) = send(
        &api,
        ApiRequest::post(&format!("/stories/{}/dependencies", a), json!({"dependsOnStoryId": b})),
    );
    assert_eq!(status, 201, "{}", body);
    assert_eq!(body["data"]["storyBlocked"], true);
    assert_eq!(body["data"]["type"], "finish_to_start");
    assert_eq!(story(&api, &a)["blocked"], true);

    let (status, body) = send(
        &api,
        ApiRequest::post(&format!("/stories/{}/move", b), json!({"status": "completed"})),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["dependents"][0]["storyId"], a.as_str());
    assert_eq!(body["data"]["dependents"][0]["blocked"], false);
    assert_eq!(story(&api, &a)["blocked"], false);

    // reopening the target blocks again
    send(
        &api,
        ApiRequest::post(&format!("/stories/{}/move", b), json!({"status": "in_progress"})),
    );
    assert_eq!(story(&api, &a)["blocked"], true);
}

#[test]
fn test_dependency_rejections() {
    let api = create_api();
    let project = create_project(&api);
    let a = create_story(&api, &project, "A");
    let b = create_story(&api, &project, "B");
    let c = create_story(&api, &project, "C");
    let deps = |id: &str| format!("/stories/{}/dependencies", id);

    // self edge
    let (status, body) = send(&api, ApiRequest::post(&deps(&a), json!({"dependsOnStoryId": a})));
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    // a -> b, b -> c, then c -> a closes a cycle
    assert_eq!(send(&api, ApiRequest::post(&deps(&a), json!({"dependsOnStoryId": b}))).0, 201);
    assert_eq!(send(&api, ApiRequest::post(&deps(&b), json!({"dependsOnStoryId": c}))).0, 201);
    let (status, body) = send(&api, ApiRequest::post(&deps(&c), json!({"dependsOnStoryId": a})));
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    // duplicate pair
    let (status, body) = send(&api, ApiRequest::post(&deps(&a), json!({"dependsOnStoryId": b})));
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "CONFLICT");

    // unknown target
    let (status, _) = send(&api, ApiRequest::post(&deps(&a), json!({"dependsOnStoryId": "nope"})));
    assert_eq!(status, 404);

    // rejected attempts leave no edges or events behind
    let (_, body) = send(&api, ApiRequest::get(&deps(&a)));
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(audit_count(&api, "entityType=dependency"), 2);
}

#[test]
fn test_delete_dependency_unblocks() {
    let api = create_api();
    let project = create_project(&api);
    let a = create_story(&api, &project, "A");
    let b = create_story(&api, &project, "B");

    let (_, body) = send(
        &api,
        ApiRequest::post(&format!("/stories/{}/dependencies", a), json!({"dependsOnStoryId": b})),
    );
    let dep_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&api, ApiRequest::delete(&format!("/dependencies/{}", dep_id)));
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["deleted"], true);
    assert_eq!(body["data"]["storyId"], a.as_str());
    assert_eq!(body["data"]["storyBlocked"], false);
    assert_eq!(story(&api, &a)["blocked"], false);

    let (status, _) = send(&api, ApiRequest::delete(&format!("/dependencies/{}", dep_id)));
    assert_eq!(status, 404);
}

#[test]
fn test_deleting_target_story_unblocks_dependents() {
    let api = create_api();
    let project = create_project(&api);
    let a = create_story(&api, &project, "A");
    let b = create_story(&api, &project, "B");
    send(
        &api,
        ApiRequest::post(&format!("/stories/{}/dependencies", a), json!({"dependsOnStoryId": b})),
    );

    let (status, body) = send(&api, ApiRequest::delete(&format!("/stories/{}", b)));
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["dependents"][0]["blocked"], false);
    assert_eq!(story(&api, &a)["blocked"], false);
}

#[test]
fn test_blocked_filter() {
    let api = create_api();
    let project = create_project(&api);
    let a = create_story(&api, &project, "A");
    let b = create_story(&api, &project, "B");
    send(
        &api,
        ApiRequest::post(&format!("/stories/{}/dependencies", a), json!({"dependsOnStoryId": b})),
    );

    let (status, body) = send(
        &api,
        ApiRequest::get(&format!("/stories?projectId={}&blocked=true", project)),
    );
    assert_eq!(status, 200);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![a.as_str()]);

    let (status, body) = send(&api, ApiRequest::get("/stories?blocked=maybe"));
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

// =============================================================================
// Idempotency
// =============================================================================

#[test]
fn test_idempotent_replay_is_byte_identical() {
    let api = create_api();
    let project = create_project(&api);
    let req = ApiRequest::post("/stories", json!({"projectId": project, "title": "Retry me"}))
        .idempotency_key("key-1")
        .actor("alice");

    let first = api.handle(&req);
    assert_eq!(first.status.as_u16(), 201);
    assert!(!first.replayed);
    let events_after_first = audit_count(&api, "entityType=story");

    let second = api.handle(&req);
    assert_eq!(second.status, first.status);
    assert_eq!(second.body, first.body);
    assert!(second.replayed);

    // one story, one creation event
    assert_eq!(events_after_first, 1);
    assert_eq!(audit_count(&api, "entityType=story"), 1);
    let (_, body) = send(&api, ApiRequest::get(&format!("/stories?projectId={}", project)));
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[test]
fn test_idempotency_key_reuse_with_different_body() {
    let api = create_api();
    let project = create_project(&api);
    let first = ApiRequest::post("/stories", json!({"projectId": project, "title": "One"}))
        .idempotency_key("key-2");
    let second = ApiRequest::post("/stories", json!({"projectId": project, "title": "Two"}))
        .idempotency_key("key-2");

    assert_eq!(send(&api, first).0, 201);
    let (status, body) = send(&api, second);
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "IDEMPOTENCY_CONFLICT");

    let (_, body) = send(&api, ApiRequest::get(&format!("/stories?projectId={}", project)));
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[test]
fn test_idempotency_body_key_order_does_not_matter() {
    let api = create_api();
    let project = create_project(&api);
    let a: Value = serde_json::from_str(&format!(
        r#"{{"projectId":"{}","title":"Same","priority":"high"}}"#,
        project
    ))
    .unwrap();
    let b: Value = serde_json::from_str(&format!(
        r#"{{"priority":"high","title":"Same","projectId":"{}"}}"#,
        project
    ))
    .unwrap();

    let first = api.handle(&ApiRequest::post("/stories", a).idempotency_key("key-3"));
    let second = api.handle(&ApiRequest::post("/stories", b).idempotency_key("key-3"));
    assert!(second.replayed);
    assert_eq!(first.body, second.body);
}

#[test]
fn test_failed_request_is_captured_and_replayed() {
    let api = create_api();
    let req = ApiRequest::post("/stories", json!({"projectId": "missing", "title": "x"}))
        .idempotency_key("key-4");

    let first = api.handle(&req);
    assert_eq!(first.status.as_u16(), 404);
    let second = api.handle(&req);
    assert!(second.replayed);
    assert_eq!(second.body, first.body);
}

#[test]
fn test_invalid_idempotency_key() {
    let api = create_api();
    let project = create_project(&api);
    let req = ApiRequest::post("/stories", json!({"projectId": project, "title": "x"}))
        .idempotency_key("has space");
    let (status, body) = send(&api, req);
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// =============================================================================
// Pagination
// =============================================================================

#[test]
fn test_pagination_is_complete_with_concurrent_inserts() {
    let api = create_api();
    let project = create_project(&api);
    let mut originals = HashSet::new();
    for i in 0..7 {
        originals.insert(create_story(&api, &project, &format!("story {}", i)));
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let target = match &cursor {
            Some(c) => format!("/stories?projectId={}&limit=3&cursor={}", project, c),
            None => format!("/stories?projectId={}&limit=3", project),
        };
        let (status, body) = send(&api, ApiRequest::get(&target));
        assert_eq!(status, 200, "{}", body);
        for s in body["data"].as_array().unwrap() {
            seen.push(s["id"].as_str().unwrap().to_string());
        }
        pages += 1;

        // new rows arrive while the client is paging
        create_story(&api, &project, &format!("late {}", pages));

        if body["page"]["hasMore"] == false {
            assert!(body["page"]["nextCursor"].is_null());
            break;
        }
        cursor = Some(body["page"]["nextCursor"].as_str().unwrap().to_string());
        assert!(pages < 10, "pagination did not terminate");
    }

    let unique: HashSet<String> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "duplicate rows across pages");
    assert!(originals.is_subset(&unique), "rows missing from traversal");
}

#[test]
fn test_invalid_cursor_and_limit() {
    let api = create_api();
    let (status, body) = send(&api, ApiRequest::get("/stories?cursor=%%%"));
    assert_eq!(status, 400, "{}", body);
    let (status, _) = send(&api, ApiRequest::get("/stories?limit=0"));
    assert_eq!(status, 400);
    let (status, _) = send(&api, ApiRequest::get("/audit?since=yesterday"));
    assert_eq!(status, 400);
}

// =============================================================================
// Batch
// =============================================================================

fn five_stories(api: &Api, project: &str) -> Vec<String> {
    (0..5).map(|i| create_story(api, project, &format!("batch {}", i))).collect()
}

fn move_items(ids: &[String], bad_index: usize) -> Vec<Value> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            if i == bad_index {
                json!({"id": "does-not-exist", "status": "completed"})
            } else {
                json!({"id": id, "status": "completed"})
            }
        })
        .collect()
}

#[test]
fn test_batch_all_or_nothing_rolls_back() {
    let api = create_api();
    let project = create_project(&api);
    let ids = five_stories(&api, &project);
    let events_before = audit_count(&api, "");

    let (status, body) = send(
        &api,
        ApiRequest::post(
            "/stories/batch/move",
            json!({"items": move_items(&ids, 2), "all_or_nothing": true}),
        ),
    );
    assert_eq!(status, 409, "{}", body);
    assert_eq!(body["error"]["code"], "CONFLICT");
    let results = body["error"]["details"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[2]["ok"], false);
    assert_eq!(results[2]["error"]["code"], "NOT_FOUND");

    for id in &ids {
        assert_eq!(story(&api, id)["status"], "waiting");
    }
    assert_eq!(audit_count(&api, ""), events_before);
}

#[test]
fn test_batch_partial_mode_applies_the_rest() {
    let api = create_api();
    let project = create_project(&api);
    let ids = five_stories(&api, &project);

    let (status, body) = send(
        &api,
        ApiRequest::post("/stories/batch/move", json!({"items": move_items(&ids, 2)})),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["dry_run"], false);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    let oks: Vec<bool> = results.iter().map(|r| r["ok"].as_bool().unwrap()).collect();
    assert_eq!(oks, vec![true, true, false, true, true]);
    assert!(results[0].get("error").is_none());

    for (i, id) in ids.iter().enumerate() {
        let expected = if i == 2 { "waiting" } else { "completed" };
        assert_eq!(story(&api, id)["status"], expected);
    }
}

#[test]
fn test_batch_dry_run_writes_nothing() {
    let api = create_api();
    let project = create_project(&api);
    let ids = five_stories(&api, &project);
    let events_before = audit_count(&api, "");

    let items: Vec<Value> = ids.iter().map(|id| json!({"id": id, "title": "renamed"})).collect();
    let (status, body) = send(
        &api,
        ApiRequest::post("/stories/batch/patch", json!({"items": items, "dry_run": true})),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["dry_run"], true);
    assert!(body["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["ok"] == true));

    for id in &ids {
        assert_ne!(story(&api, id)["title"], "renamed");
    }
    assert_eq!(audit_count(&api, ""), events_before);
}

#[test]
fn test_batch_limits() {
    let api = create_api();
    let (status, _) = send(&api, ApiRequest::post("/stories/batch/move", json!({"items": []})));
    assert_eq!(status, 400);

    let items: Vec<Value> = (0..101).map(|i| json!({"id": format!("s{}", i), "status": "completed"})).collect();
    let (status, _) = send(&api, ApiRequest::post("/stories/batch/move", json!({"items": items})));
    assert_eq!(status, 400);
}

#[test]
fn test_batch_dry_run_all_or_nothing_reports_every_item() {
    let api = create_api();
    let project = create_project(&api);
    let ids = five_stories(&api, &project);
    let events_before = audit_count(&api, "");

    let (status, body) = send(
        &api,
        ApiRequest::post(
            "/stories/batch/move",
            json!({"items": move_items(&ids, 1), "dry_run": true, "all_or_nothing": true}),
        ),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["dry_run"], true);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    let oks: Vec<bool> = results.iter().map(|r| r["ok"].as_bool().unwrap()).collect();
    assert_eq!(oks, vec![true, false, true, true, true]);
    assert_eq!(results[1]["error"]["code"], "NOT_FOUND");

    for id in &ids {
        assert_eq!(story(&api, id)["status"], "waiting");
    }
    assert_eq!(audit_count(&api, ""), events_before);
}

#[test]
fn test_batch_with_idempotency_key_replays() {
    let api = create_api();
    let project = create_project(&api);
    let ids = five_stories(&api, &project);
    let req = ApiRequest::post("/stories/batch/move", json!({"items": move_items(&ids, 2)}))
        .idempotency_key("batch-1");

    let first = api.handle(&req);
    assert_eq!(first.status.as_u16(), 200);
    assert!(!first.replayed);
    let events_after_first = audit_count(&api, "entityType=story");

    // the second call would fail every item if it ran again
    let second = api.handle(&req);
    assert!(second.replayed);
    assert_eq!(second.status, first.status);
    assert_eq!(second.body, first.body);
    assert_eq!(audit_count(&api, "entityType=story"), events_after_first);
}

#[test]
fn test_batch_move_unblocks_dependents() {
    let api = create_api();
    let project = create_project(&api);
    let a = create_story(&api, &project, "A");
    let b = create_story(&api, &project, "B");
    send(
        &api,
        ApiRequest::post(&format!("/stories/{}/dependencies", a), json!({"dependsOnStoryId": b})),
    );
    assert_eq!(story(&api, &a)["blocked"], true);

    let (status, body) = send(
        &api,
        ApiRequest::post("/stories/batch/move", json!({"items": [{"id": b, "status": "completed"}]})),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["results"][0]["ok"], true);
    assert_eq!(story(&api, &a)["blocked"], false);

    let (_, body) = send(
        &api,
        ApiRequest::get(&format!("/stories?projectId={}&blocked=true", project)),
    );
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[test]
fn test_batch_events_carry_batch_source() {
    let api = create_api();
    let project = create_project(&api);
    let id = create_story(&api, &project, "A");

    let req = ApiRequest::post(
        "/stories/batch/move",
        json!({"items": [{"id": id, "status": "in_progress"}]}),
    )
    .actor("bot");
    assert_eq!(send(&api, req).0, 200);

    let (_, body) = send(&api, ApiRequest::get(&format!("/audit?entityId={}", id)));
    let latest = &body["data"][0];
    assert_eq!(latest["eventType"], "story.moved");
    assert_eq!(latest["source"], "batch");
    assert_eq!(latest["actor"], "bot");
    assert_eq!(latest["diff"]["changes"]["status"]["to"], "in_progress");
}

// =============================================================================
// Sprints
// =============================================================================

#[test]
fn test_sprint_lifecycle_rules() {
    let api = create_api();
    let project = create_project(&api);
    let sprints = format!("/projects/{}/sprints", project);

    let (status, body) = send(&api, ApiRequest::post(&sprints, json!({"name": "S1", "status": "active"})));
    assert_eq!(status, 201, "{}", body);
    let s1 = body["data"]["id"].as_str().unwrap().to_string();

    // a second active sprint in the same project
    let (status, body) = send(&api, ApiRequest::post(&sprints, json!({"name": "S2", "status": "active"})));
    assert_eq!(status, 409, "{}", body);

    // closed is terminal
    let sprint = format!("/sprints/{}", s1);
    assert_eq!(send(&api, ApiRequest::patch(&sprint, json!({"status": "closed"}))).0, 200);
    let (status, _) = send(&api, ApiRequest::patch(&sprint, json!({"status": "active"})));
    assert_eq!(status, 409);

    // stories cannot join a closed sprint
    let story_id = create_story(&api, &project, "late");
    let (status, body) = send(
        &api,
        ApiRequest::post(&format!("/stories/{}/move", story_id), json!({"sprintId": s1})),
    );
    assert_eq!(status, 409, "{}", body);

    let (status, _) = send(
        &api,
        ApiRequest::post(&sprints, json!({"name": "S3", "startsAt": "2026-02-10T00:00:00Z", "endsAt": "2026-02-01T00:00:00Z"})),
    );
    assert_eq!(status, 400);
}

// =============================================================================
// Routing and envelopes
// =============================================================================

#[test]
fn test_routing_errors() {
    let api = create_api();

    let (status, body) = send(&api, ApiRequest::get("/nowhere"));
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&api, ApiRequest::delete("/sprints/abc"));
    assert_eq!(status, 405);

    let (status, body) = send(&api, ApiRequest::get("/stories/missing"));
    assert_eq!(status, 404);
    assert!(body["error"]["message"].as_str().unwrap().contains("missing"));

    let malformed = ApiRequest::new(hyper::Method::POST, "/projects").body_bytes(b"{not json");
    assert_eq!(malformed.unwrap_err().code(), "BAD_REQUEST");

    let (status, body) = send(&api, ApiRequest::post("/projects", json!({"name": "x", "color": "red"})));
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[test]
fn test_health_and_ready() {
    let api = create_api();
    assert_eq!(send(&api, ApiRequest::get("/health")).1["data"]["status"], "ok");
    assert_eq!(send(&api, ApiRequest::get("/ready")).1["data"]["status"], "ready");
}

#[test]
fn test_child_records_and_project_delete() {
    let api = create_api();
    let project = create_project(&api);
    let story_id = create_story(&api, &project, "A");

    let (status, body) = send(
        &api,
        ApiRequest::post(&format!("/stories/{}/notes", story_id), json!({"body": "first"})).actor("carol"),
    );
    assert_eq!(status, 201, "{}", body);
    assert_eq!(body["data"]["author"], "carol");
    let note_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(
        send(&api, ApiRequest::patch(&format!("/notes/{}", note_id), json!({"body": "edited"}))).0,
        200
    );

    let (status, body) = send(
        &api,
        ApiRequest::post(
            "/files",
            json!({"projectId": project, "storyId": story_id, "name": "spec.pdf", "mimeType": "application/pdf", "sizeBytes": 2048}),
        ),
    );
    assert_eq!(status, 201, "{}", body);

    let (status, body) = send(&api, ApiRequest::post("/agent/sessions", json!({"projectId": project, "agent": "planner"})));
    assert_eq!(status, 201, "{}", body);
    let session = body["data"]["id"].as_str().unwrap().to_string();
    let events = format!("/agent/sessions/{}/events", session);
    assert_eq!(send(&api, ApiRequest::post(&events, json!({"kind": "plan", "payload": {"steps": 3}}))).0, 201);
    let (_, body) = send(&api, ApiRequest::get(&events));
    assert_eq!(body["data"][0]["kind"], "plan");

    let (status, body) = send(&api, ApiRequest::delete(&format!("/projects/{}", project)));
    assert_eq!(status, 200, "{}", body);
    assert_eq!(send(&api, ApiRequest::get(&format!("/stories/{}", story_id))).0, 404);
    let (_, body) = send(&api, ApiRequest::get(&format!("/files?projectId={}", project)));
    assert!(body["data"].as_array().unwrap().is_empty());

    // the history outlives the project
    assert!(audit_count(&api, &format!("projectId={}", project)) >= 6);
}

#[test]
fn test_on_disk_database_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Arc::new(Config {
        storage_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });

    let project = {
        let db = Arc::new(SprintDb::open(temp_dir.path(), std::time::Duration::from_secs(1)).unwrap());
        let api = Api::new(db, config.clone());
        let req = ApiRequest::post("/projects", json!({"name": "Durable"})).idempotency_key("boot-1");
        let (status, body) = send(&api, req);
        assert_eq!(status, 201);
        body["data"]["id"].as_str().unwrap().to_string()
    };

    let db = Arc::new(SprintDb::open(temp_dir.path(), std::time::Duration::from_secs(1)).unwrap());
    let api = Api::new(db, config);
    assert_eq!(send(&api, ApiRequest::get(&format!("/projects/{}", project))).0, 200);

    // captured responses survive restarts too
    let replay = api.handle(&ApiRequest::post("/projects", json!({"name": "Durable"})).idempotency_key("boot-1"));
    assert!(replay.replayed);
    assert_eq!(replay.json()["data"]["id"], project.as_str());
}
