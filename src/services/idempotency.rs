//! Idempotency guard for retried writes
//!
//! A `POST`/`PATCH` carrying an `Idempotency-Key` is fingerprinted and looked
//! up by `(key, method, route)`:
//!
//! - unseen: the handler runs and a `< 500` response is captured alongside
//!   the handler's writes
//! - recorded with the same fingerprint: the captured response is replayed
//! - recorded with another fingerprint: `IDEMPOTENCY_CONFLICT`
//! - expired: deleted, then treated as unseen

use rusqlite::Connection;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::clock;
use crate::db::idempotency::{self, IdempotencyRecord};
use crate::error::StorageError;

use super::response::ApiResponse;

const MAX_KEY_LEN: usize = 255;

/// A mutating request that carries an idempotency key
#[derive(Debug, Clone)]
pub struct IdempotentRequest {
    pub key: String,
    pub method: String,
    /// Route template, e.g. `/stories/:id/move`
    pub route: String,
    pub fingerprint: String,
}

/// What the guard decided before the handler runs
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Proceed,
    Replay(IdempotencyRecord),
}

/// Result of capturing a response
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Stored,
    /// Server errors are not captured
    Skipped,
    /// Another request stored a record for the key first
    Raced(IdempotencyRecord),
}

/// Idempotency guard
#[derive(Debug)]
pub struct IdempotencyGuard {
    ttl_ms: i64,
}

impl IdempotencyGuard {
    pub fn new(ttl_ms: i64) -> Self {
        Self { ttl_ms }
    }

    /// Keys are 1-255 visible ASCII characters
    pub fn validate_key(key: &str) -> Result<(), StorageError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StorageError::BadRequest(format!(
                "Idempotency-Key must be 1 to {} characters",
                MAX_KEY_LEN
            )));
        }
        if !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(StorageError::BadRequest(
                "Idempotency-Key must contain only visible ASCII characters".into(),
            ));
        }
        Ok(())
    }

    /// SHA-256 over the canonical form of the request
    pub fn fingerprint(method: &str, route: &str, params: &Value, query: &Value, body: &Value) -> String {
        let mut canonical = String::new();
        canonical.push_str("{\"body\":");
        write_canonical(body, &mut canonical);
        canonical.push_str(",\"method\":");
        write_canonical(&Value::from(method), &mut canonical);
        canonical.push_str(",\"params\":");
        write_canonical(params, &mut canonical);
        canonical.push_str(",\"query\":");
        write_canonical(query, &mut canonical);
        canonical.push_str(",\"route\":");
        write_canonical(&Value::from(route), &mut canonical);
        canonical.push('}');

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up the key before the handler runs
    pub fn check(&self, conn: &Connection, req: &IdempotentRequest) -> Result<GuardDecision, StorageError> {
        let Some(record) = idempotency::get_record(conn, &req.key, &req.method, &req.route)? else {
            return Ok(GuardDecision::Proceed);
        };

        if record.expires_at <= clock::wall_clock_ms() {
            debug!(key = %req.key, route = %req.route, "Idempotency record expired");
            idempotency::delete_record(conn, &req.key, &req.method, &req.route)?;
            return Ok(GuardDecision::Proceed);
        }

        if record.fingerprint != req.fingerprint {
            return Err(StorageError::IdempotencyConflict);
        }

        debug!(key = %req.key, route = %req.route, "Replaying captured response");
        Ok(GuardDecision::Replay(record))
    }

    /// Freeze the handler's response. Server errors are never captured, so
    /// a retry after a 5xx runs the handler again.
    pub fn capture(
        &self,
        conn: &Connection,
        req: &IdempotentRequest,
        response: &ApiResponse,
    ) -> Result<CaptureOutcome, StorageError> {
        if response.status.is_server_error() {
            return Ok(CaptureOutcome::Skipped);
        }

        let now = clock::wall_clock_ms();
        let record = IdempotencyRecord {
            idempotency_key: req.key.clone(),
            http_method: req.method.clone(),
            route: req.route.clone(),
            fingerprint: req.fingerprint.clone(),
            response_status: response.status.as_u16(),
            response_body: response.body.clone(),
            created_at: now,
            expires_at: now + self.ttl_ms,
        };

        match idempotency::insert_record(conn, &record) {
            Ok(()) => Ok(CaptureOutcome::Stored),
            Err(e) if e.is_unique_violation() => {
                let winner = idempotency::get_record(conn, &req.key, &req.method, &req.route)?
                    .ok_or(e)?;
                Ok(CaptureOutcome::Raced(winner))
            }
            Err(e) => Err(e),
        }
    }

    /// Answer for the loser of a capture race
    pub fn resolve_race(req: &IdempotentRequest, winner: &IdempotencyRecord) -> Result<ApiResponse, StorageError> {
        if winner.fingerprint == req.fingerprint {
            Ok(ApiResponse::replay(winner))
        } else {
            Err(StorageError::IdempotencyConflict)
        }
    }

    /// Delete records whose retention window has passed
    pub fn purge_expired(&self, conn: &Connection) -> Result<usize, StorageError> {
        let purged = idempotency::purge_expired(conn, clock::wall_clock_ms())?;
        if purged > 0 {
            info!(purged, "Purged expired idempotency records");
        }
        Ok(purged)
    }
}

/// Serialize `value` with object keys sorted at every level
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
