//! Idempotency record storage
//!
//! Keyed by `(idempotency_key, http_method, route)`. The composite primary key
//! makes concurrent first writes race on the index; exactly one insert wins.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;

/// Captured response for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub http_method: String,
    pub route: String,
    pub fingerprint: String,
    pub response_status: u16,
    pub response_body: String,
    pub created_at: i64,
    pub expires_at: i64,
}

pub fn get_record(
    conn: &Connection,
    key: &str,
    method: &str,
    route: &str,
) -> Result<Option<IdempotencyRecord>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT idempotency_key, http_method, route, fingerprint, response_status,
                    response_body, created_at, expires_at
             FROM idempotency_records
             WHERE idempotency_key = ? AND http_method = ? AND route = ?",
            params![key, method, route],
            |row| {
                Ok(IdempotencyRecord {
                    idempotency_key: row.get(0)?,
                    http_method: row.get(1)?,
                    route: row.get(2)?,
                    fingerprint: row.get(3)?,
                    response_status: row.get(4)?,
                    response_body: row.get(5)?,
                    created_at: row.get(6)?,
                    expires_at: row.get(7)?,
                })
            },
        )
        .optional()?)
}

/// Plain INSERT; a second record for the same key fails on the primary key.
pub fn insert_record(conn: &Connection, record: &IdempotencyRecord) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO idempotency_records (idempotency_key, http_method, route, fingerprint,
                                          response_status, response_body, created_at, expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.idempotency_key,
            record.http_method,
            record.route,
            record.fingerprint,
            record.response_status,
            record.response_body,
            record.created_at,
            record.expires_at,
        ],
    )?;
    Ok(())
}

pub fn delete_record(conn: &Connection, key: &str, method: &str, route: &str) -> Result<(), StorageError> {
    conn.execute(
        "DELETE FROM idempotency_records WHERE idempotency_key = ? AND http_method = ? AND route = ?",
        params![key, method, route],
    )?;
    Ok(())
}

/// Delete every record whose retention window ended at or before `now_ms`
pub fn purge_expired(conn: &Connection, now_ms: i64) -> Result<usize, StorageError> {
    Ok(conn.execute(
        "DELETE FROM idempotency_records WHERE expires_at <= ?",
        params![now_ms],
    )?)
}
