//! Cursor pagination over `(timestamp, id)`
//!
//! Lists are ordered `(ts DESC, id DESC)`. A cursor carries the last emitted
//! row's key; the next page is every row strictly below it. Keys are assigned
//! by the monotonic write clock, so rows written mid-traversal sort above the
//! cursor and are never revisited.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::StorageError;

/// Decoded pagination cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    pub id: String,
}

impl Cursor {
    pub fn new(timestamp_ms: i64, id: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            id: id.into(),
        }
    }

    /// Opaque token handed to clients
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::BadRequest("invalid cursor".to_string());
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        let cursor: Cursor = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        if cursor.id.is_empty() {
            return Err(invalid());
        }
        Ok(cursor)
    }
}

/// Validated `limit` + `cursor` pair
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub limit: usize,
    pub after: Option<Cursor>,
}

impl PageRequest {
    pub fn from_query(
        limit: Option<&str>,
        cursor: Option<&str>,
        config: &Config,
    ) -> Result<Self, StorageError> {
        let limit = match limit.map(str::trim).filter(|s| !s.is_empty()) {
            None => config.default_page_limit,
            Some(raw) => {
                let parsed: i64 = raw
                    .parse()
                    .map_err(|_| StorageError::Validation("limit must be an integer".into()))?;
                if parsed < 1 {
                    return Err(StorageError::Validation("limit must be at least 1".into()));
                }
                (parsed as u64).min(config.max_page_limit as u64) as usize
            }
        };

        let after = match cursor.map(str::trim).filter(|s| !s.is_empty()) {
            Some(token) => Some(Cursor::decode(token)?),
            None => None,
        };

        Ok(Self { limit, after })
    }

    /// Rows to fetch: one extra to detect another page
    pub fn fetch_limit(&self) -> i64 {
        self.limit as i64 + 1
    }

    /// Append the keyset predicate for `ts_col`/`id_col` to a WHERE clause.
    pub fn push_keyset(
        &self,
        sql: &mut String,
        params: &mut Vec<Box<dyn rusqlite::ToSql>>,
        ts_col: &str,
        id_col: &str,
    ) {
        if let Some(ref cursor) = self.after {
            sql.push_str(&format!(
                " AND ({ts} < ? OR ({ts} = ? AND {id} < ?))",
                ts = ts_col,
                id = id_col
            ));
            params.push(Box::new(cursor.timestamp_ms));
            params.push(Box::new(cursor.timestamp_ms));
            params.push(Box::new(cursor.id.clone()));
        }
    }

    /// ORDER BY + LIMIT tail matching the keyset predicate
    pub fn push_order_limit(
        &self,
        sql: &mut String,
        params: &mut Vec<Box<dyn rusqlite::ToSql>>,
        ts_col: &str,
        id_col: &str,
    ) {
        sql.push_str(&format!(" ORDER BY {} DESC, {} DESC LIMIT ?", ts_col, id_col));
        params.push(Box::new(self.fetch_limit()));
    }
}

/// `page` object of list responses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// One page of rows
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub info: PageInfo,
}

impl<T> Page<T> {
    /// Trim the probe row and derive the next cursor from the last kept row.
    pub fn from_rows<F>(mut rows: Vec<T>, limit: usize, key: F) -> Self
    where
        F: Fn(&T) -> Cursor,
    {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|row| key(row).encode())
        } else {
            None
        };
        Self {
            data: rows,
            info: PageInfo {
                next_cursor,
                has_more,
            },
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            info: self.info,
        }
    }
}
