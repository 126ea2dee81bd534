//! Response envelope building
//!
//! Every handler produces an `ApiResponse`: a status plus the exact body bytes
//! sent to the client. Keeping the body as a finished string lets the
//! idempotency guard freeze it and replay it byte for byte.

use hyper::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::db::idempotency::IdempotencyRecord;
use crate::error::StorageError;
use crate::pagination::{Page, PageInfo};

#[derive(Serialize)]
struct DataEnvelope<'a, T> {
    data: &'a T,
}

#[derive(Serialize)]
struct PageEnvelope<'a, T> {
    data: &'a [T],
    page: &'a PageInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
    /// Served from a captured idempotent response
    pub replayed: bool,
}

impl ApiResponse {
    fn new(status: StatusCode, body: String) -> Self {
        Self {
            status,
            body,
            replayed: false,
        }
    }

    /// `{data: ...}` with the given status
    pub fn data<T: Serialize>(status: StatusCode, data: &T) -> Result<Self, StorageError> {
        let body = serde_json::to_string(&DataEnvelope { data })?;
        Ok(Self::new(status, body))
    }

    /// 200 `{data: ...}`
    pub fn ok<T: Serialize>(data: &T) -> Result<Self, StorageError> {
        Self::data(StatusCode::OK, data)
    }

    /// 201 `{data: ...}`
    pub fn created<T: Serialize>(data: &T) -> Result<Self, StorageError> {
        Self::data(StatusCode::CREATED, data)
    }

    /// 200 `{data: [...], page: {nextCursor, hasMore}}`
    pub fn page<T: Serialize>(page: &Page<T>) -> Result<Self, StorageError> {
        let body = serde_json::to_string(&PageEnvelope {
            data: &page.data,
            page: &page.info,
        })?;
        Ok(Self::new(StatusCode::OK, body))
    }

    /// `{error: {code, message, details}}`
    pub fn error(err: &StorageError) -> Self {
        let status = err.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "Request failed");
        }
        let body = json!({
            "error": {
                "code": err.code(),
                "message": err.public_message(),
                "details": err.details().cloned().unwrap_or(Value::Null),
            }
        });
        Self::new(status, body.to_string())
    }

    /// Captured response served again
    pub fn replay(record: &IdempotencyRecord) -> Self {
        let status = StatusCode::from_u16(record.response_status).unwrap_or(StatusCode::OK);
        Self {
            status,
            body: record.response_body.clone(),
            replayed: true,
        }
    }

    pub fn from_result(result: Result<ApiResponse, StorageError>) -> Self {
        match result {
            Ok(response) => response,
            Err(e) => Self::error(&e),
        }
    }

    /// Parsed body, for tests and diagnostics
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}
