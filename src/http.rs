//! HTTP server for the sprint API
//!
//! Thin hyper front end over `Api`. The server reads headers and the body,
//! then hands the request to `Api::handle` on the blocking pool, because
//! every request touches SQLite.
//!
//! ## Example Usage
//!
//! ```bash
//! # Create a story, safely retryable
//! curl -X POST -H "Content-Type: application/json" \
//!      -H "Idempotency-Key: 3f1c2a" -H "X-Actor: alice" \
//!      -d '{"projectId":"p1","title":"Ship login"}' \
//!      http://localhost:8095/stories
//!
//! # Page through the changefeed
//! curl "http://localhost:8095/audit?projectId=p1&limit=20"
//! ```

use crate::api::{Api, ApiRequest};
use crate::error::StorageError;
use crate::services::ApiResponse;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";
pub const ACTOR_HEADER: &str = "x-actor";
pub const SOURCE_HEADER: &str = "x-source";

/// HTTP server state
pub struct HttpServer {
    api: Arc<Api>,
    bind_addr: SocketAddr,
    max_body_bytes: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(api: Arc<Api>, bind_addr: SocketAddr) -> Self {
        let max_body_bytes = api.config().max_body_bytes;
        Self {
            api,
            bind_addr,
            max_body_bytes,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StorageError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), StorageError> {
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Translate a hyper request, run it, translate the response
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());

        debug!(method = %method, target = %target, "Incoming request");

        let response = match self.build_request(req).await {
            Ok(api_request) => {
                let api = self.api.clone();
                match tokio::task::spawn_blocking(move || api.handle(&api_request)).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "Request handler panicked");
                        ApiResponse::error(&StorageError::Internal(e.to_string()))
                    }
                }
            }
            Err(e) => ApiResponse::error(&e),
        };

        Ok(to_hyper(response))
    }

    async fn build_request(&self, req: Request<Incoming>) -> Result<ApiRequest, StorageError> {
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());

        let mut api_request = ApiRequest::new(req.method().clone(), &target);
        let headers = req.headers();
        api_request.idempotency_key = header_text(headers, IDEMPOTENCY_KEY_HEADER)?;
        api_request.actor = header_text(headers, ACTOR_HEADER)?;
        api_request.source = header_text(headers, SOURCE_HEADER)?;

        let body = Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    StorageError::BadRequest(format!(
                        "request body exceeds {} bytes",
                        self.max_body_bytes
                    ))
                } else {
                    StorageError::BadRequest(format!("failed to read body: {}", e))
                }
            })?
            .to_bytes();

        api_request.body_bytes(&body)
    }
}

/// Header value as text. Present but non-visible-ASCII values are rejected.
fn header_text(headers: &HeaderMap, name: &str) -> Result<Option<String>, StorageError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|v| Some(v.to_string()))
            .map_err(|_| StorageError::BadRequest(format!("{} header must be ASCII", name))),
        None => Ok(None),
    }
}

fn to_hyper(response: ApiResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(Bytes::from(response.body)));
    *out.status_mut() = response.status;
    out.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if response.replayed {
        out.headers_mut().insert(
            IDEMPOTENCY_REPLAYED_HEADER,
            HeaderValue::from_static("true"),
        );
    }
    out
}
