//! Capture pipeline for intercepted proxy traffic
//!
//! The hosting proxy engine drives this module through two hooks: one when a
//! client connection is established (authentication) and one when a
//! request/response exchange completes (capture). Only exchanges whose URL
//! matches the capture filter are persisted; everything else passes through
//! untouched and unlogged.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::{AllowList, AuthGate};
use crate::backend::IndexBackend;
use crate::config::CaptureConfig;
use crate::content::{self, DecodedContent};
use crate::identity::IdentityStore;

pub mod persist;

pub use persist::PersistWorker;

/// URL markers selecting the exchanges worth persisting.
pub const COMPLETIONS_MARKER: &str = "completions";
pub const TELEMETRY_MARKER: &str = "telemetry";

/// Whether an exchange is eligible for persistence at all.
pub fn in_scope(url: &str) -> bool {
    url.contains(COMPLETIONS_MARKER) || url.contains(TELEMETRY_MARKER)
}

/// The two capture categories, each mapped to its own backend index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Completions,
    Telemetry,
}

impl ExchangeKind {
    /// Classify by the trailing URL-path segment. Anything other than the
    /// two known segments is unsupported.
    pub fn classify(url: &str) -> Option<Self> {
        match url.rsplit('/').next() {
            Some(COMPLETIONS_MARKER) => Some(ExchangeKind::Completions),
            Some(TELEMETRY_MARKER) => Some(ExchangeKind::Telemetry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Completions => COMPLETIONS_MARKER,
            ExchangeKind::Telemetry => TELEMETRY_MARKER,
        }
    }
}

/// One completed request/response pair, as observed by the proxy.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub request_headers: HeaderMap,
    pub request_body: Bytes,
    pub request_start: DateTime<Utc>,
    pub response_status: StatusCode,
    pub response_headers: HeaderMap,
    pub response_body: Bytes,
    pub response_end: DateTime<Utc>,
    /// Peer address of the client connection the exchange arrived on.
    pub peer: IpAddr,
}

/// Normalized record written to the backend for one in-scope exchange.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureDocument {
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub headers: HashMap<String, String>,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub content: Value,
}

impl CaptureDocument {
    /// Build the document for an exchange attributed to `username`.
    ///
    /// Each side's body is decoded against its own declared content type; an
    /// unsupported or malformed body degrades to empty content rather than
    /// failing the capture. The elapsed duration is response-end minus
    /// request-start and is passed through unclamped.
    pub fn from_exchange(exchange: &Exchange, username: &str) -> Self {
        let elapsed_ms = (exchange.response_end - exchange.request_start).num_milliseconds();

        Self {
            user: username.to_string(),
            timestamp: Utc::now(),
            elapsed_ms,
            request: RequestRecord {
                headers: header_map(&exchange.request_headers),
                content: decoded_or_empty(&exchange.request_body, &exchange.request_headers),
            },
            response: ResponseRecord {
                status_code: exchange.response_status.as_u16(),
                headers: header_map(&exchange.response_headers),
                content: decoded_or_empty(&exchange.response_body, &exchange.response_headers),
            },
        }
    }
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}

fn decoded_or_empty(body: &[u8], headers: &HeaderMap) -> Value {
    match content::decode(body, content_type(headers)) {
        Ok(DecodedContent::Records(records)) => Value::Array(records),
        Ok(DecodedContent::Unsupported) => Value::Array(Vec::new()),
        Err(err) => {
            debug!(error = %err, "body failed to decode, capturing empty content");
            Value::Array(Vec::new())
        }
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Outcome of authenticating a new client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectVerdict {
    Admitted { username: String },
    /// The hosting proxy should answer the connection with `status` and
    /// close it.
    Rejected { status: StatusCode },
}

/// The capture pipeline the hosting proxy engine embeds.
///
/// Holds the authentication gate, the connection identity store, and the
/// persistence worker. Both hooks are synchronous and non-blocking; the only
/// deferred work is the backend write, which runs on a spawned task.
pub struct CapturePipeline {
    gate: AuthGate,
    identities: Arc<IdentityStore>,
    worker: Arc<PersistWorker>,
}

impl CapturePipeline {
    pub fn new(
        allow_list: AllowList,
        backend: Arc<dyn IndexBackend>,
        capture: CaptureConfig,
    ) -> Self {
        let identities = Arc::new(IdentityStore::new());
        let worker = Arc::new(PersistWorker::new(backend, identities.clone(), capture));
        Self {
            gate: AuthGate::new(allow_list),
            identities,
            worker,
        }
    }

    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// Authentication hook, invoked once per new client connection with the
    /// raw `Proxy-Authorization` header value.
    pub fn client_connect(&self, peer: IpAddr, proxy_auth: Option<&str>) -> ConnectVerdict {
        match self.gate.authenticate(peer, proxy_auth, &self.identities) {
            Ok(username) => ConnectVerdict::Admitted { username },
            Err(_) => ConnectVerdict::Rejected {
                status: StatusCode::UNAUTHORIZED,
            },
        }
    }

    /// Capture hook, invoked when an exchange's response is fully available.
    ///
    /// Out-of-scope exchanges are dropped silently and return `None`.
    /// In-scope exchanges spawn a persist task and return its handle; the
    /// hosting proxy is free to detach it. Must be called within a tokio
    /// runtime.
    pub fn exchange_complete(&self, exchange: Exchange) -> Option<JoinHandle<()>> {
        if !in_scope(&exchange.url) {
            return None;
        }
        let worker = self.worker.clone();
        Some(tokio::spawn(async move { worker.persist(exchange).await }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use http::header::CONTENT_TYPE;

    fn exchange_at(url: &str) -> Exchange {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        Exchange {
            url: url.to_string(),
            request_headers,
            request_body: Bytes::from_static(br#"{"prompt":"fn main"}"#),
            request_start: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            response_status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: Bytes::new(),
            response_end: Utc.timestamp_opt(1_700_000_001, 500_000_000).unwrap(),
            peer: "10.0.0.1".parse().unwrap(),
        }
    }

    #[test]
    fn scope_filter_matches_the_two_markers() {
        assert!(in_scope("https://x/y/completions"));
        assert!(in_scope("https://x/y/telemetry"));
        assert!(!in_scope("https://x/y/other"));
    }

    #[test]
    fn classification_uses_the_trailing_segment() {
        assert_eq!(
            ExchangeKind::classify("https://api.example.com/v1/engines/completions"),
            Some(ExchangeKind::Completions)
        );
        assert_eq!(
            ExchangeKind::classify("https://telemetry.example.com/upload/telemetry"),
            Some(ExchangeKind::Telemetry)
        );
        // marker present but not the trailing segment
        assert_eq!(
            ExchangeKind::classify("https://x/telemetry/batch"),
            None
        );
    }

    #[test]
    fn document_carries_user_elapsed_and_decoded_request() {
        let doc = CaptureDocument::from_exchange(&exchange_at("https://x/completions"), "alice");
        assert_eq!(doc.user, "alice");
        assert_eq!(doc.elapsed_ms, 1500);
        assert_eq!(
            doc.request.content,
            serde_json::json!([{"prompt": "fn main"}])
        );
        assert_eq!(doc.request.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(doc.response.status_code, 200);
        // response had no declared type
        assert_eq!(doc.response.content, serde_json::json!([]));
    }

    #[test]
    fn negative_elapsed_passes_through_unclamped() {
        let mut exchange = exchange_at("https://x/completions");
        std::mem::swap(&mut exchange.request_start, &mut exchange.response_end);
        let doc = CaptureDocument::from_exchange(&exchange, "alice");
        assert_eq!(doc.elapsed_ms, -1500);
    }

    #[test]
    fn malformed_body_degrades_to_empty_content() {
        let mut exchange = exchange_at("https://x/completions");
        exchange.request_body = Bytes::from_static(b"{oops");
        let doc = CaptureDocument::from_exchange(&exchange, "alice");
        assert_eq!(doc.request.content, serde_json::json!([]));
    }
}
