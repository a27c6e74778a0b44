//! Persistence worker
//!
//! Turns an in-scope exchange into a capture document and writes it to the
//! search backend without ever stalling the proxy's request handling. The
//! backend call itself is blocking, so each attempt runs under
//! `spawn_blocking`; transient failures are retried with exponential backoff
//! and exhausted documents are dropped with a terminal log line.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, IndexBackend};
use crate::capture::{CaptureDocument, Exchange, ExchangeKind};
use crate::config::CaptureConfig;
use crate::identity::IdentityStore;

/// Retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;

/// Backoff before retry number `attempt` (zero-based): 1s, 2s, 4s.
///
/// Pure so the policy is testable apart from any execution context.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt)
}

pub struct PersistWorker {
    backend: Arc<dyn IndexBackend>,
    identities: Arc<IdentityStore>,
    indices: CaptureConfig,
}

impl PersistWorker {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        identities: Arc<IdentityStore>,
        indices: CaptureConfig,
    ) -> Self {
        Self {
            backend,
            identities,
            indices,
        }
    }

    /// Persist one in-scope exchange.
    ///
    /// Never returns an error: every failure is logged and the document
    /// dropped, so the proxy's handling of the connection is unaffected.
    pub async fn persist(&self, exchange: Exchange) {
        let Some(username) = self.identities.lookup(&exchange.peer) else {
            warn!(peer = %exchange.peer, "no identity recorded for peer, dropping captured exchange");
            return;
        };

        let Some(kind) = ExchangeKind::classify(&exchange.url) else {
            warn!(url = %exchange.url, "unsupported capture category, dropping exchange");
            return;
        };

        info!(user = %username, kind = kind.as_str(), "saving captured exchange");

        let document = CaptureDocument::from_exchange(&exchange, &username);
        let payload = match serde_json::to_value(&document) {
            Ok(payload) => payload,
            Err(err) => {
                error!(user = %username, error = %err, "capture document failed to serialize, dropped");
                return;
            }
        };

        let index = match kind {
            ExchangeKind::Completions => self.indices.completions_index.clone(),
            ExchangeKind::Telemetry => self.indices.telemetry_index.clone(),
        };

        self.write_with_retry(&index, payload, &username).await;
    }

    async fn write_with_retry(&self, index: &str, document: Value, username: &str) {
        let mut attempt: u32 = 0;
        loop {
            match self.submit(index, document.clone()).await {
                Ok(()) => {
                    debug!(index = %index, "document indexed");
                    return;
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    warn!(index = %index, attempt, error = %err, "transient backend failure, backing off");
                    tokio::time::sleep(retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    error!(
                        index = %index,
                        user = %username,
                        error = %err,
                        "backend unreachable after {MAX_RETRIES} retries, document dropped"
                    );
                    return;
                }
                Err(err) => {
                    error!(index = %index, user = %username, error = %err, "backend rejected document, dropped");
                    return;
                }
            }
        }
    }

    /// One blocking write attempt, offloaded so this task never blocks an
    /// executor thread.
    async fn submit(&self, index: &str, document: Value) -> Result<(), BackendError> {
        let backend = self.backend.clone();
        let index = index.to_string();
        tokio::task::spawn_blocking(move || backend.index(&index, &document))
            .await
            .map_err(|join| BackendError::Api(format!("index task failed: {join}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Exchange;
    use bytes::Bytes;
    use chrono::Utc;
    use http::{HeaderMap, StatusCode};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Backend stub that fails the first `failures` calls, then succeeds.
    struct FlakyBackend {
        failures: u32,
        error: fn(String) -> BackendError,
        calls: AtomicU32,
        indexed: Mutex<Vec<(String, Value)>>,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                error: BackendError::Timeout,
                calls: AtomicU32::new(0),
                indexed: Mutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                failures: u32::MAX,
                error: BackendError::Api,
                calls: AtomicU32::new(0),
                indexed: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IndexBackend for FlakyBackend {
        fn index(&self, index: &str, document: &Value) -> Result<(), BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)(format!("injected failure #{call}")));
            }
            self.indexed
                .lock()
                .unwrap()
                .push((index.to_string(), document.clone()));
            Ok(())
        }
    }

    fn peer() -> IpAddr {
        "10.1.2.3".parse().unwrap()
    }

    fn telemetry_exchange() -> Exchange {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            http::header::CONTENT_TYPE,
            "application/x-json-stream".parse().unwrap(),
        );
        Exchange {
            url: "https://dc.services.example.com/v2/telemetry".to_string(),
            request_headers,
            request_body: Bytes::from_static(b"{\"data\":{\"baseData\":{\"name\":\"shown\"}}}\n"),
            request_start: Utc::now(),
            response_status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: Bytes::new(),
            response_end: Utc::now(),
            peer: peer(),
        }
    }

    fn worker(backend: Arc<FlakyBackend>) -> PersistWorker {
        let identities = Arc::new(IdentityStore::new());
        identities.record(peer(), "alice".to_string());
        PersistWorker::new(backend, identities, CaptureConfig::default())
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn successful_write_lands_in_the_telemetry_index() {
        let backend = Arc::new(FlakyBackend::new(0));
        worker(backend.clone()).persist(telemetry_exchange()).await;

        assert_eq!(backend.calls(), 1);
        let indexed = backend.indexed.lock().unwrap();
        let (index, document) = &indexed[0];
        assert_eq!(index, "github-copilot-telemetry");
        assert_eq!(document["user"], "alice");
        assert_eq!(document["request"]["content"][0]["data"]["baseData"]["name"], "shown");
    }

    #[tokio::test(start_paused = true)]
    async fn two_transient_failures_retry_with_one_then_two_seconds() {
        let backend = Arc::new(FlakyBackend::new(2));
        let started = tokio::time::Instant::now();
        worker(backend.clone()).persist(telemetry_exchange()).await;
        let elapsed = started.elapsed();

        assert_eq!(backend.calls(), 3);
        assert!(backend.indexed.lock().unwrap().len() == 1);
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_failure_stops_after_four_attempts() {
        let backend = Arc::new(FlakyBackend::new(u32::MAX));
        let started = tokio::time::Instant::now();
        worker(backend.clone()).persist(telemetry_exchange()).await;
        let elapsed = started.elapsed();

        // initial attempt + MAX_RETRIES, backoffs of 1s, 2s, 4s
        assert_eq!(backend.calls(), 4);
        assert!(backend.indexed.lock().unwrap().is_empty());
        assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn api_rejection_is_not_retried() {
        let backend = Arc::new(FlakyBackend::rejecting());
        worker(backend.clone()).persist(telemetry_exchange()).await;
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn unmapped_peer_writes_nothing() {
        let backend = Arc::new(FlakyBackend::new(0));
        let identities = Arc::new(IdentityStore::new());
        let worker = PersistWorker::new(backend.clone(), identities, CaptureConfig::default());
        worker.persist(telemetry_exchange()).await;
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_trailing_segment_writes_nothing() {
        let backend = Arc::new(FlakyBackend::new(0));
        let mut exchange = telemetry_exchange();
        exchange.url = "https://dc.services.example.com/telemetry/batch".to_string();
        worker(backend.clone()).persist(exchange).await;
        assert_eq!(backend.calls(), 0);
    }
}
