//! Elasticsearch-backed document store
//!
//! Thin blocking HTTP client over the Elasticsearch document API. One
//! document per call via `POST /{index}/_doc`; the cluster assigns ids.

use std::fs;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Certificate;
use serde_json::Value;
use tracing::debug;

use crate::backend::{BackendError, IndexBackend};
use crate::config::ElasticsearchConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct ElasticBackend {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ElasticBackend {
    /// Build a client from configuration.
    ///
    /// This constructs a `reqwest::blocking::Client`, which must happen off
    /// any async runtime thread; call it from `spawn_blocking` or before the
    /// runtime starts.
    pub fn connect(config: &ElasticsearchConfig) -> Result<Self, BackendError> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);

        if let Some(ca_path) = &config.ca_cert_path {
            let pem = fs::read(ca_path).map_err(|e| {
                BackendError::Connection(format!(
                    "cannot read CA certificate {}: {e}",
                    ca_path.display()
                ))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| BackendError::Connection(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| BackendError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Verify the cluster is reachable and the credentials are accepted.
    pub fn ping(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(&self.base_url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BackendError::Api(format!("ping returned {status}")))
        }
    }

    fn document_url(&self, index: &str) -> String {
        format!("{}/{}/_doc", self.base_url, index)
    }
}

impl IndexBackend for ElasticBackend {
    fn index(&self, index: &str, document: &Value) -> Result<(), BackendError> {
        let url = self.document_url(index);
        debug!(index = %index, "indexing document");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(document)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            Err(BackendError::Api(format!("index returned {status}: {body}")))
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_connect() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Api(err.to_string())
    }
}
