use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, loaded from `copilot-capture.toml` and
/// `CAPTURE_`-prefixed environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Settings for the interception surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Plain-text allow-list file, one username per line.
    #[serde(default = "default_allowed_users_file")]
    pub allowed_users_file: PathBuf,
}

/// Connection settings for the Elasticsearch cluster documents are written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Cluster URL, e.g. "https://localhost:9200".
    #[serde(default = "default_elasticsearch_url")]
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Custom CA certificate for clusters with self-signed TLS.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

/// Index names for the two capture categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_completions_index")]
    pub completions_index: String,

    #[serde(default = "default_telemetry_index")]
    pub telemetry_index: String,
}

fn default_allowed_users_file() -> PathBuf {
    PathBuf::from("allowed_users.txt")
}

fn default_elasticsearch_url() -> String {
    "https://localhost:9200".to_string()
}

fn default_completions_index() -> String {
    "github-copilot-completions".to_string()
}

fn default_telemetry_index() -> String {
    "github-copilot-telemetry".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allowed_users_file: default_allowed_users_file(),
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_elasticsearch_url(),
            username: String::new(),
            password: String::new(),
            ca_cert_path: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            completions_index: default_completions_index(),
            telemetry_index: default_telemetry_index(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_layout() {
        let config = Config::default();
        assert_eq!(
            config.proxy.allowed_users_file,
            PathBuf::from("allowed_users.txt")
        );
        assert_eq!(config.elasticsearch.url, "https://localhost:9200");
        assert_eq!(
            config.capture.completions_index,
            "github-copilot-completions"
        );
        assert_eq!(config.capture.telemetry_index, "github-copilot-telemetry");
    }
}
