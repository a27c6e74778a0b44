use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::schema::Config;
use crate::error::{ConfigError, Result};

const CONFIG_FILE: &str = "copilot-capture.toml";
const ENV_PREFIX: &str = "CAPTURE_";

pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file(CONFIG_FILE))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file(path.as_ref()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let url = &config.elasticsearch.url;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "elasticsearch.url must be an http(s) URL, got '{url}'"
        ))
        .into());
    }

    if config.capture.completions_index.is_empty() || config.capture.telemetry_index.is_empty() {
        return Err(ConfigError::Validation("capture index names must not be empty".into()).into());
    }

    if config.proxy.allowed_users_file.as_os_str().is_empty() {
        return Err(ConfigError::Validation("proxy.allowed_users_file must be set".into()).into());
    }

    Ok(())
}
