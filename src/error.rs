use std::io;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Allow-list file not found: {0}")]
    AllowListNotFound(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No Proxy-Authorization header")]
    MissingCredentials,

    #[error("Malformed Proxy-Authorization header: {0}")]
    MalformedCredentials(String),

    #[error("Username not in allow-list: {0}")]
    UnknownUser(String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed JSON record on line {line}: {source}")]
    MalformedLine {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Malformed JSON document: {0}")]
    MalformedDocument(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
