//! Proxy authentication gate
//!
//! Every new client connection presents a `Proxy-Authorization: Basic`
//! header. The gate decodes the username out of it, checks it against the
//! allow-list, and on success records the connection's identity so captured
//! exchanges can be attributed later. The password half of the credential is
//! ignored; the allow-list file is the sole authority.

use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{info, warn};

use crate::error::{AuthError, ConfigError, Result};
use crate::identity::IdentityStore;

/// Immutable set of usernames allowed through the proxy.
///
/// Loaded once at startup; read-only afterwards.
#[derive(Debug, Clone)]
pub struct AllowList {
    users: HashSet<String>,
}

impl AllowList {
    /// Load usernames from a plain-text file, one per line. Blank lines are
    /// ignored; surrounding whitespace is trimmed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(
                ConfigError::AllowListNotFound(path.display().to_string()).into(),
            );
        }
        let raw = fs::read_to_string(path)?;
        Ok(Self::from_users(raw.lines()))
    }

    pub fn from_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let users = users
            .into_iter()
            .map(|user| user.as_ref().trim().to_string())
            .filter(|user| !user.is_empty())
            .collect();
        Self { users }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Validates proxy credentials at connection establishment.
pub struct AuthGate {
    allow_list: AllowList,
}

impl AuthGate {
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    /// Check a connection's `Proxy-Authorization` header value.
    ///
    /// On success the peer's identity is recorded into `identities` and the
    /// admitted username returned. Every failure path leaves the identity
    /// store untouched.
    pub fn authenticate(
        &self,
        peer: IpAddr,
        proxy_auth: Option<&str>,
        identities: &IdentityStore,
    ) -> std::result::Result<String, AuthError> {
        let header = match proxy_auth {
            Some(header) if !header.trim().is_empty() => header,
            _ => {
                warn!(peer = %peer, "no Proxy-Authorization header on connect");
                return Err(AuthError::MissingCredentials);
            }
        };

        let username = decode_basic_username(header).map_err(|err| {
            warn!(peer = %peer, error = %err, "rejecting malformed proxy credentials");
            err
        })?;

        if !self.allow_list.contains(&username) {
            warn!(peer = %peer, user = %username, "username not in allow-list");
            return Err(AuthError::UnknownUser(username));
        }

        info!(peer = %peer, user = %username, "authenticated user");
        identities.record(peer, username.clone());
        Ok(username)
    }
}

/// Extract the username from a `Basic <base64(username:password)>` header
/// value. The scheme match is case-insensitive; anything other than Basic is
/// malformed here since that is the only scheme clients are configured with.
fn decode_basic_username(header: &str) -> std::result::Result<String, AuthError> {
    let (scheme, encoded) = header
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| AuthError::MalformedCredentials("missing credential payload".into()))?;

    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::MalformedCredentials(format!(
            "unsupported scheme: {scheme}"
        )));
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::MalformedCredentials("invalid base64".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthError::MalformedCredentials("credential is not UTF-8".into()))?;

    // Only the username half matters; a credential without a colon is all
    // username.
    let username = decoded
        .split_once(':')
        .map(|(user, _)| user.to_string())
        .unwrap_or(decoded);
    Ok(username)
}
