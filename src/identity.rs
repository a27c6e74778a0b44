//! Connection identity store
//!
//! Maps a client connection's peer address to the username it authenticated
//! as. Entries are written by the authentication gate at connect time and
//! consulted by the persistence worker at capture time. Entries are never
//! evicted; a reconnecting client overwrites its own entry.

use std::net::IpAddr;

use dashmap::DashMap;

/// Concurrent peer-address to username mapping.
///
/// Shared across connection handlers; lookups and records for distinct peers
/// never interfere.
#[derive(Debug, Default)]
pub struct IdentityStore {
    entries: DashMap<IpAddr, String>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a peer address to an authenticated username, replacing any
    /// previous binding for the same peer.
    pub fn record(&self, peer: IpAddr, username: String) {
        self.entries.insert(peer, username);
    }

    /// Resolve the username a peer authenticated as, if any.
    pub fn lookup(&self, peer: &IpAddr) -> Option<String> {
        self.entries.get(peer).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
