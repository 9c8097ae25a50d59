//! LDAP connector types
//!
//! Covers:
//! - TLS posture of the directory connection
//! - Search requests and the entries they return
//! - The identity handed to the authorization layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// TLS posture
// ============================================================================

/// How the connection to the directory is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Unencrypted LDAP
    #[default]
    Plain,
    /// Plain connection upgraded with the StartTLS extended operation
    StartTls,
    /// LDAP over SSL (ldaps://)
    ImplicitTls,
}

impl TlsMode {
    /// Select the posture from the two legacy flags; `None` if both are set
    pub fn from_flags(is_secure_ldap: bool, start_tls: bool) -> Option<Self> {
        match (is_secure_ldap, start_tls) {
            (false, false) => Some(TlsMode::Plain),
            (false, true) => Some(TlsMode::StartTls),
            (true, false) => Some(TlsMode::ImplicitTls),
            (true, true) => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self, TlsMode::Plain)
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            TlsMode::ImplicitTls => "ldaps",
            TlsMode::Plain | TlsMode::StartTls => "ldap",
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TlsMode::Plain => "plain",
            TlsMode::StartTls => "starttls",
            TlsMode::ImplicitTls => "ldaps",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Search
// ============================================================================

/// Size limit of the user search: one more than we accept, to see ambiguity
pub const USER_SEARCH_SIZE_LIMIT: i32 = 2;

/// A subtree search, aliases never dereferenced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub filter: String,
    /// Maximum number of entries, 0 for no limit
    pub size_limit: i32,
    /// Server-side time limit in seconds, 0 for no limit
    pub time_limit: i32,
    pub attributes: Vec<String>,
}

/// An entry returned by a search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.attrs
            .insert(name.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// First value of an attribute; attribute names compare case-insensitively
    pub fn first_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(|s| s.as_str())
    }
}

impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
        }
    }
}

/// Outcome of a simple bind that reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    Bound,
    /// Rejected with the given LDAP result code (49 = invalid credentials)
    Rejected(u32),
}

// ============================================================================
// Resolved identity
// ============================================================================

/// Identity produced by a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// DN of the user entry
    pub distinguished_name: String,

    /// Value of the configured user attribute
    pub username: String,

    /// Group names in directory response order
    pub groups: Vec<String>,
}

impl ResolvedIdentity {
    pub fn new(distinguished_name: String, username: String, groups: Vec<String>) -> Self {
        Self {
            distinguished_name,
            username,
            groups,
        }
    }
}
