//! LDAP identity resolution
//!
//! Authenticates a username and password against an LDAP directory and
//! resolves the groups the user belongs to.
//!
//! Features:
//! - Plain LDAP, StartTLS and LDAPS with an optional custom CA
//! - Service account (or anonymous) search with injection-safe filters
//! - Per-operation and per-attempt timeouts
//! - One connection per attempt, always released

mod client;
mod config;
mod connection;
mod filter;
#[cfg(test)]
mod memory;
mod types;

pub use client::{LdapAuthenticator, Stage};
pub use config::DirectoryConfig;
pub use connection::{Connector, DirectoryConnection, LdapConnection, LdapConnector, Session};
pub use filter::{and_equals, escape_value, is_well_formed};
pub use types::*;
