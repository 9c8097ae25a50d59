//! LDAP authentication for Guard

pub mod ldap;
pub mod metrics;

pub use ldap::{
    DirectoryConfig, LdapAuthenticator, LdapConnector, ResolvedIdentity, TlsMode,
};
