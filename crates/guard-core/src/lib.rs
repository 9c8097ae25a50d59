//! Guard Core Library
//!
//! Error taxonomy and external configuration shared by the Guard crates.

pub mod config;
pub mod error;

pub use config::{GuardConfig, LdapOptions, LoggingConfig};
pub use error::{AuthError, ConfigError, ConnectionError, Error, Result};

/// Guard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default LDAP port
pub const DEFAULT_LDAP_PORT: &str = "389";

/// Default filter applied when searching for a user
pub const DEFAULT_USER_SEARCH_FILTER: &str = "(objectClass=person)";

/// Default LDAP username attribute
pub const DEFAULT_USER_ATTRIBUTE: &str = "uid";

/// Default filter applied when searching for the groups a user is member of
pub const DEFAULT_GROUP_SEARCH_FILTER: &str = "(objectClass=groupOfNames)";

/// Default LDAP group member attribute
pub const DEFAULT_GROUP_MEMBER_ATTRIBUTE: &str = "member";

/// Default LDAP group name attribute
pub const DEFAULT_GROUP_NAME_ATTRIBUTE: &str = "cn";

/// Per-operation timeout, also sent as the search time limit (seconds)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Overall deadline of one authentication attempt (seconds)
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;
