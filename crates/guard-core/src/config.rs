//! Configuration for Guard
//!
//! These are the raw, externally supplied settings. They are validated into
//! an immutable directory configuration by `guard-auth` before use.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub ldap: LdapOptions,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GuardConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("Failed to read {:?}: {}", path, e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Load(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults overridden by `GUARD_*` variables resolved through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let ldap = &mut config.ldap;

        let strings: [(&str, &mut String); 11] = [
            ("GUARD_LDAP_SERVER_ADDRESS", &mut ldap.server_address),
            ("GUARD_LDAP_SERVER_PORT", &mut ldap.server_port),
            ("GUARD_LDAP_BIND_DN", &mut ldap.bind_dn),
            ("GUARD_LDAP_BIND_PASSWORD", &mut ldap.bind_password),
            ("GUARD_LDAP_USER_SEARCH_DN", &mut ldap.user_search_dn),
            ("GUARD_LDAP_USER_SEARCH_FILTER", &mut ldap.user_search_filter),
            ("GUARD_LDAP_USER_ATTRIBUTE", &mut ldap.user_attribute),
            ("GUARD_LDAP_GROUP_SEARCH_DN", &mut ldap.group_search_dn),
            ("GUARD_LDAP_GROUP_SEARCH_FILTER", &mut ldap.group_search_filter),
            ("GUARD_LDAP_GROUP_MEMBER_ATTRIBUTE", &mut ldap.group_member_attribute),
            ("GUARD_LDAP_GROUP_NAME_ATTRIBUTE", &mut ldap.group_name_attribute),
        ];
        for (key, field) in strings {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }

        let flags: [(&str, &mut bool); 3] = [
            ("GUARD_LDAP_SKIP_TLS_VERIFICATION", &mut ldap.skip_tls_verification),
            ("GUARD_LDAP_IS_SECURE_LDAP", &mut ldap.is_secure_ldap),
            ("GUARD_LDAP_START_TLS", &mut ldap.start_tls),
        ];
        for (key, field) in flags {
            if let Some(value) = lookup(key) {
                *field = value.eq_ignore_ascii_case("true") || value == "1";
            }
        }

        if let Some(path) = lookup("GUARD_LDAP_CA_CERT_FILE") {
            let path = path.trim();
            ldap.ca_cert_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(secs) = lookup("GUARD_LDAP_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            ldap.timeout_seconds = secs;
        }
        if let Some(secs) = lookup("GUARD_LDAP_ATTEMPT_TIMEOUT_SECONDS").and_then(|v| v.parse().ok())
        {
            ldap.attempt_timeout_seconds = secs;
        }

        if let Some(level) = lookup("GUARD_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("GUARD_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }
}

/// LDAP connector settings as supplied by flags, environment or file
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LdapOptions {
    /// Host or IP of the LDAP server
    #[serde(default)]
    pub server_address: String,

    /// LDAP server port
    #[serde(default = "default_server_port")]
    pub server_port: String,

    /// DN used to search for users and groups. Empty for anonymous access.
    #[serde(default)]
    pub bind_dn: String,

    /// Password for `bind_dn`. Empty for anonymous access.
    #[serde(default)]
    pub bind_password: String,

    /// Base DN to start the user search
    #[serde(default)]
    pub user_search_dn: String,

    /// Filter applied when searching for a user
    #[serde(default = "default_user_search_filter")]
    pub user_search_filter: String,

    /// LDAP username attribute
    #[serde(default = "default_user_attribute")]
    pub user_attribute: String,

    /// Base DN to start the group search
    #[serde(default)]
    pub group_search_dn: String,

    /// Filter applied when searching for the groups a user is member of
    #[serde(default = "default_group_search_filter")]
    pub group_search_filter: String,

    /// LDAP group member attribute
    #[serde(default = "default_group_member_attribute")]
    pub group_member_attribute: String,

    /// LDAP group name attribute
    #[serde(default = "default_group_name_attribute")]
    pub group_name_attribute: String,

    /// Skip server certificate verification (not recommended for production)
    #[serde(default)]
    pub skip_tls_verification: bool,

    /// LDAP over SSL (ldaps://)
    #[serde(default)]
    pub is_secure_ldap: bool,

    /// Upgrade a plain connection with StartTLS
    #[serde(default)]
    pub start_tls: bool,

    /// CA certificate file (PEM), needed for self-signed server certificates
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,

    /// Timeout for a single LDAP operation, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Deadline for a whole authentication attempt, in seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,
}

fn default_server_port() -> String {
    crate::DEFAULT_LDAP_PORT.to_string()
}

fn default_user_search_filter() -> String {
    crate::DEFAULT_USER_SEARCH_FILTER.to_string()
}

fn default_user_attribute() -> String {
    crate::DEFAULT_USER_ATTRIBUTE.to_string()
}

fn default_group_search_filter() -> String {
    crate::DEFAULT_GROUP_SEARCH_FILTER.to_string()
}

fn default_group_member_attribute() -> String {
    crate::DEFAULT_GROUP_MEMBER_ATTRIBUTE.to_string()
}

fn default_group_name_attribute() -> String {
    crate::DEFAULT_GROUP_NAME_ATTRIBUTE.to_string()
}

fn default_timeout() -> u64 {
    crate::DEFAULT_OPERATION_TIMEOUT_SECS
}

fn default_attempt_timeout() -> u64 {
    crate::DEFAULT_ATTEMPT_TIMEOUT_SECS
}

impl Default for LdapOptions {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            server_port: default_server_port(),
            bind_dn: String::new(),
            bind_password: String::new(),
            user_search_dn: String::new(),
            user_search_filter: default_user_search_filter(),
            user_attribute: default_user_attribute(),
            group_search_dn: String::new(),
            group_search_filter: default_group_search_filter(),
            group_member_attribute: default_group_member_attribute(),
            group_name_attribute: default_group_name_attribute(),
            skip_tls_verification: false,
            is_secure_ldap: false,
            start_tls: false,
            ca_cert_file: None,
            timeout_seconds: default_timeout(),
            attempt_timeout_seconds: default_attempt_timeout(),
        }
    }
}

impl fmt::Debug for LdapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapOptions")
            .field("server_address", &self.server_address)
            .field("server_port", &self.server_port)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("user_search_dn", &self.user_search_dn)
            .field("user_search_filter", &self.user_search_filter)
            .field("user_attribute", &self.user_attribute)
            .field("group_search_dn", &self.group_search_dn)
            .field("group_search_filter", &self.group_search_filter)
            .field("group_member_attribute", &self.group_member_attribute)
            .field("group_name_attribute", &self.group_name_attribute)
            .field("skip_tls_verification", &self.skip_tls_verification)
            .field("is_secure_ldap", &self.is_secure_ldap)
            .field("start_tls", &self.start_tls)
            .field("ca_cert_file", &self.ca_cert_file)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("attempt_timeout_seconds", &self.attempt_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
