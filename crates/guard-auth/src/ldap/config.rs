//! Validated directory configuration
//!
//! Built once from [`LdapOptions`] and shared read-only by every
//! authentication attempt.

use crate::ldap::filter;
use crate::ldap::types::{SearchRequest, TlsMode, USER_SEARCH_SIZE_LIMIT};
use guard_core::{ConfigError, LdapOptions};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable, validated LDAP connector settings
#[derive(Clone)]
pub struct DirectoryConfig {
    pub(crate) server_address: String,
    pub(crate) server_port: u16,
    pub(crate) bind_dn: String,
    pub(crate) bind_password: String,
    pub(crate) user_search_base: String,
    pub(crate) user_search_filter: String,
    pub(crate) user_attribute: String,
    pub(crate) group_search_base: String,
    pub(crate) group_search_filter: String,
    pub(crate) group_member_attribute: String,
    pub(crate) group_name_attribute: String,
    pub(crate) tls_mode: TlsMode,
    pub(crate) skip_tls_verification: bool,
    /// Client config trusting only the configured CA; `None` means system roots
    pub(crate) tls_config: Option<Arc<ClientConfig>>,
    pub(crate) trusted_ca_count: usize,
    pub(crate) timeout: Duration,
    pub(crate) attempt_timeout: Duration,
}

impl DirectoryConfig {
    /// Validate options, apply defaults and load the trust pool
    pub fn from_options(opts: &LdapOptions) -> Result<Self, ConfigError> {
        let server_address = opts.server_address.trim();
        if server_address.is_empty() {
            return Err(ConfigError::MissingServerAddress);
        }

        let port = or_default(&opts.server_port, guard_core::DEFAULT_LDAP_PORT);
        let server_port = match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(ConfigError::InvalidPort(port.to_string())),
        };

        let tls_mode = TlsMode::from_flags(opts.is_secure_ldap, opts.start_tls)
            .ok_or(ConfigError::ConflictingTlsModes)?;

        if opts.bind_dn.is_empty() && !opts.bind_password.is_empty() {
            return Err(ConfigError::BindPasswordWithoutDn);
        }
        if !opts.bind_dn.is_empty() && opts.bind_password.is_empty() {
            warn!(
                bind_dn = %opts.bind_dn,
                "Bind DN without password; most servers treat this as an unauthenticated bind"
            );
        }

        let user_search_filter = validated_filter(
            "user search filter",
            or_default(&opts.user_search_filter, guard_core::DEFAULT_USER_SEARCH_FILTER),
        )?;
        let group_search_filter = validated_filter(
            "group search filter",
            or_default(&opts.group_search_filter, guard_core::DEFAULT_GROUP_SEARCH_FILTER),
        )?;
        let user_attribute = validated_attribute(
            "user attribute",
            or_default(&opts.user_attribute, guard_core::DEFAULT_USER_ATTRIBUTE),
        )?;
        let group_member_attribute = validated_attribute(
            "group member attribute",
            or_default(
                &opts.group_member_attribute,
                guard_core::DEFAULT_GROUP_MEMBER_ATTRIBUTE,
            ),
        )?;
        let group_name_attribute = validated_attribute(
            "group name attribute",
            or_default(&opts.group_name_attribute, guard_core::DEFAULT_GROUP_NAME_ATTRIBUTE),
        )?;

        let mut tls_config = None;
        let mut trusted_ca_count = 0;
        match (&opts.ca_cert_file, tls_mode.is_encrypted()) {
            (Some(path), true) => {
                let (config, count) = load_trust_pool(path)?;
                trusted_ca_count = count;
                if opts.skip_tls_verification {
                    warn!(path = ?path, "CA certificate file is unused while TLS verification is skipped");
                } else {
                    tls_config = Some(config);
                }
            }
            (Some(path), false) => {
                warn!(path = ?path, "CA certificate file ignored for plain LDAP");
            }
            (None, _) => {}
        }

        if opts.skip_tls_verification && tls_mode.is_encrypted() {
            warn!("LDAP server certificate verification is disabled");
        }

        let timeout = seconds_or_default(opts.timeout_seconds, guard_core::DEFAULT_OPERATION_TIMEOUT_SECS);
        let attempt_timeout = seconds_or_default(
            opts.attempt_timeout_seconds,
            guard_core::DEFAULT_ATTEMPT_TIMEOUT_SECS,
        );

        Ok(Self {
            server_address: server_address.to_string(),
            server_port,
            bind_dn: opts.bind_dn.clone(),
            bind_password: opts.bind_password.clone(),
            user_search_base: opts.user_search_dn.clone(),
            user_search_filter,
            user_attribute,
            group_search_base: opts.group_search_dn.clone(),
            group_search_filter,
            group_member_attribute,
            group_name_attribute,
            tls_mode,
            skip_tls_verification: opts.skip_tls_verification,
            tls_config,
            trusted_ca_count,
            timeout,
            attempt_timeout,
        })
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    pub fn skip_tls_verification(&self) -> bool {
        self.skip_tls_verification
    }

    /// Whether a custom trust pool replaces the system trust store
    pub fn has_custom_trust_pool(&self) -> bool {
        self.tls_config.is_some()
    }

    pub fn user_search_filter(&self) -> &str {
        &self.user_search_filter
    }

    pub fn user_attribute(&self) -> &str {
        &self.user_attribute
    }

    pub fn group_search_filter(&self) -> &str {
        &self.group_search_filter
    }

    pub fn group_member_attribute(&self) -> &str {
        &self.group_member_attribute
    }

    pub fn group_name_attribute(&self) -> &str {
        &self.group_name_attribute
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn is_anonymous(&self) -> bool {
        self.bind_dn.is_empty() && self.bind_password.is_empty()
    }

    /// Connection URL; IPv6 literals are bracketed
    pub fn url(&self) -> String {
        let host = if self.server_address.contains(':') && !self.server_address.starts_with('[') {
            format!("[{}]", self.server_address)
        } else {
            self.server_address.clone()
        };
        format!("{}://{}:{}", self.tls_mode.scheme(), host, self.server_port)
    }

    /// User lookup; asks for two entries so a second match is visible
    pub fn user_search_request(&self, username: &str) -> SearchRequest {
        SearchRequest {
            base_dn: self.user_search_base.clone(),
            filter: filter::and_equals(&self.user_search_filter, &self.user_attribute, username),
            size_limit: USER_SEARCH_SIZE_LIMIT,
            time_limit: self.time_limit(),
            attributes: vec![self.user_attribute.clone()],
        }
    }

    /// Groups whose member attribute references `user_dn`
    pub fn group_search_request(&self, user_dn: &str) -> SearchRequest {
        SearchRequest {
            base_dn: self.group_search_base.clone(),
            filter: filter::and_equals(
                &self.group_search_filter,
                &self.group_member_attribute,
                user_dn,
            ),
            size_limit: 0,
            time_limit: self.time_limit(),
            attributes: vec![self.group_name_attribute.clone()],
        }
    }

    fn time_limit(&self) -> i32 {
        i32::try_from(self.timeout.as_secs()).unwrap_or(i32::MAX)
    }
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trust = if self.tls_config.is_some() {
            format!("custom ({} certificates)", self.trusted_ca_count)
        } else {
            "system".to_string()
        };
        f.debug_struct("DirectoryConfig")
            .field("url", &self.url())
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("user_search_base", &self.user_search_base)
            .field("user_search_filter", &self.user_search_filter)
            .field("user_attribute", &self.user_attribute)
            .field("group_search_base", &self.group_search_base)
            .field("group_search_filter", &self.group_search_filter)
            .field("group_member_attribute", &self.group_member_attribute)
            .field("group_name_attribute", &self.group_name_attribute)
            .field("tls_mode", &self.tls_mode)
            .field("skip_tls_verification", &self.skip_tls_verification)
            .field("trust", &trust)
            .field("timeout", &self.timeout)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let value = value.trim();
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn seconds_or_default(secs: u64, default: u64) -> Duration {
    Duration::from_secs(if secs == 0 { default } else { secs })
}

fn validated_filter(name: &'static str, value: &str) -> Result<String, ConfigError> {
    if filter::is_well_formed(value) {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidFilter {
            name,
            filter: value.to_string(),
        })
    }
}

fn validated_attribute(name: &'static str, value: &str) -> Result<String, ConfigError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ';' | '_'));
    if valid {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidAttribute {
            name,
            value: value.to_string(),
        })
    }
}

/// Load CA certificates from a PEM file into a rustls client config
fn load_trust_pool(path: &Path) -> Result<(Arc<ClientConfig>, usize), ConfigError> {
    let ca_error = |reason: String| ConfigError::CaCertificate {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| ca_error(e.to_string()))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ca_error(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(ca_error("No certificates found".to_string()));
    }

    let count = certs.len();
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| ca_error(format!("Invalid CA certificate: {}", e)))?;
    }
    debug!(path = ?path, count, "Loaded LDAP CA certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ca_error(format!("TLS config error: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok((Arc::new(config), count))
}
