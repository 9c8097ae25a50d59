//! Error types for Guard

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Denial reported to callers in place of the detailed [`AuthError`] kinds
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unexpected directory response: {0}")]
    Directory(String),
}

/// Configuration errors, detected once at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("LDAP server address is required")]
    MissingServerAddress,

    #[error("Invalid LDAP server port: {0}")]
    InvalidPort(String),

    #[error("Secure LDAP and StartTLS cannot both be enabled")]
    ConflictingTlsModes,

    #[error("Failed to load CA certificate {path:?}: {reason}")]
    CaCertificate { path: PathBuf, reason: String },

    #[error("Malformed {name}: {filter}")]
    InvalidFilter { name: &'static str, filter: String },

    #[error("Invalid {name}: {value:?}")]
    InvalidAttribute { name: &'static str, value: String },

    #[error("Bind password is set but bind DN is empty")]
    BindPasswordWithoutDn,

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Transport failures; the whole attempt may be retried
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to LDAP server: {0}")]
    DialFailed(String),

    #[error("TLS negotiation with LDAP server failed: {0}")]
    HandshakeFailed(String),

    #[error("LDAP operation timed out")]
    Timeout,
}

/// Terminal outcomes of a single authentication attempt
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Service account bind failed")]
    ServiceBindFailed,

    #[error("User not found")]
    UserNotFound,

    #[error("User search matched more than one entry")]
    AmbiguousUser,

    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::ServiceBindFailed => "service_bind_failed",
            AuthError::UserNotFound => "user_not_found",
            AuthError::AmbiguousUser => "ambiguous_user",
            AuthError::InvalidCredentials => "invalid_credentials",
        }
    }

    /// Kinds that must look the same to the end user
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuthError::UserNotFound | AuthError::AmbiguousUser | AuthError::InvalidCredentials
        )
    }
}

impl Error {
    /// Stable identifier for logs and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Connection(ConnectionError::DialFailed(_)) => "dial_failed",
            Error::Connection(ConnectionError::HandshakeFailed(_)) => "handshake_failed",
            Error::Connection(ConnectionError::Timeout) => "timeout",
            Error::Auth(kind) => kind.code(),
            Error::AuthenticationFailed => "authentication_failed",
            Error::Directory(_) => "directory_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    pub fn is_denied(&self) -> bool {
        match self {
            Error::AuthenticationFailed => true,
            Error::Auth(kind) => kind.is_denial(),
            _ => false,
        }
    }

    /// Collapse the enumeration-sensitive kinds into [`Error::AuthenticationFailed`]
    pub fn into_public(self) -> Self {
        match self {
            Error::Auth(kind) if kind.is_denial() => Error::AuthenticationFailed,
            other => other,
        }
    }
}
