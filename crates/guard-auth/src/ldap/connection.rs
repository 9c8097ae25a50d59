//! Directory connections
//!
//! [`Connector`] opens a connection in the configured TLS posture and
//! [`Session`] owns it for the length of one authentication attempt. The
//! `ldap3` implementation lives here too; tests use an in-memory directory.

use crate::ldap::config::DirectoryConfig;
use crate::ldap::types::{BindStatus, DirectoryEntry, SearchRequest, TlsMode};
use async_trait::async_trait;
use guard_core::{ConnectionError, Error, Result};
use ldap3::{
    DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry,
    SearchOptions, SearchResult,
};
use std::io;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const RC_SUCCESS: u32 = 0;
const RC_TIME_LIMIT_EXCEEDED: u32 = 3;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// An open connection to the directory
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind; empty DN and password is an anonymous bind
    async fn bind(&mut self, dn: &str, password: &str) -> Result<BindStatus>;

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>>;

    async fn unbind(&mut self) -> Result<()>;

    /// Tear the transport down without talking to the server
    fn terminate(&mut self);
}

/// Opens connections in the posture described by a [`DirectoryConfig`]
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: DirectoryConnection + 'static;

    async fn connect(&self, config: &DirectoryConfig) -> Result<Self::Connection>;
}

// ============================================================================
// Session
// ============================================================================

/// Owns one connection and releases it exactly once.
///
/// `close` unbinds and terminates; dropping an open session (early return,
/// cancellation, deadline) terminates without unbinding.
pub struct Session<T: DirectoryConnection> {
    conn: Option<T>,
}

impl<T: DirectoryConnection> Session<T> {
    pub fn new(conn: T) -> Self {
        Self { conn: Some(conn) }
    }

    pub async fn bind(&mut self, dn: &str, password: &str) -> Result<BindStatus> {
        self.conn()?.bind(dn, password).await
    }

    pub async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>> {
        self.conn()?.search(request).await
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.unbind().await {
                debug!(error = %e, "LDAP unbind failed");
            }
        }
        // Still held if the unbind above was cancelled; Drop handles that case
        if let Some(mut conn) = self.conn.take() {
            conn.terminate();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn conn(&mut self) -> Result<&mut T> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Directory("LDAP session already closed".to_string()))
    }
}

impl<T: DirectoryConnection> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.terminate();
        }
    }
}

// ============================================================================
// ldap3 implementation
// ============================================================================

/// Connects with `ldap3` over tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

#[async_trait]
impl Connector for LdapConnector {
    type Connection = LdapConnection;

    async fn connect(&self, config: &DirectoryConfig) -> Result<LdapConnection> {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout)
            .set_starttls(config.tls_mode == TlsMode::StartTls)
            .set_no_tls_verify(config.skip_tls_verification);

        if let Some(tls_config) = &config.tls_config {
            settings = settings.set_config(tls_config.clone());
        }

        let url = config.url();
        debug!(url = %url, tls_mode = %config.tls_mode, "Connecting to LDAP server");

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| connect_error(config.tls_mode, e))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                error!("LDAP connection error: {}", e);
            }
        });

        Ok(LdapConnection {
            ldap,
            driver,
            timeout: config.timeout,
        })
    }
}

/// A live `ldap3` connection and the task driving it
pub struct LdapConnection {
    ldap: Ldap,
    driver: JoinHandle<()>,
    timeout: Duration,
}

impl LdapConnection {
    fn op_error(&mut self, err: LdapError) -> Error {
        let closed = self.ldap.is_closed();
        session_error(err, closed)
    }
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<BindStatus> {
        let result = match self
            .ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await
        {
            Ok(result) => result,
            Err(e) => return Err(self.op_error(e)),
        };

        let status = bind_status(result.rc);
        if let BindStatus::Rejected(rc) = status {
            debug!(dn, rc, "LDAP bind rejected");
        }
        Ok(status)
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>> {
        let opts = SearchOptions::new()
            .deref(DerefAliases::Never)
            .sizelimit(request.size_limit)
            .timelimit(request.time_limit);

        debug!(base = %request.base_dn, filter = %request.filter, "Searching LDAP");

        let SearchResult(entries, result) = match self
            .ldap
            .with_search_options(opts)
            .with_timeout(self.timeout)
            .search(
                &request.base_dn,
                Scope::Subtree,
                &request.filter,
                request.attributes.clone(),
            )
            .await
        {
            Ok(search) => search,
            Err(e) => return Err(self.op_error(e)),
        };

        search_status(result.rc, &result.text)?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(DirectoryEntry::from)
            .collect())
    }

    async fn unbind(&mut self) -> Result<()> {
        match self.ldap.with_timeout(self.timeout).unbind().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.op_error(e)),
        }
    }

    fn terminate(&mut self) {
        self.driver.abort();
    }
}

impl Drop for LdapConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn bind_status(rc: u32) -> BindStatus {
    if rc == RC_SUCCESS {
        BindStatus::Bound
    } else {
        BindStatus::Rejected(rc)
    }
}

/// sizeLimitExceeded still carries the entries returned so far
fn search_status(rc: u32, text: &str) -> Result<()> {
    match rc {
        RC_SUCCESS | RC_SIZE_LIMIT_EXCEEDED => Ok(()),
        RC_TIME_LIMIT_EXCEEDED => Err(ConnectionError::Timeout.into()),
        rc => Err(Error::Directory(format!(
            "search failed with code {}: {}",
            rc, text
        ))),
    }
}

/// Classify a failure on an established connection
fn session_error(err: LdapError, closed: bool) -> Error {
    match err {
        LdapError::Timeout { .. } => ConnectionError::Timeout.into(),
        LdapError::Io { source } if source.kind() == io::ErrorKind::TimedOut => {
            ConnectionError::Timeout.into()
        }
        LdapError::Io { source } => {
            ConnectionError::DialFailed(format!("connection closed: {}", source)).into()
        }
        other if closed => {
            ConnectionError::DialFailed(format!("connection closed: {}", other)).into()
        }
        other => Error::Directory(other.to_string()),
    }
}

/// Classify a failure to establish the connection
fn connect_error(mode: TlsMode, err: LdapError) -> Error {
    let err = match err {
        LdapError::Timeout { .. } => ConnectionError::Timeout,
        LdapError::Io { source } => match source.kind() {
            io::ErrorKind::TimedOut => ConnectionError::Timeout,
            io::ErrorKind::InvalidData if mode.is_encrypted() => {
                ConnectionError::HandshakeFailed(source.to_string())
            }
            _ => ConnectionError::DialFailed(source.to_string()),
        },
        other if mode.is_encrypted() => ConnectionError::HandshakeFailed(other.to_string()),
        other => ConnectionError::DialFailed(other.to_string()),
    };
    err.into()
}
