//! LDAP authenticator
//!
//! One attempt walks a fixed sequence on a single connection:
//! bind as the service account, find the user, bind as the user, rebind as
//! the service account and list the user's groups. The connection is closed
//! whatever the outcome.

use crate::ldap::config::DirectoryConfig;
use crate::ldap::connection::{Connector, DirectoryConnection, LdapConnector, Session};
use crate::ldap::types::{BindStatus, DirectoryEntry, ResolvedIdentity};
use crate::metrics;
use guard_core::{AuthError, ConnectionError, Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Progress of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ChannelOpen,
    ServiceBound,
    UserFound,
    CredentialVerified,
    Done,
    /// Absorbing; holds the error code of the failed transition
    Failed(&'static str),
}

/// Authenticates users against the directory and resolves their groups.
///
/// Cheap to share: concurrent attempts only share the configuration and the
/// connector, each attempt opens its own connection.
pub struct LdapAuthenticator<C = LdapConnector> {
    config: Arc<DirectoryConfig>,
    connector: C,
}

impl LdapAuthenticator<LdapConnector> {
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_connector(Arc::new(config), LdapConnector)
    }
}

impl<C: Connector> LdapAuthenticator<C> {
    pub fn with_connector(config: Arc<DirectoryConfig>, connector: C) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Authenticate within the configured attempt timeout
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<ResolvedIdentity> {
        self.authenticate_within(username, password, self.config.attempt_timeout)
            .await
    }

    /// Authenticate a user and resolve their groups.
    ///
    /// Unknown user, ambiguous user and wrong password all come back as
    /// [`Error::AuthenticationFailed`]; the detailed reason is only logged.
    /// When `deadline` passes the connection is dropped and the result is a
    /// timeout.
    pub async fn authenticate_within(
        &self,
        username: &str,
        password: &str,
        deadline: Duration,
    ) -> Result<ResolvedIdentity> {
        let start = Instant::now();

        let result = match tokio::time::timeout(deadline, self.resolve(username, password)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout.into()),
        };

        metrics::record_attempt(metrics::outcome(&result), start.elapsed());

        match &result {
            Ok(identity) => info!(
                username,
                dn = %identity.distinguished_name,
                groups = identity.groups.len(),
                "LDAP authentication succeeded"
            ),
            Err(e) if e.is_denied() => {
                warn!(username, reason = e.code(), "LDAP authentication denied")
            }
            Err(e) => warn!(username, reason = e.code(), error = %e, "LDAP authentication failed"),
        }

        result.map_err(Error::into_public)
    }

    /// Connect and bind as the service account, then disconnect
    pub async fn probe(&self) -> Result<()> {
        match tokio::time::timeout(self.config.attempt_timeout, self.check_service_bind()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout.into()),
        }
    }

    async fn check_service_bind(&self) -> Result<()> {
        let mut attempt = Attempt::<C::Connection>::open(&self.config, &self.connector).await?;
        let result = attempt.bind_service().await;
        attempt.close().await;
        result
    }

    /// One attempt with detailed errors
    async fn resolve(&self, username: &str, password: &str) -> Result<ResolvedIdentity> {
        let mut attempt =
            match Attempt::<C::Connection>::open(&self.config, &self.connector).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    debug!(stage = ?Stage::Idle, reason = e.code(), "LDAP attempt stopped");
                    return Err(e);
                }
            };

        let result = attempt.run(username, password).await;
        attempt.close().await;
        result
    }
}

/// State of a single attempt; one method per transition
struct Attempt<'a, T: DirectoryConnection> {
    config: &'a DirectoryConfig,
    session: Session<T>,
    stage: Stage,
}

impl<'a, T: DirectoryConnection> Attempt<'a, T> {
    async fn open<C>(config: &'a DirectoryConfig, connector: &C) -> Result<Self>
    where
        C: Connector<Connection = T>,
    {
        let conn = connector.connect(config).await?;
        Ok(Self {
            config,
            session: Session::new(conn),
            stage: Stage::ChannelOpen,
        })
    }

    async fn run(&mut self, username: &str, password: &str) -> Result<ResolvedIdentity> {
        let result = self.steps(username, password).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn steps(&mut self, username: &str, password: &str) -> Result<ResolvedIdentity> {
        self.bind_service().await?;
        self.advance(Stage::ServiceBound);

        let entry = self.find_user(username).await?;
        self.verify_credential(&entry.dn, password).await?;
        let groups = self.resolve_groups(&entry.dn).await?;

        let display_name = entry
            .first_attr(&self.config.user_attribute)
            .unwrap_or(username)
            .to_string();
        Ok(ResolvedIdentity::new(entry.dn, display_name, groups))
    }

    async fn close(&mut self) {
        self.session.close().await;
    }

    fn advance(&mut self, to: Stage) {
        debug!(from = ?self.stage, to = ?to, "LDAP attempt advanced");
        self.stage = to;
    }

    fn fail(&mut self, err: &Error) {
        debug!(stage = ?self.stage, reason = err.code(), "LDAP attempt stopped");
        self.stage = Stage::Failed(err.code());
    }

    /// Bind with the service credentials, anonymously if none are set
    async fn bind_service(&mut self) -> Result<()> {
        let status = self
            .session
            .bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .map_err(|e| bind_failure(e, AuthError::ServiceBindFailed))?;

        match status {
            BindStatus::Bound => Ok(()),
            BindStatus::Rejected(rc) => {
                warn!(bind_dn = %self.config.bind_dn, rc, "LDAP service account bind rejected");
                Err(AuthError::ServiceBindFailed.into())
            }
        }
    }

    async fn find_user(&mut self, username: &str) -> Result<DirectoryEntry> {
        if username.is_empty() {
            return Err(AuthError::UserNotFound.into());
        }

        let request = self.config.user_search_request(username);
        let mut entries = self.session.search(&request).await?;

        if entries.len() > 1 {
            debug!(username, matches = entries.len(), "User search is ambiguous");
            return Err(AuthError::AmbiguousUser.into());
        }

        let entry = entries.pop().ok_or(AuthError::UserNotFound)?;
        if entry.dn.is_empty() {
            return Err(Error::Directory("user entry has an empty DN".to_string()));
        }

        debug!(username, dn = %entry.dn, "Found LDAP user");
        self.advance(Stage::UserFound);
        Ok(entry)
    }

    async fn verify_credential(&mut self, user_dn: &str, password: &str) -> Result<()> {
        // An empty password would make this an unauthenticated bind
        if password.is_empty() {
            return Err(AuthError::InvalidCredentials.into());
        }

        let status = self
            .session
            .bind(user_dn, password)
            .await
            .map_err(|e| bind_failure(e, AuthError::InvalidCredentials))?;

        match status {
            BindStatus::Bound => {
                self.advance(Stage::CredentialVerified);
                Ok(())
            }
            BindStatus::Rejected(rc) => {
                debug!(dn = user_dn, rc, "LDAP user bind rejected");
                Err(AuthError::InvalidCredentials.into())
            }
        }
    }

    async fn resolve_groups(&mut self, user_dn: &str) -> Result<Vec<String>> {
        // Group entries are often not readable by the user
        self.bind_service().await?;

        let request = self.config.group_search_request(user_dn);
        let entries = self.session.search(&request).await?;

        let name_attribute = &self.config.group_name_attribute;
        let groups = entries
            .into_iter()
            .filter_map(|entry| match entry.first_attr(name_attribute) {
                Some(name) => Some(name.to_string()),
                None => {
                    debug!(group = %entry.dn, attribute = %name_attribute, "Skipping group without name");
                    None
                }
            })
            .collect();

        self.advance(Stage::Done);
        Ok(groups)
    }
}

/// Transport failures keep their kind; anything else is the given auth failure
fn bind_failure(err: Error, kind: AuthError) -> Error {
    match err {
        Error::Connection(_) => err,
        other => {
            debug!(error = %other, "Malformed LDAP bind response");
            kind.into()
        }
    }
}
