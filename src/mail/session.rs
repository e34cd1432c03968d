//! Connection Manager
//!
//! Opens an authenticated session, selects one mailbox and hands the caller
//! a [`MailboxLease`]. Every sync opens and tears down its own session.

use super::config::ImapConfig;
use super::retry::{RetryDecision, RetryPolicy};
use super::{FetchedMessage, MailError, MailResult, MailboxStatus};
use crate::credentials::{CredentialError, CredentialResolver, ResolvedCredentials};
use crate::db::Account;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens authenticated protocol sessions
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(
        &self,
        server: &ImapConfig,
        credentials: &ResolvedCredentials,
    ) -> MailResult<Box<dyn MailSession>>;
}

/// The protocol operations a sync needs from an authenticated session
#[async_trait]
pub trait MailSession: Send {
    async fn select(&mut self, mailbox: &str) -> MailResult<MailboxStatus>;

    /// UIDs matching a UID SEARCH query, in any order
    async fn uid_search(&mut self, query: &str) -> MailResult<Vec<u32>>;

    /// Raw bytes and flags for the given UIDs. UIDs the server does not
    /// return are simply absent from the result.
    async fn uid_fetch(&mut self, uids: &[u32]) -> MailResult<Vec<FetchedMessage>>;

    async fn add_seen(&mut self, uids: &[u32]) -> MailResult<()>;

    /// Release the selected mailbox
    async fn close(&mut self) -> MailResult<()>;

    async fn logout(&mut self) -> MailResult<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Mail(#[from] MailError),
}

/// A session with one selected mailbox.
///
/// Call [`MailboxLease::release`] on every path once the work is done.
/// A lease that is dropped instead (cancelled future) closes the socket.
pub struct MailboxLease {
    session: Box<dyn MailSession>,
    mailbox: String,
    status: MailboxStatus,
}

impl MailboxLease {
    pub fn session(&mut self) -> &mut dyn MailSession {
        self.session.as_mut()
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn status(&self) -> &MailboxStatus {
        &self.status
    }

    /// CLOSE the mailbox, then LOGOUT. Errors are logged, never returned.
    pub async fn release(mut self) {
        if let Err(e) = self.session.close().await {
            log::debug!("CLOSE {} failed: {}", self.mailbox, e);
        }
        if let Err(e) = self.session.logout().await {
            log::debug!("LOGOUT failed: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn MailConnector>,
    credentials: CredentialResolver,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn MailConnector>,
        credentials: CredentialResolver,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            credentials,
            policy,
        }
    }

    /// Connect with retry-after-refresh, then select `mailbox`
    pub async fn open_mailbox(
        &self,
        account: &Account,
        mailbox: &str,
    ) -> Result<MailboxLease, ConnectionError> {
        let server = ImapConfig::from_account(account);
        let mut credentials = self.credentials.resolve(account).await?;
        let can_refresh = self.credentials.has_refresh_path(account);

        let mut attempt = 1;
        let mut session = loop {
            match self.connector.connect(&server, &credentials).await {
                Ok(session) => break session,
                Err(e) => match self.policy.decide(&e, attempt, can_refresh) {
                    RetryDecision::RefreshAndRetry { backoff } => {
                        log::warn!(
                            "Authentication failed for account {} (attempt {}), refreshing credentials",
                            account.id,
                            attempt
                        );
                        if !backoff.is_zero() {
                            tokio::time::sleep(backoff).await;
                        }
                        credentials = self.credentials.force_refresh(account).await?;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => return Err(e.into()),
                },
            }
        };
        drop(credentials);

        match session.select(mailbox).await {
            Ok(status) => {
                log::debug!(
                    "Selected {} for account {} (exists={}, uidnext={:?})",
                    mailbox,
                    account.id,
                    status.exists,
                    status.uid_next
                );
                Ok(MailboxLease {
                    session,
                    mailbox: mailbox.to_string(),
                    status,
                })
            }
            Err(e) => {
                if let Err(logout) = session.logout().await {
                    log::debug!("LOGOUT after failed SELECT failed: {}", logout);
                }
                Err(e.into())
            }
        }
    }
}
