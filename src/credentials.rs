//! Credential Resolver
//!
//! Turns the encrypted credential columns of an [`Account`] into a secret
//! usable for one connection attempt. OAuth access tokens are refreshed
//! through the provider when they are about to expire or when the mail
//! server rejected them.

use crate::crypto::{Cipher, CryptoError};
use crate::db::{Account, Database, DbError};
use crate::oauth::{self, OAuthError, OAuthProvider, OAuthProviders};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Refresh this many seconds before the recorded expiry
const EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to decrypt credential: {0}")]
    Decryption(#[from] CryptoError),

    #[error("Re-authentication required for account {account_id}: {reason}")]
    ReauthRequired { account_id: i64, reason: String },

    #[error("Account {0} has no stored credential material")]
    MissingMaterial(i64),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// How an account authenticates against IMAP and SMTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    Password,
    OAuth(OAuthProvider),
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::OAuth(OAuthProvider::Google) => "oauth:google",
            Self::OAuth(OAuthProvider::Microsoft) => "oauth:microsoft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once(':') {
            None if s == "password" => Some(Self::Password),
            Some(("oauth", provider)) => OAuthProvider::parse(provider).map(Self::OAuth),
            _ => None,
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth(_))
    }
}

/// Secret for a single connection attempt, wiped when dropped
pub struct ResolvedCredentials {
    pub username: String,
    pub auth_mode: AuthMode,
    secret: Zeroizing<String>,
}

impl ResolvedCredentials {
    pub fn new(username: impl Into<String>, auth_mode: AuthMode, secret: String) -> Self {
        Self {
            username: username.into(),
            auth_mode,
            secret: Zeroizing::new(secret),
        }
    }

    /// Password or OAuth access token
    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }

    pub fn is_oauth(&self) -> bool {
        self.auth_mode.is_oauth()
    }
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("username", &self.username)
            .field("auth_mode", &self.auth_mode)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct CredentialResolver {
    db: Database,
    cipher: Cipher,
    providers: Arc<OAuthProviders>,
}

impl CredentialResolver {
    pub fn new(db: Database, cipher: Cipher, providers: Arc<OAuthProviders>) -> Self {
        Self {
            db,
            cipher,
            providers,
        }
    }

    /// Whether an authentication failure can be recovered by refreshing
    pub fn has_refresh_path(&self, account: &Account) -> bool {
        account.auth_mode.is_oauth() && account.oauth_refresh_token.is_some()
    }

    /// Resolve IMAP credentials, refreshing an expired access token
    pub async fn resolve(&self, account: &Account) -> CredentialResult<ResolvedCredentials> {
        self.resolve_for(account, account.imap_login()).await
    }

    /// Resolve SMTP credentials for digest delivery
    pub async fn resolve_smtp(&self, account: &Account) -> CredentialResult<ResolvedCredentials> {
        self.resolve_for(account, account.smtp_login()).await
    }

    async fn resolve_for(&self, account: &Account, username: &str) -> CredentialResult<ResolvedCredentials> {
        match account.auth_mode {
            AuthMode::Password => {
                let encrypted = account
                    .password_encrypted
                    .as_deref()
                    .ok_or(CredentialError::MissingMaterial(account.id))?;
                let password = self.cipher.decrypt(encrypted)?;
                Ok(ResolvedCredentials::new(username, account.auth_mode, password))
            }
            AuthMode::OAuth(provider) => {
                let expired = account
                    .oauth_expires_at
                    .map(|expires_at| expires_at - EXPIRY_MARGIN_SECS <= Utc::now().timestamp())
                    .unwrap_or(true);

                match account.oauth_access_token.as_deref() {
                    Some(encrypted) if !expired => {
                        let token = self.cipher.decrypt(encrypted)?;
                        Ok(ResolvedCredentials::new(username, account.auth_mode, token))
                    }
                    _ => {
                        log::info!("Access token for account {} expired, refreshing", account.id);
                        let token = self.refresh(account, provider).await?;
                        Ok(ResolvedCredentials::new(username, account.auth_mode, token))
                    }
                }
            }
        }
    }

    /// Refresh after the mail server rejected the current access token
    ///
    /// The stored row is reloaded first: an earlier refresh in the same
    /// attempt may already have rotated the refresh token.
    pub async fn force_refresh(&self, account: &Account) -> CredentialResult<ResolvedCredentials> {
        match account.auth_mode {
            AuthMode::OAuth(provider) => {
                let current = self.db.get_account(account.id)?;
                let token = self.refresh(&current, provider).await?;
                Ok(ResolvedCredentials::new(current.imap_login(), current.auth_mode, token))
            }
            AuthMode::Password => Err(CredentialError::Refresh(
                "password accounts have no refresh path".to_string(),
            )),
        }
    }

    async fn refresh(&self, account: &Account, provider: OAuthProvider) -> CredentialResult<String> {
        let encrypted = account
            .oauth_refresh_token
            .as_deref()
            .ok_or(CredentialError::MissingMaterial(account.id))?;
        let refresh_token = Zeroizing::new(self.cipher.decrypt(encrypted)?);

        let config = self
            .providers
            .get(provider)
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;

        let refreshed = match oauth::refresh_access_token(config, &refresh_token).await {
            Ok(token) => token,
            Err(e @ (OAuthError::InvalidGrant(_) | OAuthError::Rejected(_))) => {
                let reason = e.to_string();
                log::warn!("OAuth grant rejected for account {}, flagging for re-authentication", account.id);
                self.db.set_auth_error(account.id, &reason)?;
                return Err(CredentialError::ReauthRequired {
                    account_id: account.id,
                    reason,
                });
            }
            Err(e) => return Err(CredentialError::Refresh(e.to_string())),
        };

        let access_encrypted = self.cipher.encrypt(&refreshed.access_token)?;
        let refresh_encrypted = self.cipher.encrypt_opt(refreshed.refresh_token.as_deref())?;
        let expires_at = Utc::now().timestamp() + refreshed.expires_in.as_secs() as i64;

        self.db.update_oauth_tokens(
            account.id,
            &access_encrypted,
            refresh_encrypted.as_deref(),
            expires_at,
        )?;

        log::info!("Refreshed OAuth access token for account {}", account.id);
        Ok(refreshed.access_token)
    }
}
