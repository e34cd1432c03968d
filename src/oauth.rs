//! OAuth2 token refresh
//!
//! Gmail and Microsoft accounts authenticate with short-lived access tokens.
//! The account-connection wizard stores the initial grant; this module only
//! runs the refresh-token grant against the provider's token endpoint.

use oauth2::{
    basic::{BasicClient, BasicErrorResponseType},
    reqwest::async_http_client,
    AuthUrl, ClientId, ClientSecret, RefreshToken, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth2 error: {0}")]
    OAuth2(String),

    #[error("Provider {0} is not configured")]
    NotConfigured(&'static str),

    #[error("Grant is invalid or revoked: {0}")]
    InvalidGrant(String),

    #[error("Token endpoint rejected the request: {0}")]
    Rejected(String),

    #[error("Token endpoint unreachable: {0}")]
    Network(String),
}

pub type OAuthResult<T> = Result<T, OAuthError>;

/// Supported OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Self::Google),
            "microsoft" => Some(Self::Microsoft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    /// Scopes re-requested on refresh (Microsoft requires them, Google does not)
    pub refresh_scopes: Vec<String>,
}

/// Gmail OAuth2 configuration
pub fn gmail_config(client_id: String, client_secret: String) -> OAuthConfig {
    OAuthConfig {
        client_id,
        client_secret,
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_url: "https://oauth2.googleapis.com/token".to_string(),
        refresh_scopes: Vec::new(),
    }
}

/// Microsoft OAuth2 configuration
pub fn microsoft_config(client_id: String, client_secret: String) -> OAuthConfig {
    OAuthConfig {
        client_id,
        client_secret,
        auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string(),
        token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
        refresh_scopes: vec![
            "https://outlook.office365.com/IMAP.AccessAsUser.All".to_string(),
            "https://outlook.office365.com/SMTP.Send".to_string(),
            "offline_access".to_string(),
        ],
    }
}

/// Provider registry built once at startup
#[derive(Debug, Clone, Default)]
pub struct OAuthProviders {
    google: Option<OAuthConfig>,
    microsoft: Option<OAuthConfig>,
}

impl OAuthProviders {
    /// Providers whose client id and secret are both present in the environment
    pub fn from_env() -> Self {
        let pair = |id: &str, secret: &str| match (std::env::var(id), std::env::var(secret)) {
            (Ok(id), Ok(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        };

        Self {
            google: pair("GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET")
                .map(|(id, secret)| gmail_config(id, secret)),
            microsoft: pair("MICROSOFT_CLIENT_ID", "MICROSOFT_CLIENT_SECRET")
                .map(|(id, secret)| microsoft_config(id, secret)),
        }
    }

    pub fn with(mut self, provider: OAuthProvider, config: OAuthConfig) -> Self {
        match provider {
            OAuthProvider::Google => self.google = Some(config),
            OAuthProvider::Microsoft => self.microsoft = Some(config),
        }
        self
    }

    pub fn get(&self, provider: OAuthProvider) -> OAuthResult<&OAuthConfig> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::Microsoft => self.microsoft.as_ref(),
        }
        .ok_or(OAuthError::NotConfigured(provider.as_str()))
    }
}

/// Result of a successful refresh grant
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<String>,
    pub expires_in: Duration,
}

const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Exchange a refresh token for a new access token
pub async fn refresh_access_token(
    config: &OAuthConfig,
    refresh_token: &str,
) -> OAuthResult<RefreshedToken> {
    let client = BasicClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.clone())),
        AuthUrl::new(config.auth_url.clone()).map_err(|e| OAuthError::OAuth2(e.to_string()))?,
        Some(TokenUrl::new(config.token_url.clone()).map_err(|e| OAuthError::OAuth2(e.to_string()))?),
    );

    let refresh_token = RefreshToken::new(refresh_token.to_string());
    let mut request = client.exchange_refresh_token(&refresh_token);
    for scope in &config.refresh_scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }

    let token = request
        .request_async(async_http_client)
        .await
        .map_err(|e| match e {
            RequestTokenError::ServerResponse(response) => {
                let description = response
                    .error_description()
                    .cloned()
                    .unwrap_or_else(|| response.error().to_string());
                match response.error() {
                    BasicErrorResponseType::InvalidGrant => OAuthError::InvalidGrant(description),
                    _ => OAuthError::Rejected(description),
                }
            }
            RequestTokenError::Request(e) => OAuthError::Network(e.to_string()),
            other => OAuthError::OAuth2(other.to_string()),
        })?;

    Ok(RefreshedToken {
        access_token: token.access_token().secret().clone(),
        refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        expires_in: token.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME),
    })
}

#[cfg(test)]
pub(crate) fn test_config(token_url: String) -> OAuthConfig {
    OAuthConfig {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        auth_url: "https://accounts.example.com/auth".to_string(),
        token_url,
        refresh_scopes: Vec::new(),
    }
}
