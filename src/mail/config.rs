//! Server connection parameters

use crate::db::Account;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-connect timeout for TCP plus TLS handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Security type for email connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum SecurityType {
    #[default]
    SSL,
    STARTTLS,
    NONE,
}

impl SecurityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityType::SSL => "SSL",
            SecurityType::STARTTLS => "STARTTLS",
            SecurityType::NONE => "NONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SSL" | "TLS" => Some(SecurityType::SSL),
            "STARTTLS" => Some(SecurityType::STARTTLS),
            "NONE" => Some(SecurityType::NONE),
            _ => None,
        }
    }
}

/// IMAP server parameters. Credentials travel separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub security: SecurityType,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    pub fn from_account(account: &Account) -> Self {
        Self {
            host: account.imap_host.clone(),
            port: account.imap_port,
            security: account.imap_security,
            accept_invalid_certs: account.accept_invalid_certs,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// SMTP server parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: SecurityType,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl SmtpConfig {
    pub fn from_account(account: &Account) -> Self {
        Self {
            host: account.smtp_host.clone(),
            port: account.smtp_port,
            security: account.smtp_security,
            accept_invalid_certs: account.accept_invalid_certs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_type_parse() {
        assert_eq!(SecurityType::parse("ssl"), Some(SecurityType::SSL));
        assert_eq!(SecurityType::parse("StartTLS"), Some(SecurityType::STARTTLS));
        assert_eq!(SecurityType::parse("none"), Some(SecurityType::NONE));
        assert_eq!(SecurityType::parse("plain"), None);
    }
}
