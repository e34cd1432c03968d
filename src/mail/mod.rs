//! # Mailsift - Mail Module
//!
//! IMAP connection management, MIME decoding and SMTP delivery.

pub mod async_imap;
pub mod config;
pub mod parser;
pub mod retry;
pub mod session;
pub mod smtp;

use serde::{Deserialize, Serialize};

pub use self::async_imap::ImapConnector;
pub use config::{ImapConfig, SecurityType, SmtpConfig};
pub use parser::parse_message;
pub use retry::{RetryDecision, RetryPolicy};
pub use session::{ConnectionError, ConnectionManager, MailConnector, MailSession, MailboxLease};
pub use smtp::{OutboundEmail, OutboundMailer, SmtpMailer};

/// Result type alias for mail operations
pub type MailResult<T> = Result<T, MailError>;

/// Unified error type for mail operations
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailError {
    /// Authentication failures may be cured by a credential refresh
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Semantic folder types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Inbox,
    Spam,
    Sent,
    Drafts,
    Trash,
    Archive,
    #[default]
    Custom,
}

impl FolderType {
    /// Infer the type from a folder path
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_lowercase();
        if lower.contains("inbox") {
            FolderType::Inbox
        } else if lower.contains("sent") {
            FolderType::Sent
        } else if lower.contains("draft") {
            FolderType::Drafts
        } else if lower.contains("trash") || lower.contains("deleted") {
            FolderType::Trash
        } else if lower.contains("junk") || lower.contains("spam") {
            FolderType::Spam
        } else if lower.contains("archive") {
            FolderType::Archive
        } else {
            FolderType::Custom
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Spam => "spam",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Archive => "archive",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbox" => Some(Self::Inbox),
            "spam" => Some(Self::Spam),
            "sent" => Some(Self::Sent),
            "drafts" => Some(Self::Drafts),
            "trash" => Some(Self::Trash),
            "archive" => Some(Self::Archive),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Mailbox state reported by SELECT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub exists: u32,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    /// `\Seen` (or `\*`) is listed in PERMANENTFLAGS
    pub can_store_seen: bool,
}

/// Raw message as returned by one UID FETCH
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub seen: bool,
    pub flagged: bool,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub address: String,
}

impl Address {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Self {
            name: name.map(str::to_string).filter(|n| !n.trim().is_empty()),
            address: address.to_string(),
        }
    }

    /// Lowercased domain part of the address
    pub fn domain(&self) -> Option<String> {
        self.address
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_end_matches('>').to_lowercase())
            .filter(|d| !d.is_empty())
    }
}

/// Attachment metadata; the payload itself is not retained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub disposition: Option<String>,
    pub size: usize,
    pub content_id: Option<String>,
}

/// Decoded message
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub uid: u32,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub date: Option<chrono::DateTime<chrono::Utc>>,
    pub is_read: bool,
    pub is_starred: bool,
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
    /// Selected raw headers (lowercased names) used by the heuristics
    pub headers: Vec<(String, String)>,
}

impl ParsedMessage {
    /// First retained header with this (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn sender_address(&self) -> &str {
        self.from.as_ref().map(|a| a.address.as_str()).unwrap_or("")
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.from.as_ref().and_then(|a| a.name.as_deref())
    }
}
