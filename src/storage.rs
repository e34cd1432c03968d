//! Encrypted message storage
//!
//! Sender, subject and bodies are encrypted with the shared [`Cipher`]
//! before they reach SQLite. Writes are idempotent on
//! `(account_id, message_id)`: a message seen twice keeps its first row.

use crate::categorize::FineCategory;
use crate::crypto::{Cipher, CryptoError};
use crate::db::{Database, DbError, Folder, NewMessage, StoredMessage};
use crate::mail::{FolderType, ParsedMessage};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Domain used for Message-IDs synthesized from message content
pub const SYNTHETIC_ID_DOMAIN: &str = "mailsift.local";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    pub id: i64,
    /// False when the row already existed
    pub inserted: bool,
}

/// Plaintext view of a stored message
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    pub id: i64,
    pub account_id: i64,
    pub message_id: String,
    pub from_name: Option<String>,
    pub from_address: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub category: FineCategory,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Stable Message-ID for mail that arrived without one
pub fn synthesize_message_id(message: &ParsedMessage) -> String {
    let date = message.date.map(|d| d.timestamp().to_string()).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(message.uid.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(date.as_bytes());
    hasher.update(b"|");
    hasher.update(message.sender_address().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(message.subject.as_bytes());
    format!("<{}@{}>", hex::encode(hasher.finalize()), SYNTHETIC_ID_DOMAIN)
}

#[derive(Clone)]
pub struct MessageStore {
    db: Database,
    cipher: Cipher,
}

impl MessageStore {
    pub fn new(db: Database, cipher: Cipher) -> Self {
        Self { db, cipher }
    }

    /// Look up a folder by path, creating it on first use
    pub fn get_or_create_folder(
        &self,
        account_id: i64,
        path: &str,
        folder_type: Option<FolderType>,
    ) -> StorageResult<Folder> {
        if let Some(folder) = self.db.find_folder(account_id, path)? {
            return Ok(folder);
        }
        let folder_type = folder_type.unwrap_or_else(|| FolderType::from_path(path));
        let folder = self.db.insert_folder(account_id, path, folder_type)?;
        log::debug!("Created folder '{}' ({}) for account {}", path, folder_type.as_str(), account_id);
        Ok(folder)
    }

    pub fn store(
        &self,
        account_id: i64,
        message: &ParsedMessage,
        folder_id: i64,
        category: FineCategory,
        is_read: bool,
    ) -> StorageResult<StoreOutcome> {
        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| synthesize_message_id(message));

        if let Some(id) = self.db.find_message_row_id(account_id, &message_id)? {
            log::debug!("Message {} already stored as row {}", message_id, id);
            return Ok(StoreOutcome { id, inserted: false });
        }

        let references = (!message.references.is_empty()).then(|| message.references.join(" "));

        let row = NewMessage {
            account_id,
            folder_id,
            message_id,
            uid: Some(message.uid),
            from_name: self.cipher.encrypt_opt(message.sender_name())?,
            from_address: self.cipher.encrypt(message.sender_address())?,
            to_addresses: serde_json::to_string(&message.to)?,
            cc_addresses: serde_json::to_string(&message.cc)?,
            subject: self.cipher.encrypt(&message.subject)?,
            received_at: message.date.unwrap_or_else(Utc::now),
            body_text: self.cipher.encrypt_opt(message.body_text.as_deref())?,
            body_html: self.cipher.encrypt_opt(message.body_html.as_deref())?,
            category,
            is_read,
            is_starred: message.is_starred,
            has_attachments: !message.attachments.is_empty(),
            attachments: serde_json::to_string(&message.attachments)?,
            in_reply_to: message.in_reply_to.clone(),
            references_header: references,
        };

        // A concurrent writer may have won the race since the lookup
        let (id, inserted) = self.db.insert_message(&row)?;
        Ok(StoreOutcome { id, inserted })
    }

    pub fn decrypt(&self, stored: &StoredMessage) -> StorageResult<DecryptedMessage> {
        Ok(DecryptedMessage {
            id: stored.id,
            account_id: stored.account_id,
            message_id: stored.message_id.clone(),
            from_name: self.cipher.decrypt_opt(stored.from_name.as_deref())?,
            from_address: self.cipher.decrypt(&stored.from_address)?,
            subject: self.cipher.decrypt(&stored.subject)?,
            body_text: self.cipher.decrypt_opt(stored.body_text.as_deref())?,
            body_html: self.cipher.decrypt_opt(stored.body_html.as_deref())?,
            category: stored.category,
            received_at: stored.received_at,
            is_read: stored.is_read,
        })
    }

    pub fn load(&self, id: i64) -> StorageResult<DecryptedMessage> {
        let stored = self.db.get_message(id)?;
        self.decrypt(&stored)
    }

    /// Decrypted messages of one category, newest first.
    /// Rows that fail to decrypt are logged and left out.
    pub fn recent_in_category(
        &self,
        account_ids: &[i64],
        category: FineCategory,
        since: &DateTime<Utc>,
    ) -> StorageResult<Vec<DecryptedMessage>> {
        let rows = self.db.messages_for_digest(account_ids, category, since)?;
        Ok(rows
            .iter()
            .filter_map(|stored| match self.decrypt(stored) {
                Ok(message) => Some(message),
                Err(e) => {
                    log::warn!("Skipping message row {}: {}", stored.id, e);
                    None
                }
            })
            .collect())
    }
}
