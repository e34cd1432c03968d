//! Database module for Mailsift
//!
//! SQLite persistence for accounts, folders, synchronized messages, the sync
//! job log and the (collaborator-owned) category preferences.
//! Every table has a typed row struct and explicit column mapping.

use crate::categorize::FineCategory;
use crate::credentials::AuthMode;
use crate::mail::config::SecurityType;
use crate::mail::FolderType;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA foreign_keys = ON;
    PRAGMA synchronous = NORMAL;
    PRAGMA temp_store = MEMORY;
"#;

/// Format a timestamp the way every TEXT time column stores it.
/// Fixed-width UTC so lexicographic order equals chronological order.
pub fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn from_db_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn from_db_time_opt(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db_time).transpose()
}

/// Stores closed enums as their canonical TEXT form
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                <$ty>::parse(text).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("invalid {} value: {}", stringify!($ty), text).into(),
                    )
                })
            }
        }
    };
}

sql_text_enum!(AuthMode);
sql_text_enum!(SecurityType);
sql_text_enum!(FolderType);
sql_text_enum!(FineCategory);
sql_text_enum!(JobStatus);
sql_text_enum!(CategoryAction);

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Create a new database connection pool
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbError::Constraint(format!("cannot create {:?}: {}", parent, e)))?;
            }
        }

        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

        let pool = Pool::builder()
            .max_size(16)
            .min_idle(Some(2))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::apply_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing)
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;
        Self::apply_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn apply_schema(conn: &Connection) -> DbResult<()> {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok(())
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // ACCOUNTS
    // =========================================================================

    /// Add a new mailbox account. Credential fields must already be encrypted.
    pub fn add_account(&self, account: &NewAccount) -> DbResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO accounts (
                user_id, email, display_name, auth_mode,
                password_encrypted, oauth_access_token, oauth_refresh_token, oauth_expires_at,
                imap_host, imap_port, imap_security, imap_username,
                smtp_host, smtp_port, smtp_security, smtp_username,
                accept_invalid_certs
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                account.user_id,
                account.email,
                account.display_name,
                account.auth_mode,
                account.password_encrypted,
                account.oauth_access_token,
                account.oauth_refresh_token,
                account.oauth_expires_at,
                account.imap_host,
                account.imap_port,
                account.imap_security,
                account.imap_username,
                account.smtp_host,
                account.smtp_port,
                account.smtp_security,
                account.smtp_username,
                account.accept_invalid_certs,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get account by ID
    pub fn get_account(&self, id: i64) -> DbResult<Account> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        conn.query_row(&sql, [id], Account::from_row)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("account {}", id)))
    }

    /// All active accounts across all users
    pub fn list_active_accounts(&self) -> DbResult<Vec<Account>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE is_active = 1 ORDER BY id ASC",
            ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], Account::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Active accounts owned by one user, oldest first
    pub fn list_user_accounts(&self, user_id: &str) -> DbResult<Vec<Account>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE user_id = ?1 AND is_active = 1 ORDER BY id ASC",
            ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([user_id], Account::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Users owning at least one active account
    pub fn list_users_with_active_accounts(&self) -> DbResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM accounts WHERE is_active = 1 ORDER BY user_id ASC",
        )?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(users)
    }

    /// Persist the UID watermark after a sub-batch
    pub fn update_watermark(&self, id: i64, last_synced_uid: u32, synced_at: &DateTime<Utc>) -> DbResult<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE accounts
            SET last_synced_uid = MAX(last_synced_uid, ?1),
                last_synced_at = ?2,
                updated_at = ?2
            WHERE id = ?3
            "#,
            params![last_synced_uid, to_db_time(synced_at), id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }

    /// Store refreshed OAuth tokens (already encrypted) and clear any auth error
    pub fn update_oauth_tokens(
        &self,
        id: i64,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        expires_at: i64,
    ) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE accounts
            SET oauth_access_token = ?1,
                oauth_refresh_token = COALESCE(?2, oauth_refresh_token),
                oauth_expires_at = ?3,
                auth_error = NULL,
                updated_at = ?4
            WHERE id = ?5
            "#,
            params![
                access_token_encrypted,
                refresh_token_encrypted,
                expires_at,
                to_db_time(&Utc::now()),
                id
            ],
        )?;
        Ok(())
    }

    /// Flag an account for user attention (re-authentication required)
    pub fn set_auth_error(&self, id: i64, message: &str) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE accounts SET auth_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![message, to_db_time(&Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn clear_auth_error(&self, id: i64) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE accounts SET auth_error = NULL WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    pub fn set_account_active(&self, id: i64, active: bool) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE accounts SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(())
    }

    /// Disconnect an account; folders, messages and jobs cascade
    pub fn delete_account(&self, id: i64) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM accounts WHERE id = ?1", [id])?;
        Ok(())
    }

    // =========================================================================
    // FOLDERS
    // =========================================================================

    pub fn find_folder(&self, account_id: i64, name: &str) -> DbResult<Option<Folder>> {
        let conn = self.get_conn()?;
        let folder = conn
            .query_row(
                "SELECT id, account_id, name, folder_type, created_at FROM folders WHERE account_id = ?1 AND name = ?2",
                params![account_id, name],
                Folder::from_row,
            )
            .optional()?;
        Ok(folder)
    }

    /// Insert a folder unless (account, name) exists; returns the folder either way
    pub fn insert_folder(&self, account_id: i64, name: &str, folder_type: FolderType) -> DbResult<Folder> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO folders (account_id, name, folder_type)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(account_id, name) DO NOTHING
            "#,
            params![account_id, name, folder_type],
        )?;

        let folder = conn.query_row(
            "SELECT id, account_id, name, folder_type, created_at FROM folders WHERE account_id = ?1 AND name = ?2",
            params![account_id, name],
            Folder::from_row,
        )?;
        Ok(folder)
    }

    pub fn get_folder_by_id(&self, id: i64) -> DbResult<Folder> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT id, account_id, name, folder_type, created_at FROM folders WHERE id = ?1",
            [id],
            Folder::from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("folder {}", id)))
    }

    pub fn get_folders(&self, account_id: i64) -> DbResult<Vec<Folder>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account_id, name, folder_type, created_at
            FROM folders
            WHERE account_id = ?1
            ORDER BY
                CASE folder_type
                    WHEN 'inbox' THEN 1
                    WHEN 'sent' THEN 2
                    WHEN 'drafts' THEN 3
                    WHEN 'archive' THEN 4
                    WHEN 'spam' THEN 5
                    WHEN 'trash' THEN 6
                    ELSE 7
                END,
                name ASC
            "#,
        )?;

        let folders = stmt
            .query_map([account_id], Folder::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    /// Folders are never auto-deleted; rename is the only mutation
    pub fn rename_folder(&self, id: i64, new_name: &str) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE folders SET name = ?1 WHERE id = ?2",
            params![new_name, id],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Constraint(format!("folder name {} already exists", new_name))
            }
            other => DbError::Sqlite(other),
        })?;
        Ok(())
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    pub fn find_message_row_id(&self, account_id: i64, message_id: &str) -> DbResult<Option<i64>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM messages WHERE account_id = ?1 AND message_id = ?2",
                params![account_id, message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Insert a message; a duplicate (account_id, message_id) is a no-op
    /// returning the existing row id. Returns (row id, inserted).
    pub fn insert_message(&self, message: &NewMessage) -> DbResult<(i64, bool)> {
        let conn = self.get_conn()?;

        let inserted = conn.execute(
            r#"
            INSERT INTO messages (
                account_id, folder_id, message_id, uid,
                from_name, from_address, to_addresses, cc_addresses,
                subject, received_at, body_text, body_html, category,
                is_read, is_starred, has_attachments, attachments,
                in_reply_to, references_header
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT(account_id, message_id) DO NOTHING
            "#,
            params![
                message.account_id,
                message.folder_id,
                message.message_id,
                message.uid,
                message.from_name,
                message.from_address,
                message.to_addresses,
                message.cc_addresses,
                message.subject,
                to_db_time(&message.received_at),
                message.body_text,
                message.body_html,
                message.category,
                message.is_read,
                message.is_starred,
                message.has_attachments,
                message.attachments,
                message.in_reply_to,
                message.references_header,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM messages WHERE account_id = ?1 AND message_id = ?2",
            params![message.account_id, message.message_id],
            |row| row.get(0),
        )?;

        Ok((id, inserted > 0))
    }

    pub fn get_message(&self, id: i64) -> DbResult<StoredMessage> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        conn.query_row(&sql, [id], StoredMessage::from_row)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("message {}", id)))
    }

    pub fn count_messages(&self, account_id: i64) -> DbResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?1",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Stored messages of one category across accounts, received at or after `since`
    pub fn messages_for_digest(
        &self,
        account_ids: &[i64],
        category: FineCategory,
        since: &DateTime<Utc>,
    ) -> DbResult<Vec<StoredMessage>> {
        if account_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let placeholders = (0..account_ids.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM messages WHERE category = ?1 AND received_at >= ?2 AND account_id IN ({}) ORDER BY received_at DESC",
            MESSAGE_COLUMNS, placeholders
        );

        let since = to_db_time(since);
        let mut values: Vec<&dyn ToSql> = vec![&category, &since];
        for id in account_ids {
            values.push(id);
        }

        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(values.as_slice(), StoredMessage::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Flag toggles issued by the UI collaborator
    pub fn update_message_flags(&self, id: i64, is_read: Option<bool>, is_starred: Option<bool>) -> DbResult<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE messages
            SET is_read = COALESCE(?1, is_read),
                is_starred = COALESCE(?2, is_starred)
            WHERE id = ?3
            "#,
            params![is_read, is_starred, id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("message {}", id)));
        }
        Ok(())
    }

    pub fn move_message(&self, id: i64, folder_id: i64) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE messages SET folder_id = ?1 WHERE id = ?2",
            params![folder_id, id],
        )?;
        Ok(())
    }

    // =========================================================================
    // SYNC JOBS
    // =========================================================================

    pub fn create_sync_job(&self, account_id: i64) -> DbResult<SyncJob> {
        let now = Utc::now();
        let job = SyncJob {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            status: JobStatus::Started,
            uids_discovered: 0,
            uids_processed: 0,
            uids_failed: 0,
            highest_uid: 0,
            error_message: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
        };

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO sync_jobs (id, account_id, status, started_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![job.id, job.account_id, job.status, to_db_time(&now)],
        )?;

        Ok(job)
    }

    pub fn update_sync_job(&self, job: &SyncJob) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE sync_jobs
            SET status = ?1,
                uids_discovered = ?2,
                uids_processed = ?3,
                uids_failed = ?4,
                highest_uid = ?5,
                error_message = ?6,
                completed_at = ?7,
                updated_at = ?8
            WHERE id = ?9
            "#,
            params![
                job.status,
                job.uids_discovered,
                job.uids_processed,
                job.uids_failed,
                job.highest_uid,
                job.error_message,
                job.completed_at.as_ref().map(to_db_time),
                to_db_time(&job.updated_at),
                job.id,
            ],
        )?;
        Ok(())
    }

    pub fn get_sync_job(&self, id: &str) -> DbResult<SyncJob> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT id, account_id, status, uids_discovered, uids_processed, uids_failed,
                   highest_uid, error_message, started_at, completed_at, updated_at
            FROM sync_jobs WHERE id = ?1
            "#,
            [id],
            SyncJob::from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("sync job {}", id)))
    }

    // =========================================================================
    // CATEGORY PREFERENCES (written by the settings collaborator)
    // =========================================================================

    pub fn get_category_preferences(&self, user_id: &str) -> DbResult<Vec<CategoryPreference>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, category, action, digest_enabled FROM category_preferences WHERE user_id = ?1 ORDER BY category ASC",
        )?;
        let prefs = stmt
            .query_map([user_id], |row| {
                Ok(CategoryPreference {
                    user_id: row.get(0)?,
                    category: row.get(1)?,
                    action: row.get(2)?,
                    digest_enabled: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prefs)
    }

    pub fn set_category_preference(&self, pref: &CategoryPreference) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO category_preferences (user_id, category, action, digest_enabled)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, category) DO UPDATE SET
                action = excluded.action,
                digest_enabled = excluded.digest_enabled
            "#,
            params![pref.user_id, pref.category, pref.action, pref.digest_enabled],
        )?;
        Ok(())
    }

    pub fn get_user_profile(&self, user_id: &str) -> DbResult<Option<UserProfile>> {
        let conn = self.get_conn()?;
        let profile = conn
            .query_row(
                "SELECT user_id, work_profile, default_account_id FROM user_profiles WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(UserProfile {
                        user_id: row.get(0)?,
                        work_profile: row.get(1)?,
                        default_account_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    pub fn set_user_profile(&self, profile: &UserProfile) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO user_profiles (user_id, work_profile, default_account_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                work_profile = excluded.work_profile,
                default_account_id = excluded.default_account_id
            "#,
            params![profile.user_id, profile.work_profile, profile.default_account_id],
        )?;
        Ok(())
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

const ACCOUNT_COLUMNS: &str = r#"
    id, user_id, email, display_name, auth_mode,
    password_encrypted, oauth_access_token, oauth_refresh_token, oauth_expires_at, auth_error,
    imap_host, imap_port, imap_security, imap_username,
    smtp_host, smtp_port, smtp_security, smtp_username,
    accept_invalid_certs, last_synced_uid, last_synced_at, is_active
"#;

const MESSAGE_COLUMNS: &str = r#"
    id, account_id, folder_id, message_id, uid,
    from_name, from_address, to_addresses, cc_addresses,
    subject, received_at, body_text, body_html, category,
    is_read, is_starred, has_attachments, attachments,
    in_reply_to, references_header
"#;

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub auth_mode: AuthMode,
    pub password_encrypted: Option<String>,
    pub oauth_access_token: Option<String>,
    pub oauth_refresh_token: Option<String>,
    pub oauth_expires_at: Option<i64>,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_security: SecurityType,
    pub imap_username: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_security: SecurityType,
    pub smtp_username: Option<String>,
    pub accept_invalid_certs: bool,
}

/// One remote mailbox. Credential columns hold ciphertext.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub auth_mode: AuthMode,
    pub password_encrypted: Option<String>,
    pub oauth_access_token: Option<String>,
    pub oauth_refresh_token: Option<String>,
    pub oauth_expires_at: Option<i64>,
    pub auth_error: Option<String>,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_security: SecurityType,
    pub imap_username: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_security: SecurityType,
    pub smtp_username: Option<String>,
    pub accept_invalid_certs: bool,
    /// 0 means never synced
    pub last_synced_uid: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Account {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            email: row.get(2)?,
            display_name: row.get(3)?,
            auth_mode: row.get(4)?,
            password_encrypted: row.get(5)?,
            oauth_access_token: row.get(6)?,
            oauth_refresh_token: row.get(7)?,
            oauth_expires_at: row.get(8)?,
            auth_error: row.get(9)?,
            imap_host: row.get(10)?,
            imap_port: row.get(11)?,
            imap_security: row.get(12)?,
            imap_username: row.get(13)?,
            smtp_host: row.get(14)?,
            smtp_port: row.get(15)?,
            smtp_security: row.get(16)?,
            smtp_username: row.get(17)?,
            accept_invalid_certs: row.get(18)?,
            last_synced_uid: row.get(19)?,
            last_synced_at: from_db_time_opt(row.get(20)?)?,
            is_active: row.get(21)?,
        })
    }

    pub fn imap_login(&self) -> &str {
        self.imap_username.as_deref().unwrap_or(&self.email)
    }

    pub fn smtp_login(&self) -> &str {
        self.smtp_username.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub folder_type: FolderType,
    pub created_at: String,
}

impl Folder {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            name: row.get(2)?,
            folder_type: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Insert DTO; sender, subject and bodies are ciphertext at this point
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub account_id: i64,
    pub folder_id: i64,
    pub message_id: String,
    pub uid: Option<u32>,
    pub from_name: Option<String>,
    pub from_address: String,
    pub to_addresses: String,
    pub cc_addresses: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub category: FineCategory,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub attachments: String,
    pub in_reply_to: Option<String>,
    pub references_header: Option<String>,
}

/// Message row as stored (encrypted columns still encrypted)
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub account_id: i64,
    pub folder_id: i64,
    pub message_id: String,
    pub uid: Option<u32>,
    pub from_name: Option<String>,
    pub from_address: String,
    pub to_addresses: String,
    pub cc_addresses: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub category: FineCategory,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub attachments: String,
    pub in_reply_to: Option<String>,
    pub references_header: Option<String>,
}

impl StoredMessage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let received_at: String = row.get(10)?;
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            folder_id: row.get(2)?,
            message_id: row.get(3)?,
            uid: row.get(4)?,
            from_name: row.get(5)?,
            from_address: row.get(6)?,
            to_addresses: row.get(7)?,
            cc_addresses: row.get(8)?,
            subject: row.get(9)?,
            received_at: from_db_time(&received_at)?,
            body_text: row.get(11)?,
            body_html: row.get(12)?,
            category: row.get(13)?,
            is_read: row.get(14)?,
            is_starred: row.get(15)?,
            has_attachments: row.get(16)?,
            attachments: row.get(17)?,
            in_reply_to: row.get(18)?,
            references_header: row.get(19)?,
        })
    }
}

/// Sync job state machine: started -> fetching_uids -> processing_emails -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    FetchingUids,
    ProcessingEmails,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::FetchingUids => "fetching_uids",
            Self::ProcessingEmails => "processing_emails",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "fetching_uids" => Some(Self::FetchingUids),
            "processing_emails" => Some(Self::ProcessingEmails),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub account_id: i64,
    pub status: JobStatus,
    pub uids_discovered: u32,
    pub uids_processed: u32,
    pub uids_failed: u32,
    pub highest_uid: u32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let started_at: String = row.get(8)?;
        let updated_at: String = row.get(10)?;
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            status: row.get(2)?,
            uids_discovered: row.get(3)?,
            uids_processed: row.get(4)?,
            uids_failed: row.get(5)?,
            highest_uid: row.get(6)?,
            error_message: row.get(7)?,
            started_at: from_db_time(&started_at)?,
            completed_at: from_db_time_opt(row.get(9)?)?,
            updated_at: from_db_time(&updated_at)?,
        })
    }
}

/// Automated action a user configured for a fine category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CategoryAction {
    #[default]
    None,
    MarkAsRead,
    Archive,
    Trash,
    MarkAsSpam,
}

impl CategoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MarkAsRead => "mark_as_read",
            Self::Archive => "archive",
            Self::Trash => "trash",
            Self::MarkAsSpam => "mark_as_spam",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "mark_as_read" => Some(Self::MarkAsRead),
            "archive" => Some(Self::Archive),
            "trash" => Some(Self::Trash),
            "mark_as_spam" => Some(Self::MarkAsSpam),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub user_id: String,
    pub category: FineCategory,
    pub action: CategoryAction,
    pub digest_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Free-text description used to tell work mail from system updates
    pub work_profile: Option<String>,
    pub default_account_id: Option<i64>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn new_password_account(user_id: &str, email: &str, password_encrypted: &str) -> NewAccount {
        NewAccount {
            user_id: user_id.to_string(),
            email: email.to_string(),
            display_name: Some("Test User".to_string()),
            auth_mode: AuthMode::Password,
            password_encrypted: Some(password_encrypted.to_string()),
            oauth_access_token: None,
            oauth_refresh_token: None,
            oauth_expires_at: None,
            imap_host: "imap.example.com".to_string(),
            imap_port: 993,
            imap_security: SecurityType::SSL,
            imap_username: None,
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_security: SecurityType::STARTTLS,
            smtp_username: None,
            accept_invalid_certs: false,
        }
    }

    pub fn new_message(account_id: i64, folder_id: i64, message_id: &str) -> NewMessage {
        NewMessage {
            account_id,
            folder_id,
            message_id: message_id.to_string(),
            uid: Some(1),
            from_name: None,
            from_address: "sender@example.com".to_string(),
            to_addresses: "[]".to_string(),
            cc_addresses: "[]".to_string(),
            subject: "Hello".to_string(),
            received_at: Utc::now(),
            body_text: Some("body".to_string()),
            body_html: None,
            category: FineCategory::Personal,
            is_read: false,
            is_starred: false,
            has_attachments: false,
            attachments: "[]".to_string(),
            in_reply_to: None,
            references_header: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_database_creation() {
        let db = Database::in_memory().expect("Failed to create in-memory database");

        let id = db
            .add_account(&new_password_account("user-1", "test@example.com", "enc"))
            .expect("Failed to add account");
        assert!(id > 0);

        let account = db.get_account(id).expect("Failed to get account");
        assert_eq!(account.email, "test@example.com");
        assert_eq!(account.auth_mode, AuthMode::Password);
        assert_eq!(account.last_synced_uid, 0);
        assert!(account.last_synced_at.is_none());
        assert!(account.is_active);
        assert_eq!(account.imap_login(), "test@example.com");
    }

    #[test]
    fn test_missing_account_is_not_found() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(db.get_account(42), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_watermark_never_moves_backwards() {
        let db = Database::in_memory().unwrap();
        let id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();

        db.update_watermark(id, 120, &Utc::now()).unwrap();
        db.update_watermark(id, 100, &Utc::now()).unwrap();

        let account = db.get_account(id).unwrap();
        assert_eq!(account.last_synced_uid, 120);
        assert!(account.last_synced_at.is_some());
    }

    #[test]
    fn test_folder_insert_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();

        let first = db.insert_folder(account_id, "INBOX", FolderType::Inbox).unwrap();
        let second = db.insert_folder(account_id, "INBOX", FolderType::Custom).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.folder_type, FolderType::Inbox);
        assert_eq!(db.get_folders(account_id).unwrap().len(), 1);
    }

    #[test]
    fn test_message_insert_dedupes_on_message_id() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();
        let folder = db.insert_folder(account_id, "INBOX", FolderType::Inbox).unwrap();

        let (first, inserted) = db.insert_message(&new_message(account_id, folder.id, "<m1@x>")).unwrap();
        assert!(inserted);
        let (second, inserted) = db.insert_message(&new_message(account_id, folder.id, "<m1@x>")).unwrap();
        assert!(!inserted);

        assert_eq!(first, second);
        assert_eq!(db.count_messages(account_id).unwrap(), 1);
        assert_eq!(db.find_message_row_id(account_id, "<m1@x>").unwrap(), Some(first));
    }

    #[test]
    fn test_delete_account_cascades() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();
        let folder = db.insert_folder(account_id, "INBOX", FolderType::Inbox).unwrap();
        let (message_id, _) = db.insert_message(&new_message(account_id, folder.id, "<m@x>")).unwrap();

        db.delete_account(account_id).unwrap();

        assert!(db.get_folders(account_id).unwrap().is_empty());
        assert!(matches!(db.get_message(message_id), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_message_flags_update() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();
        let folder = db.insert_folder(account_id, "INBOX", FolderType::Inbox).unwrap();
        let (id, _) = db.insert_message(&new_message(account_id, folder.id, "<m@x>")).unwrap();

        db.update_message_flags(id, None, Some(true)).unwrap();
        let message = db.get_message(id).unwrap();
        assert!(!message.is_read);
        assert!(message.is_starred);

        db.update_message_flags(id, Some(true), None).unwrap();
        assert!(db.get_message(id).unwrap().is_read);
    }

    #[test]
    fn test_messages_for_digest_filters_by_window_and_category() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();
        let folder = db.insert_folder(account_id, "INBOX", FolderType::Inbox).unwrap();

        let mut recent = new_message(account_id, folder.id, "<recent@x>");
        recent.category = FineCategory::Newsletter;
        db.insert_message(&recent).unwrap();

        let mut old = new_message(account_id, folder.id, "<old@x>");
        old.category = FineCategory::Newsletter;
        old.received_at = Utc::now() - Duration::days(10);
        db.insert_message(&old).unwrap();

        let mut other = new_message(account_id, folder.id, "<other@x>");
        other.category = FineCategory::Work;
        db.insert_message(&other).unwrap();

        let since = Utc::now() - Duration::days(7);
        let found = db
            .messages_for_digest(&[account_id], FineCategory::Newsletter, &since)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_id, "<recent@x>");

        assert!(db.messages_for_digest(&[], FineCategory::Newsletter, &since).unwrap().is_empty());
    }

    #[test]
    fn test_sync_job_roundtrip() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_account(&new_password_account("u", "a@example.com", "enc")).unwrap();

        let mut job = db.create_sync_job(account_id).unwrap();
        assert_eq!(job.status, JobStatus::Started);

        job.status = JobStatus::Completed;
        job.uids_discovered = 5;
        job.uids_processed = 4;
        job.uids_failed = 1;
        job.highest_uid = 105;
        job.completed_at = Some(Utc::now());
        db.update_sync_job(&job).unwrap();

        let loaded = db.get_sync_job(&job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.uids_processed, 4);
        assert_eq!(loaded.highest_uid, 105);
        assert!(loaded.status.is_terminal());
    }

    #[test]
    fn test_preferences_and_profile() {
        let db = Database::in_memory().unwrap();

        db.set_category_preference(&CategoryPreference {
            user_id: "u".to_string(),
            category: FineCategory::Newsletter,
            action: CategoryAction::Archive,
            digest_enabled: true,
        })
        .unwrap();
        db.set_category_preference(&CategoryPreference {
            user_id: "u".to_string(),
            category: FineCategory::Newsletter,
            action: CategoryAction::None,
            digest_enabled: true,
        })
        .unwrap();

        let prefs = db.get_category_preferences("u").unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].action, CategoryAction::None);

        assert!(db.get_user_profile("u").unwrap().is_none());
        db.set_user_profile(&UserProfile {
            user_id: "u".to_string(),
            work_profile: Some("Backend engineer at Acme".to_string()),
            default_account_id: None,
        })
        .unwrap();
        assert_eq!(
            db.get_user_profile("u").unwrap().unwrap().work_profile.as_deref(),
            Some("Backend engineer at Acme")
        );
    }
}
