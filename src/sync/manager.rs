//! Sync Orchestrator - drives one account sync end to end
//!
//! started -> fetching_uids -> processing_emails (once per sub-batch)
//! -> completed | failed
//!
//! Every sub-batch is fetched with one protocol round trip, then parsed,
//! categorized, routed and stored concurrently. The watermark only moves
//! once all of a sub-batch's work has settled.

use super::watermark::{search_query, select_new_uids};
use crate::cache::{PreferenceCache, UserPreferences};
use crate::categorize::{route, Categorizer, FolderTargets};
use crate::config::SyncSettings;
use crate::db::{Account, Database, DbError, JobStatus, SyncJob};
use crate::mail::{parse_message, ConnectionError, ConnectionManager, FetchedMessage, MailError, MailboxLease};
use crate::storage::{MessageStore, StorageError};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Longest error text written to the job log
pub const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid scheduler secret")]
    Unauthorized,

    #[error("Sync exceeded its time budget of {0:?}")]
    Timeout(Duration),

    #[error("Account {0} is inactive")]
    AccountInactive(i64),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DbError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Outcome of one account sync, as returned to the scheduler
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub job_id: Option<String>,
    pub account_id: i64,
    pub success: bool,
    pub discovered: u32,
    pub processed: u32,
    pub failed: u32,
    pub highest_uid: u32,
    pub error: Option<String>,
}

impl SyncReport {
    fn from_job(job: &SyncJob) -> Self {
        Self {
            job_id: Some(job.id.clone()),
            account_id: job.account_id,
            success: job.status == JobStatus::Completed,
            discovered: job.uids_discovered,
            processed: job.uids_processed,
            failed: job.uids_failed,
            highest_uid: job.highest_uid,
            error: job.error_message.clone(),
        }
    }

    /// Report for a sync that failed before a job could be recorded
    fn not_started(account_id: i64, error: &SyncError) -> Self {
        Self {
            job_id: None,
            account_id,
            success: false,
            discovered: 0,
            processed: 0,
            failed: 0,
            highest_uid: 0,
            error: Some(truncate_error(&error.to_string())),
        }
    }
}

pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Compare secrets through fixed-length digests
fn secret_matches(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[derive(Debug, Default)]
struct BatchOutcome {
    stored: u32,
    failed: u32,
}

/// A message that made it into storage
struct StoredUid {
    uid: u32,
    /// Forced read by routing while still unseen on the server
    needs_remote_seen: bool,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    db: Database,
    connections: ConnectionManager,
    categorizer: Categorizer,
    store: MessageStore,
    preferences: PreferenceCache,
    settings: SyncSettings,
    targets: FolderTargets,
    secret: String,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        connections: ConnectionManager,
        categorizer: Categorizer,
        store: MessageStore,
        preferences: PreferenceCache,
        settings: SyncSettings,
        secret: String,
    ) -> Self {
        let targets = FolderTargets::from_settings(&settings);
        Self {
            db,
            connections,
            categorizer,
            store,
            preferences,
            settings,
            targets,
            secret,
        }
    }

    /// Per-account entrypoint for the external scheduler
    pub async fn sync_account(&self, secret: &str, account_id: i64) -> SyncResult<SyncReport> {
        if !secret_matches(&self.secret, secret) {
            log::warn!("Rejected sync request for account {}: bad secret", account_id);
            return Err(SyncError::Unauthorized);
        }
        self.sync_authorized(account_id).await
    }

    /// Sync every active account concurrently; one report per account
    pub async fn sync_all(&self, secret: &str) -> SyncResult<Vec<SyncReport>> {
        if !secret_matches(&self.secret, secret) {
            log::warn!("Rejected sync-all request: bad secret");
            return Err(SyncError::Unauthorized);
        }

        let accounts = self.db.list_active_accounts()?;
        log::info!("Starting sync for {} active accounts", accounts.len());

        let reports = join_all(accounts.iter().map(|account| async move {
            match self.sync_authorized(account.id).await {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Sync for account {} could not start: {}", account.id, e);
                    SyncReport::not_started(account.id, &e)
                }
            }
        }))
        .await;

        let failed = reports.iter().filter(|r| !r.success).count();
        log::info!("Sync fan-out finished: {} accounts, {} failed", reports.len(), failed);
        Ok(reports)
    }

    async fn sync_authorized(&self, account_id: i64) -> SyncResult<SyncReport> {
        let account = self.db.get_account(account_id)?;
        let mut job = self.db.create_sync_job(account.id)?;
        job.highest_uid = account.last_synced_uid;
        log::info!("Sync job {} started for account {}", job.id, account.id);

        let outcome = if !account.is_active {
            Err(SyncError::AccountInactive(account.id))
        } else {
            let budget = self.settings.sync_timeout;
            match tokio::time::timeout(budget, self.run(&account, &mut job)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(budget)),
            }
        };

        let now = Utc::now();
        match outcome {
            Ok(()) => {
                job.status = JobStatus::Completed;
                log::info!(
                    "Sync job {} completed: discovered={}, processed={}, failed={}, watermark={}",
                    job.id,
                    job.uids_discovered,
                    job.uids_processed,
                    job.uids_failed,
                    job.highest_uid
                );
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(truncate_error(&e.to_string()));
                log::error!("Sync job {} for account {} failed: {}", job.id, account.id, e);
            }
        }
        job.completed_at = Some(now);
        job.updated_at = now;
        self.db.update_sync_job(&job)?;

        Ok(SyncReport::from_job(&job))
    }

    async fn run(&self, account: &Account, job: &mut SyncJob) -> SyncResult<()> {
        let prefs = self.preferences.get(&account.user_id).await?;

        let mut lease = self
            .connections
            .open_mailbox(account, &self.settings.mailbox)
            .await?;

        let result = self.process_mailbox(account, &prefs, &mut lease, job).await;
        lease.release().await;
        result
    }

    async fn process_mailbox(
        &self,
        account: &Account,
        prefs: &UserPreferences,
        lease: &mut MailboxLease,
        job: &mut SyncJob,
    ) -> SyncResult<()> {
        self.transition(job, JobStatus::FetchingUids)?;

        let mut watermark = account.last_synced_uid;
        let found = lease.session().uid_search(&search_query(watermark)).await?;
        let uids = select_new_uids(found, watermark, self.settings.uid_cap);
        job.uids_discovered = uids.len() as u32;

        if uids.is_empty() {
            log::info!("No new messages for account {} above UID {}", account.id, watermark);
            self.db.update_watermark(account.id, watermark, &Utc::now())?;
            return Ok(());
        }

        log::info!(
            "Account {}: {} new UIDs ({}..={})",
            account.id,
            uids.len(),
            uids[0],
            uids[uids.len() - 1]
        );
        self.transition(job, JobStatus::ProcessingEmails)?;

        let batch_size = self.settings.sub_batch_size.max(1);
        for (index, batch) in uids.chunks(batch_size).enumerate() {
            if index > 0 && !self.settings.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }

            let outcome = self.process_batch(account, prefs, lease, batch).await?;
            job.uids_processed += outcome.stored;
            job.uids_failed += outcome.failed;

            // Advance past everything attempted so a poison message cannot stall the account
            if outcome.stored > 0 {
                if let Some(&highest) = batch.last() {
                    watermark = watermark.max(highest);
                    self.db.update_watermark(account.id, watermark, &Utc::now())?;
                    job.highest_uid = watermark;
                }
            } else {
                log::warn!(
                    "Account {}: nothing stored from UIDs {:?}, watermark stays at {}",
                    account.id,
                    batch,
                    watermark
                );
            }

            self.transition(job, JobStatus::ProcessingEmails)?;
        }

        Ok(())
    }

    async fn process_batch(
        &self,
        account: &Account,
        prefs: &UserPreferences,
        lease: &mut MailboxLease,
        batch: &[u32],
    ) -> SyncResult<BatchOutcome> {
        let fetched = lease.session().uid_fetch(batch).await?;

        // One entry per requested UID; anything else the server sent is ignored
        let mut by_uid: BTreeMap<u32, FetchedMessage> = BTreeMap::new();
        for message in fetched {
            if batch.contains(&message.uid) {
                by_uid.entry(message.uid).or_insert(message);
            }
        }
        for uid in batch.iter().filter(|uid| !by_uid.contains_key(uid)) {
            log::warn!("Account {}: UID {} was not returned by the server", account.id, uid);
        }

        let results = join_all(
            by_uid
                .values()
                .map(|message| self.process_message(account, prefs, message)),
        )
        .await;

        let mut stored = Vec::new();
        for (uid, result) in by_uid.keys().zip(results) {
            match result {
                Ok(item) => stored.push(item),
                Err(e) => log::warn!("Account {}: UID {} failed: {}", account.id, uid, e),
            }
        }

        let seen: Vec<u32> = stored
            .iter()
            .filter(|item| item.needs_remote_seen)
            .map(|item| item.uid)
            .collect();
        if !seen.is_empty() {
            if lease.status().can_store_seen {
                if let Err(e) = lease.session().add_seen(&seen).await {
                    log::warn!("Account {}: failed to set \\Seen on {:?}: {}", account.id, seen, e);
                }
            } else {
                log::debug!("Mailbox {} does not allow \\Seen, skipping remote flag sync", lease.mailbox());
            }
        }

        let stored_count = stored.len() as u32;
        Ok(BatchOutcome {
            stored: stored_count,
            failed: batch.len() as u32 - stored_count,
        })
    }

    async fn process_message(
        &self,
        account: &Account,
        prefs: &UserPreferences,
        fetched: &FetchedMessage,
    ) -> SyncResult<StoredUid> {
        let parsed = parse_message(fetched)?;

        let categorization = self
            .categorizer
            .categorize(&parsed, prefs.work_profile())
            .await;
        let category = categorization.category;
        let decision = route(category, prefs.action_for(category), &self.targets);

        let folder = self.store.get_or_create_folder(
            account.id,
            &decision.folder_path,
            Some(decision.folder_type),
        )?;
        let is_read = parsed.is_read || decision.force_read;
        let outcome = self
            .store
            .store(account.id, &parsed, folder.id, category, is_read)?;

        log::debug!(
            "Account {}: UID {} -> {} in {} (row {}, new={})",
            account.id,
            fetched.uid,
            category,
            decision.folder_path,
            outcome.id,
            outcome.inserted
        );

        Ok(StoredUid {
            uid: fetched.uid,
            needs_remote_seen: decision.force_read && !fetched.seen,
        })
    }

    fn transition(&self, job: &mut SyncJob, status: JobStatus) -> SyncResult<()> {
        if job.status != status {
            log::info!("Sync job {}: {} -> {}", job.id, job.status.as_str(), status.as_str());
        }
        job.status = status;
        job.updated_at = Utc::now();
        self.db.update_sync_job(job)?;
        Ok(())
    }
}
