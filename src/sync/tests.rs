//! End-to-end sync scenarios against an in-memory mail server and model

use super::*;
use crate::ai::{AiError, AiResult, CompletionRequest, LanguageModel};
use crate::cache::PreferenceCache;
use crate::categorize::{Categorizer, FineCategory};
use crate::config::SyncSettings;
use crate::credentials::{AuthMode, CredentialResolver, ResolvedCredentials};
use crate::crypto::{Cipher, SALT_LEN};
use crate::db::test_support::new_password_account;
use crate::db::{CategoryAction, CategoryPreference, Database, JobStatus};
use crate::digest::compiler::test_support::RecordingMailer;
use crate::digest::DigestCompiler;
use crate::mail::{
    ConnectionManager, FetchedMessage, ImapConfig, MailConnector, MailError, MailResult,
    MailSession, MailboxStatus, RetryPolicy,
};
use crate::oauth::{self, OAuthProvider, OAuthProviders};
use crate::storage::MessageStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SECRET: &str = "scheduler-secret";

// ============================================================================
// Fake mail server
// ============================================================================

#[derive(Default)]
struct ServerState {
    messages: BTreeMap<u32, (Vec<u8>, bool)>,
    accepted_secrets: Vec<String>,
    can_store_seen: bool,
    hang_on_search: bool,
    connects: usize,
    fetches: Vec<Vec<u32>>,
    seen_stores: Vec<Vec<u32>>,
    closes: usize,
    logouts: usize,
}

#[derive(Clone, Default)]
struct FakeServer(Arc<Mutex<ServerState>>);

impl FakeServer {
    fn new(secret: &str) -> Self {
        let server = Self::default();
        {
            let mut state = server.state();
            state.accepted_secrets.push(secret.to_string());
            state.can_store_seen = true;
        }
        server
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.0.lock().unwrap()
    }

    fn deliver(&self, uid: u32, raw: Vec<u8>) {
        self.state().messages.insert(uid, (raw, false));
    }
}

fn raw_email(message_id: &str, from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{}>\r\nFrom: {}\r\nTo: me@example.com\r\nSubject: {}\r\nDate: Mon, 01 Jan 2024 10:00:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        message_id, from, subject, body
    )
    .into_bytes()
}

fn personal_email(uid: u32) -> Vec<u8> {
    raw_email(
        &format!("{}@test.example", uid),
        "Alice <alice@example.com>",
        &format!("Hello {}", uid),
        "Are we still on for lunch?",
    )
}

#[async_trait]
impl MailConnector for FakeServer {
    async fn connect(
        &self,
        _server: &ImapConfig,
        credentials: &ResolvedCredentials,
    ) -> MailResult<Box<dyn MailSession>> {
        let mut state = self.state();
        state.connects += 1;
        if !state.accepted_secrets.iter().any(|s| s == credentials.secret()) {
            return Err(MailError::Authentication("AUTHENTICATIONFAILED".to_string()));
        }
        Ok(Box::new(FakeSession(self.clone())))
    }
}

struct FakeSession(FakeServer);

#[async_trait]
impl MailSession for FakeSession {
    async fn select(&mut self, _mailbox: &str) -> MailResult<MailboxStatus> {
        let state = self.0.state();
        Ok(MailboxStatus {
            exists: state.messages.len() as u32,
            uid_next: state.messages.keys().last().map(|uid| uid + 1),
            uid_validity: Some(1),
            can_store_seen: state.can_store_seen,
        })
    }

    async fn uid_search(&mut self, query: &str) -> MailResult<Vec<u32>> {
        let hang = self.0.state().hang_on_search;
        if hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        let state = self.0.state();
        let all: Vec<u32> = state.messages.keys().copied().collect();
        if query == "ALL" {
            return Ok(all);
        }
        let from: u32 = query
            .trim_start_matches("UID ")
            .trim_end_matches(":*")
            .parse()
            .map_err(|_| MailError::Imap(format!("bad query {}", query)))?;
        let matched: Vec<u32> = all.iter().copied().filter(|uid| *uid >= from).collect();
        // `n:*` always includes the highest UID
        if matched.is_empty() {
            return Ok(all.last().copied().into_iter().collect());
        }
        Ok(matched)
    }

    async fn uid_fetch(&mut self, uids: &[u32]) -> MailResult<Vec<FetchedMessage>> {
        let mut state = self.0.state();
        state.fetches.push(uids.to_vec());
        Ok(uids
            .iter()
            .filter_map(|uid| {
                state.messages.get(uid).map(|(raw, seen)| FetchedMessage {
                    uid: *uid,
                    seen: *seen,
                    flagged: false,
                    raw: raw.clone(),
                })
            })
            .collect())
    }

    async fn add_seen(&mut self, uids: &[u32]) -> MailResult<()> {
        let mut state = self.0.state();
        state.seen_stores.push(uids.to_vec());
        for uid in uids {
            if let Some(entry) = state.messages.get_mut(uid) {
                entry.1 = true;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> MailResult<()> {
        self.0.state().closes += 1;
        Ok(())
    }

    async fn logout(&mut self) -> MailResult<()> {
        self.0.state().logouts += 1;
        Ok(())
    }
}

// ============================================================================
// Fake model
// ============================================================================

/// "Sale" subjects are marketing, everything else personal
#[derive(Default)]
struct KeywordModel {
    calls: AtomicUsize,
}

impl KeywordModel {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for KeywordModel {
    async fn complete(&self, request: &CompletionRequest) -> AiResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let promotional = request.user.contains("Subject: Sale");
        match request.schema.as_ref().map(|s| s.name) {
            Some("coarse_bucket") if promotional => Ok(r#"{"bucket":"promotional"}"#.to_string()),
            Some("coarse_bucket") => Ok(r#"{"bucket":"personal"}"#.to_string()),
            Some("fine_category") => Ok(r#"{"category":"marketing"}"#.to_string()),
            _ => Err(AiError::Request("unexpected request".to_string())),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    db: Database,
    server: FakeServer,
    model: Arc<KeywordModel>,
    orchestrator: SyncOrchestrator,
    account_id: i64,
}

fn test_settings() -> SyncSettings {
    SyncSettings {
        inter_batch_delay: Duration::ZERO,
        sync_timeout: Duration::from_secs(10),
        ..SyncSettings::default()
    }
}

fn cipher() -> Cipher {
    Cipher::from_secret("sync-tests", &[5u8; SALT_LEN]).unwrap()
}

fn build(db: Database, server: FakeServer, providers: OAuthProviders, settings: SyncSettings) -> (SyncOrchestrator, Arc<KeywordModel>) {
    let cipher = cipher();
    let model = Arc::new(KeywordModel::default());
    let resolver = CredentialResolver::new(db.clone(), cipher.clone(), Arc::new(providers));
    let connections = ConnectionManager::new(Arc::new(server), resolver, RetryPolicy::default());
    let categorizer = Categorizer::new(model.clone(), settings.prompt_body_chars, settings.forward_scan_chars);
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        connections,
        categorizer,
        MessageStore::new(db.clone(), cipher),
        PreferenceCache::new(db),
        settings,
        SECRET.to_string(),
    );
    (orchestrator, model)
}

fn harness_with(settings: SyncSettings) -> Harness {
    let db = Database::in_memory().unwrap();
    let password = cipher().encrypt("pw").unwrap();
    let account_id = db
        .add_account(&new_password_account("u1", "me@example.com", &password))
        .unwrap();
    let server = FakeServer::new("pw");
    let (orchestrator, model) = build(db.clone(), server.clone(), OAuthProviders::default(), settings);
    Harness {
        db,
        server,
        model,
        orchestrator,
        account_id,
    }
}

fn harness() -> Harness {
    harness_with(test_settings())
}

fn job_count(db: &Database) -> i64 {
    db.get_conn()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM sync_jobs", [], |row| row.get(0))
        .unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_poison_message_is_skipped_and_watermark_reaches_highest_attempted() {
    let h = harness();
    h.db.update_watermark(h.account_id, 100, &Utc::now()).unwrap();
    for uid in 101..=105 {
        h.server.deliver(uid, personal_email(uid));
    }
    h.server.deliver(103, b"   ".to_vec());

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert!(report.success);
    assert_eq!(report.discovered, 5);
    assert_eq!(report.processed, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.highest_uid, 105);
    assert_eq!(h.db.get_account(h.account_id).unwrap().last_synced_uid, 105);
    assert_eq!(h.db.count_messages(h.account_id).unwrap(), 4);

    // One sub-batch, one round trip
    assert_eq!(h.server.state().fetches, vec![vec![101, 102, 103, 104, 105]]);

    let job = h.db.get_sync_job(report.job_id.as_deref().unwrap()).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.uids_processed, 4);
    assert_eq!(job.uids_failed, 1);
    assert!(job.completed_at.is_some());

    // Mailbox released before logout
    let state = h.server.state();
    assert_eq!((state.closes, state.logouts), (1, 1));
}

#[tokio::test]
async fn test_batch_cap_takes_newest_fifty() {
    let h = harness();
    for uid in 1..=1000 {
        h.server.deliver(uid, personal_email(uid));
    }

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert_eq!(report.discovered, 50);
    assert_eq!(report.processed, 50);
    assert_eq!(report.highest_uid, 1000);

    let fetches = h.server.state().fetches.clone();
    assert_eq!(fetches.len(), 5);
    assert_eq!(fetches[0][0], 951);
    assert!(fetches.iter().all(|batch| batch.len() == 10));
}

#[tokio::test]
async fn test_restore_is_idempotent_and_watermark_monotonic() {
    let h = harness();
    for uid in 1..=3 {
        h.server.deliver(uid, personal_email(uid));
    }
    let first = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();
    assert_eq!(first.processed, 3);

    // Same messages reappear under new UIDs
    for uid in 1..=3 {
        h.server.deliver(uid + 3, personal_email(uid));
    }
    let second = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert_eq!(second.discovered, 3);
    assert_eq!(second.processed, 3);
    assert_eq!(h.db.count_messages(h.account_id).unwrap(), 3);
    assert_eq!(h.db.get_account(h.account_id).unwrap().last_synced_uid, 6);

    // Nothing new: watermark stays, `UID 7:*` answer for UID 6 is ignored
    let third = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();
    assert!(third.success);
    assert_eq!(third.discovered, 0);
    assert_eq!(third.highest_uid, 6);
    assert_eq!(h.db.get_account(h.account_id).unwrap().last_synced_uid, 6);
}

#[tokio::test]
async fn test_batch_with_no_stored_message_keeps_watermark() {
    let h = harness();
    h.db.update_watermark(h.account_id, 100, &Utc::now()).unwrap();
    h.server.deliver(101, Vec::new());

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert!(report.success);
    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.highest_uid, 100);
    assert_eq!(h.db.get_account(h.account_id).unwrap().last_synced_uid, 100);
}

#[tokio::test]
async fn test_spam_like_routing_overrides_preferences_and_marks_read() {
    let h = harness();
    h.db.set_category_preference(&CategoryPreference {
        user_id: "u1".to_string(),
        category: FineCategory::Marketing,
        action: CategoryAction::Archive,
        digest_enabled: false,
    })
    .unwrap();
    h.server.deliver(1, raw_email("sale@shop.example", "Shop <deals@shop.example>", "Sale ends tonight", "50% off"));
    h.server.deliver(2, personal_email(2));

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();
    assert_eq!(report.processed, 2);

    let folders = h.db.get_folders(h.account_id).unwrap();
    let spam = folders.iter().find(|f| f.name == "Spam").unwrap();
    let inbox = folders.iter().find(|f| f.name == "INBOX").unwrap();
    assert!(folders.iter().all(|f| f.name != "Archive"));

    let sale_id = h.db.find_message_row_id(h.account_id, "<sale@shop.example>").unwrap().unwrap();
    let sale = h.db.get_message(sale_id).unwrap();
    assert_eq!(sale.category, FineCategory::Marketing);
    assert_eq!(sale.folder_id, spam.id);
    assert!(sale.is_read);

    let personal_id = h.db.find_message_row_id(h.account_id, "<2@test.example>").unwrap().unwrap();
    let personal = h.db.get_message(personal_id).unwrap();
    assert_eq!(personal.folder_id, inbox.id);
    assert!(!personal.is_read);

    // Only the forced-read message is flagged remotely, in one STORE
    assert_eq!(h.server.state().seen_stores, vec![vec![1]]);
}

#[tokio::test]
async fn test_folder_preferences_do_not_move_inbox_categories() {
    let h = harness();
    h.db.set_category_preference(&CategoryPreference {
        user_id: "u1".to_string(),
        category: FineCategory::Personal,
        action: CategoryAction::Archive,
        digest_enabled: false,
    })
    .unwrap();
    h.server.deliver(1, personal_email(1));

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();
    assert_eq!(report.processed, 1);

    let folders = h.db.get_folders(h.account_id).unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].name, "INBOX");

    let id = h.db.find_message_row_id(h.account_id, "<1@test.example>").unwrap().unwrap();
    let stored = h.db.get_message(id).unwrap();
    assert_eq!(stored.folder_id, folders[0].id);
    assert!(!stored.is_read);
    assert!(h.server.state().seen_stores.is_empty());
}

#[tokio::test]
async fn test_remote_seen_skipped_when_mailbox_is_read_only() {
    let h = harness();
    h.server.state().can_store_seen = false;
    h.server.deliver(1, raw_email("sale@shop.example", "Shop <deals@shop.example>", "Sale now", "buy"));

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert_eq!(report.processed, 1);
    assert!(h.server.state().seen_stores.is_empty());
    let id = h.db.find_message_row_id(h.account_id, "<sale@shop.example>").unwrap().unwrap();
    assert!(h.db.get_message(id).unwrap().is_read);
}

#[tokio::test]
async fn test_forwarded_message_needs_no_model_call() {
    let h = harness();
    h.server.deliver(1, raw_email("fwd@test.example", "Bob <bob@example.com>", "Fwd: Q3 numbers", "see below"));

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(h.model.calls(), 0);
    let id = h.db.find_message_row_id(h.account_id, "<fwd@test.example>").unwrap().unwrap();
    assert_eq!(h.db.get_message(id).unwrap().category, FineCategory::Personal);
}

#[tokio::test]
async fn test_inbox_folder_created_once_across_syncs() {
    let h = harness();
    h.server.deliver(1, personal_email(1));
    h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();
    h.server.deliver(2, personal_email(2));
    h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    let folders = h.db.get_folders(h.account_id).unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].name, "INBOX");
}

#[tokio::test]
async fn test_wrong_secret_is_rejected_before_any_work() {
    let h = harness();
    h.server.deliver(1, personal_email(1));

    let err = h.orchestrator.sync_account("nope", h.account_id).await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
    assert!(matches!(h.orchestrator.sync_all("nope").await, Err(SyncError::Unauthorized)));

    assert_eq!(job_count(&h.db), 0);
    assert_eq!(h.server.state().connects, 0);
}

#[tokio::test]
async fn test_password_auth_failure_is_not_retried() {
    let h = harness();
    h.server.state().accepted_secrets = vec!["other".to_string()];
    h.server.deliver(1, personal_email(1));

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert!(!report.success);
    assert!(report.error.as_deref().unwrap().contains("AUTHENTICATIONFAILED"));
    assert_eq!(h.server.state().connects, 1);
    let job = h.db.get_sync_job(report.job_id.as_deref().unwrap()).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.db.get_account(h.account_id).unwrap().last_synced_uid, 0);
}

#[tokio::test]
async fn test_oauth_auth_failure_refreshes_and_retries_once() {
    let mut token_server = mockito::Server::new_async().await;
    let token_mock = token_server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"fresh-access","token_type":"Bearer","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let db = Database::in_memory().unwrap();
    let cipher = cipher();
    let mut account = new_password_account("u1", "me@gmail.com", "unused");
    account.auth_mode = AuthMode::OAuth(OAuthProvider::Google);
    account.password_encrypted = None;
    account.oauth_access_token = Some(cipher.encrypt("revoked-access").unwrap());
    account.oauth_refresh_token = Some(cipher.encrypt("refresh-1").unwrap());
    account.oauth_expires_at = Some(Utc::now().timestamp() + 3600);
    let account_id = db.add_account(&account).unwrap();

    let server = FakeServer::new("fresh-access");
    server.deliver(1, personal_email(1));
    let providers = OAuthProviders::default().with(
        OAuthProvider::Google,
        oauth::test_config(format!("{}/token", token_server.url())),
    );
    let (orchestrator, _model) = build(db.clone(), server.clone(), providers, test_settings());

    let report = orchestrator.sync_account(SECRET, account_id).await.unwrap();

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.processed, 1);
    assert_eq!(server.state().connects, 2);
    token_mock.assert_async().await;

    let stored = db.get_account(account_id).unwrap();
    assert_eq!(cipher.decrypt(stored.oauth_access_token.as_deref().unwrap()).unwrap(), "fresh-access");
}

#[tokio::test]
async fn test_auth_retry_uses_rotated_refresh_token() {
    let mut token_server = mockito::Server::new_async().await;
    // Expired token: the first refresh rotates refresh-1 into refresh-2
    let first_refresh = token_server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::Regex("refresh_token=refresh-1".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"access-a","token_type":"Bearer","expires_in":3600,"refresh_token":"refresh-2"}"#)
        .expect(1)
        .create_async()
        .await;
    let second_refresh = token_server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::Regex("refresh_token=refresh-2".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"access-b","token_type":"Bearer","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let db = Database::in_memory().unwrap();
    let cipher = cipher();
    let mut account = new_password_account("u1", "me@gmail.com", "unused");
    account.auth_mode = AuthMode::OAuth(OAuthProvider::Google);
    account.password_encrypted = None;
    account.oauth_access_token = Some(cipher.encrypt("stale-access").unwrap());
    account.oauth_refresh_token = Some(cipher.encrypt("refresh-1").unwrap());
    account.oauth_expires_at = Some(Utc::now().timestamp() - 60);
    let account_id = db.add_account(&account).unwrap();

    // The server rejects access-a, only the second refresh succeeds
    let server = FakeServer::new("access-b");
    server.deliver(1, personal_email(1));
    let providers = OAuthProviders::default().with(
        OAuthProvider::Google,
        oauth::test_config(format!("{}/token", token_server.url())),
    );
    let (orchestrator, _model) = build(db.clone(), server.clone(), providers, test_settings());

    let report = orchestrator.sync_account(SECRET, account_id).await.unwrap();

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.processed, 1);
    assert_eq!(server.state().connects, 2);
    first_refresh.assert_async().await;
    second_refresh.assert_async().await;

    let stored = db.get_account(account_id).unwrap();
    assert!(stored.auth_error.is_none());
    assert_eq!(cipher.decrypt(stored.oauth_access_token.as_deref().unwrap()).unwrap(), "access-b");
    assert_eq!(cipher.decrypt(stored.oauth_refresh_token.as_deref().unwrap()).unwrap(), "refresh-2");
}

#[tokio::test]
async fn test_inactive_account_fails_fast() {
    let h = harness();
    h.db.set_account_active(h.account_id, false).unwrap();

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert!(!report.success);
    assert!(report.error.as_deref().unwrap().contains("inactive"));
    assert_eq!(h.server.state().connects, 0);
}

#[tokio::test]
async fn test_time_budget_fails_the_job() {
    let h = harness_with(SyncSettings {
        sync_timeout: Duration::from_millis(100),
        ..test_settings()
    });
    h.server.state().hang_on_search = true;
    h.server.deliver(1, personal_email(1));

    let report = h.orchestrator.sync_account(SECRET, h.account_id).await.unwrap();

    assert!(!report.success);
    assert!(report.error.as_deref().unwrap().contains("time budget"));
    let job = h.db.get_sync_job(report.job_id.as_deref().unwrap()).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.db.get_account(h.account_id).unwrap().last_synced_uid, 0);
}

#[tokio::test]
async fn test_sync_all_isolates_account_failures() {
    let h = harness();
    h.server.deliver(1, personal_email(1));
    let broken = h
        .db
        .add_account(&new_password_account("u2", "other@example.com", "not-ciphertext"))
        .unwrap();

    let reports = h.orchestrator.sync_all(SECRET).await.unwrap();

    assert_eq!(reports.len(), 2);
    let ok = reports.iter().find(|r| r.account_id == h.account_id).unwrap();
    let failed = reports.iter().find(|r| r.account_id == broken).unwrap();
    assert!(ok.success);
    assert_eq!(ok.processed, 1);
    assert!(!failed.success);
    assert!(failed.job_id.is_some());
}

#[tokio::test]
async fn test_scheduler_start_stop() {
    let h = harness();
    let digests = DigestCompiler::new(
        h.db.clone(),
        MessageStore::new(h.db.clone(), cipher()),
        PreferenceCache::new(h.db.clone()),
        h.model.clone(),
        Arc::new(RecordingMailer::default()),
    );
    let scheduler = BackgroundScheduler::new(
        h.db.clone(),
        h.orchestrator.clone(),
        digests,
        SECRET.to_string(),
        SchedulerConfig::default(),
    );

    assert!(!scheduler.is_running());
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());
    assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

    assert!(matches!(
        scheduler.update_intervals(0, 168).await,
        Err(SchedulerError::InvalidInterval(_))
    ));

    // Restarts the running loops with the new intervals
    scheduler.update_intervals(10, 24).await.unwrap();
    assert!(scheduler.is_running());
    let config = scheduler.get_config().await;
    assert_eq!((config.sync_interval_minutes, config.digest_interval_hours), (10, 24));

    scheduler.stop().unwrap();
    assert!(!scheduler.is_running());
    assert!(matches!(scheduler.stop(), Err(SchedulerError::NotRunning)));
}
