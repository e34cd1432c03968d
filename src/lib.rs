//! # Mailsift
//!
//! Incremental IMAP sync with AI categorization, encrypted storage and
//! weekly category digests.

pub mod ai;
pub mod cache;
pub mod categorize;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod digest;
pub mod mail;
pub mod oauth;
pub mod storage;
pub mod sync;

use ai::{ChatCompletionsClient, LanguageModel};
use cache::PreferenceCache;
use categorize::Categorizer;
use config::AppConfig;
use credentials::CredentialResolver;
use crypto::Cipher;
use db::Database;
use digest::{Digest, DigestCompiler, DigestResult};
use mail::{ConnectionManager, ImapConnector, RetryPolicy, SmtpMailer};
use oauth::OAuthProviders;
use std::sync::Arc;
use storage::MessageStore;
use sync::{BackgroundScheduler, SchedulerConfig, SyncOrchestrator, SyncReport, SyncResult};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Database(#[from] db::DbError),

    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),

    #[error(transparent)]
    Ai(#[from] ai::AiError),
}

/// Every collaborator, constructed once and shared by the entrypoints
#[derive(Clone)]
pub struct Engine {
    db: Database,
    orchestrator: SyncOrchestrator,
    digests: DigestCompiler,
    scheduler_secret: String,
    scheduler_config: SchedulerConfig,
}

impl Engine {
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        log::info!("Database path: {:?}", config.database_path);
        let db = Database::new(config.database_path.clone())?;
        let cipher = Cipher::from_secret_and_salt_file(&config.master_key, &config.salt_path)?;
        let providers = Arc::new(OAuthProviders::from_env());
        let model: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsClient::new(&config.ai)?);

        let credentials = CredentialResolver::new(db.clone(), cipher.clone(), providers);
        let connections = ConnectionManager::new(
            Arc::new(ImapConnector::new()),
            credentials.clone(),
            RetryPolicy::default(),
        );
        let store = MessageStore::new(db.clone(), cipher);
        let preferences = PreferenceCache::new(db.clone());
        let categorizer = Categorizer::new(
            model.clone(),
            config.sync.prompt_body_chars,
            config.sync.forward_scan_chars,
        );

        let orchestrator = SyncOrchestrator::new(
            db.clone(),
            connections,
            categorizer,
            store.clone(),
            preferences.clone(),
            config.sync.clone(),
            config.scheduler_secret.clone(),
        );
        let digests = DigestCompiler::new(
            db.clone(),
            store,
            preferences,
            model,
            Arc::new(SmtpMailer::new(credentials)),
        );

        Ok(Self {
            db,
            orchestrator,
            digests,
            scheduler_secret: config.scheduler_secret.clone(),
            scheduler_config: SchedulerConfig {
                sync_interval_minutes: config.sync_interval_minutes,
                digest_interval_hours: config.digest_interval_hours,
                ..SchedulerConfig::default()
            },
        })
    }

    pub async fn sync_account(&self, secret: &str, account_id: i64) -> SyncResult<SyncReport> {
        self.orchestrator.sync_account(secret, account_id).await
    }

    pub async fn sync_all(&self, secret: &str) -> SyncResult<Vec<SyncReport>> {
        self.orchestrator.sync_all(secret).await
    }

    pub async fn compile_digests(&self, user_id: &str) -> DigestResult<Vec<Digest>> {
        self.digests.compile_digests(user_id).await
    }

    /// Scheduler over this engine's collaborators; not started
    pub fn scheduler(&self) -> BackgroundScheduler {
        BackgroundScheduler::new(
            self.db.clone(),
            self.orchestrator.clone(),
            self.digests.clone(),
            self.scheduler_secret.clone(),
            self.scheduler_config.clone(),
        )
    }
}
