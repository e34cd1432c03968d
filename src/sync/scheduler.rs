//! Background Scheduler
//!
//! Two Tokio interval loops: account sync fan-out every few minutes and
//! weekly digests for every user with an active account.

use super::manager::SyncOrchestrator;
use crate::db::Database;
use crate::digest::DigestCompiler;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

const MAX_SYNC_INTERVAL_MINUTES: u64 = 1440;
/// One year
const MAX_DIGEST_INTERVAL_HOURS: u64 = 8760;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    pub sync_interval_minutes: u64,
    pub digest_interval_hours: u64,
    pub last_sync_run: Option<DateTime<Utc>>,
    pub last_digest_run: Option<DateTime<Utc>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_minutes: 5,
            digest_interval_hours: 168,
            last_sync_run: None,
            last_digest_run: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

fn validate(sync_interval_minutes: u64, digest_interval_hours: u64) -> Result<(), SchedulerError> {
    if !(1..=MAX_SYNC_INTERVAL_MINUTES).contains(&sync_interval_minutes) {
        return Err(SchedulerError::InvalidInterval(format!(
            "Sync interval must be 1-{} minutes, got {}",
            MAX_SYNC_INTERVAL_MINUTES, sync_interval_minutes
        )));
    }
    if !(1..=MAX_DIGEST_INTERVAL_HOURS).contains(&digest_interval_hours) {
        return Err(SchedulerError::InvalidInterval(format!(
            "Digest interval must be 1-{} hours, got {}",
            MAX_DIGEST_INTERVAL_HOURS, digest_interval_hours
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct BackgroundScheduler {
    db: Database,
    orchestrator: SyncOrchestrator,
    digests: DigestCompiler,
    secret: String,
    config: Arc<RwLock<SchedulerConfig>>,
    running: Arc<AtomicBool>,
    task_handles: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundScheduler {
    pub fn new(
        db: Database,
        orchestrator: SyncOrchestrator,
        digests: DigestCompiler,
        secret: String,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            orchestrator,
            digests,
            secret,
            config: Arc::new(RwLock::new(config)),
            running: Arc::new(AtomicBool::new(false)),
            task_handles: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (sync_minutes, digest_hours) = {
            let config = self.config.read().await;
            (config.sync_interval_minutes, config.digest_interval_hours)
        };
        validate(sync_minutes, digest_hours)?;

        self.running.store(true, Ordering::Relaxed);

        let sync_task = tokio::spawn(Self::sync_loop(
            self.running.clone(),
            self.orchestrator.clone(),
            self.secret.clone(),
            self.config.clone(),
            Duration::from_secs(60 * sync_minutes),
        ));
        let digest_task = tokio::spawn(Self::digest_loop(
            self.running.clone(),
            self.db.clone(),
            self.digests.clone(),
            self.config.clone(),
            Duration::from_secs(3600 * digest_hours),
        ));

        match self.task_handles.lock() {
            Ok(mut handles) => {
                handles.push(sync_task);
                handles.push(digest_task);
            }
            Err(e) => log::error!("Failed to record scheduler tasks: {}", e),
        }

        log::info!(
            "Background scheduler started (sync every {} minutes, digests every {} hours)",
            sync_minutes,
            digest_hours
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.swap(false, Ordering::Relaxed) {
            return Err(SchedulerError::NotRunning);
        }

        if let Ok(mut handles) = self.task_handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        log::info!("Background scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn get_config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    /// Change the intervals, restarting the loops if they were running
    pub async fn update_intervals(
        &self,
        sync_interval_minutes: u64,
        digest_interval_hours: u64,
    ) -> Result<(), SchedulerError> {
        validate(sync_interval_minutes, digest_interval_hours)?;

        {
            let mut config = self.config.write().await;
            config.sync_interval_minutes = sync_interval_minutes;
            config.digest_interval_hours = digest_interval_hours;
        }

        if self.is_running() {
            if let Err(e) = self.stop() {
                log::warn!("Failed to stop scheduler before restart: {}", e);
            }
            self.start().await?;
        }

        log::info!(
            "Scheduler intervals updated: sync={} minutes, digest={} hours",
            sync_interval_minutes,
            digest_interval_hours
        );
        Ok(())
    }

    async fn sync_loop(
        running: Arc<AtomicBool>,
        orchestrator: SyncOrchestrator,
        secret: String,
        config: Arc<RwLock<SchedulerConfig>>,
        period: Duration,
    ) {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }

            log::info!("Scheduled sync triggered");
            match orchestrator.sync_all(&secret).await {
                Ok(reports) => {
                    let failed = reports.iter().filter(|r| !r.success).count();
                    if failed > 0 {
                        log::warn!("Scheduled sync: {} of {} accounts failed", failed, reports.len());
                    }
                    config.write().await.last_sync_run = Some(Utc::now());
                }
                Err(e) => log::error!("Scheduled sync failed: {}", e),
            }
        }

        log::info!("Sync loop exited");
    }

    async fn digest_loop(
        running: Arc<AtomicBool>,
        db: Database,
        digests: DigestCompiler,
        config: Arc<RwLock<SchedulerConfig>>,
        period: Duration,
    ) {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; digests wait a full period
        interval.tick().await;

        loop {
            interval.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }

            let users = match db.list_users_with_active_accounts() {
                Ok(users) => users,
                Err(e) => {
                    log::error!("Failed to list digest users: {}", e);
                    continue;
                }
            };

            log::info!("Scheduled digests triggered for {} users", users.len());
            for user_id in users {
                if let Err(e) = digests.compile_digests(&user_id).await {
                    log::error!("Digest compilation for user {} failed: {}", user_id, e);
                }
            }
            config.write().await.last_digest_run = Some(Utc::now());
        }

        log::info!("Digest loop exited");
    }
}
