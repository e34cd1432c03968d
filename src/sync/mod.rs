//! Sync Module - incremental mailbox synchronization
//!
//! - UID watermark selection (bounded, newest first)
//! - Per-account orchestration with a persisted job log
//! - Background scheduling of syncs and weekly digests

pub mod manager;
pub mod scheduler;
pub mod watermark;

#[cfg(test)]
mod tests;

pub use manager::{SyncError, SyncOrchestrator, SyncReport, SyncResult};
pub use scheduler::{BackgroundScheduler, SchedulerConfig, SchedulerError};
pub use watermark::{search_query, select_new_uids};
