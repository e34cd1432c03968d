//! Digest Compiler
//!
//! Weekly per-category summaries of stored mail. Each opted-in category
//! produces exactly one digest per run, even when there is nothing to
//! report.

pub mod compiler;
pub mod prompts;
pub mod render;

use crate::categorize::FineCategory;
use crate::db::DbError;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use compiler::DigestCompiler;

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type DigestResult<T> = Result<T, DigestError>;

/// Output shape of a per-message summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryShape {
    Bullets,
    TitleSentence,
    TitleOnly,
}

impl SummaryShape {
    pub fn for_category(category: FineCategory) -> Self {
        match category {
            FineCategory::Newsletter => Self::Bullets,
            FineCategory::Work
            | FineCategory::Marketing
            | FineCategory::Payments
            | FineCategory::Finances
            | FineCategory::Personal => Self::TitleSentence,
            FineCategory::SystemUpdates
            | FineCategory::AccountRelated
            | FineCategory::EmailVerification
            | FineCategory::Notification
            | FineCategory::Uncategorizable => Self::TitleOnly,
        }
    }
}

/// One summarized message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEntry {
    pub message_row_id: i64,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub title: String,
    pub sentence: Option<String>,
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub user_id: String,
    pub category: FineCategory,
    /// Messages found in the window, summarized or not
    pub message_count: usize,
    pub intro: String,
    pub entries: Vec<DigestEntry>,
    pub subject: String,
    pub recipient: String,
    pub sender_account_id: i64,
    #[serde(skip)]
    pub html: String,
    #[serde(skip)]
    pub text: String,
    pub delivered: bool,
    pub delivery_error: Option<String>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Intro used when there is nothing to summarize
pub fn nothing_to_report(category: FineCategory) -> String {
    format!("No new items in {} this week.", category.display_name())
}
