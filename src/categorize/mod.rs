//! Categorization Engine
//!
//! Heuristic signals feed a two-stage model classification: a coarse
//! bucket first, then a fine label constrained to that bucket. Only the fine
//! label is persisted.

pub mod engine;
pub mod prompts;
pub mod routing;
pub mod signals;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use engine::Categorizer;
pub use routing::{is_spam_like, route, FolderTargets, RoutingDecision};
pub use signals::{clean_body, clean_parts, extract_signals, html_to_text, truncate_chars, HeuristicSignals};

/// Coarse bucket; derived, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoarseBucket {
    Transactional,
    Promotional,
    Operational,
    Personal,
}

impl CoarseBucket {
    pub const ALL: [CoarseBucket; 4] = [
        CoarseBucket::Transactional,
        CoarseBucket::Promotional,
        CoarseBucket::Operational,
        CoarseBucket::Personal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactional => "transactional",
            Self::Promotional => "promotional",
            Self::Operational => "operational",
            Self::Personal => "personal",
        }
    }

    /// Fine labels nested under this bucket
    pub fn labels(&self) -> &'static [FineCategory] {
        match self {
            Self::Transactional => &[
                FineCategory::Payments,
                FineCategory::Finances,
                FineCategory::AccountRelated,
                FineCategory::EmailVerification,
                FineCategory::Notification,
            ],
            Self::Promotional => &[FineCategory::Marketing, FineCategory::Newsletter],
            Self::Operational => &[FineCategory::Work, FineCategory::SystemUpdates],
            Self::Personal => &[FineCategory::Personal],
        }
    }

    /// Label used when the fine stage cannot produce one
    pub fn fallback(&self) -> FineCategory {
        match self {
            Self::Transactional => FineCategory::Notification,
            Self::Promotional => FineCategory::Marketing,
            Self::Operational => FineCategory::SystemUpdates,
            Self::Personal => FineCategory::Personal,
        }
    }
}

/// Persisted category label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FineCategory {
    Payments,
    Finances,
    AccountRelated,
    EmailVerification,
    Notification,
    Marketing,
    Newsletter,
    Work,
    SystemUpdates,
    Personal,
    Uncategorizable,
}

impl FineCategory {
    pub const ALL: [FineCategory; 11] = [
        FineCategory::Payments,
        FineCategory::Finances,
        FineCategory::AccountRelated,
        FineCategory::EmailVerification,
        FineCategory::Notification,
        FineCategory::Marketing,
        FineCategory::Newsletter,
        FineCategory::Work,
        FineCategory::SystemUpdates,
        FineCategory::Personal,
        FineCategory::Uncategorizable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::Finances => "finances",
            Self::AccountRelated => "account-related",
            Self::EmailVerification => "email-verification",
            Self::Notification => "notification",
            Self::Marketing => "marketing",
            Self::Newsletter => "newsletter",
            Self::Work => "work",
            Self::SystemUpdates => "system-updates",
            Self::Personal => "personal",
            Self::Uncategorizable => "uncategorizable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// Human readable name for digest subjects
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Payments => "Payments",
            Self::Finances => "Finances",
            Self::AccountRelated => "Account",
            Self::EmailVerification => "Verification",
            Self::Notification => "Notifications",
            Self::Marketing => "Marketing",
            Self::Newsletter => "Newsletter",
            Self::Work => "Work",
            Self::SystemUpdates => "System Updates",
            Self::Personal => "Personal",
            Self::Uncategorizable => "Uncategorized",
        }
    }

    pub fn bucket(&self) -> Option<CoarseBucket> {
        CoarseBucket::ALL
            .iter()
            .copied()
            .find(|bucket| bucket.labels().contains(self))
    }
}

impl fmt::Display for FineCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a label was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Digest marker or forwarding marker, no model call
    ShortCircuit,
    Model,
    /// At least one stage fell back to its fixed label
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Categorization {
    pub category: FineCategory,
    pub bucket: Option<CoarseBucket>,
    pub decision: Decision,
}
