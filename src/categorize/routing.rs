//! Folder routing
//!
//! Spam-like categories go to the spam folder and are stored read; every
//! other category lands in the inbox. Pure and deterministic.

use super::FineCategory;
use crate::config::SyncSettings;
use crate::db::CategoryAction;
use crate::mail::FolderType;

/// Categories that never stay in the inbox
pub fn is_spam_like(category: FineCategory) -> bool {
    matches!(
        category,
        FineCategory::Newsletter
            | FineCategory::Marketing
            | FineCategory::Payments
            | FineCategory::Finances
            | FineCategory::Notification
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTargets {
    pub inbox: String,
    pub spam: String,
}

impl FolderTargets {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            inbox: settings.mailbox.clone(),
            spam: settings.spam_folder.clone(),
        }
    }
}

impl Default for FolderTargets {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub folder_path: String,
    pub folder_type: FolderType,
    /// Stored as read regardless of the server flag
    pub force_read: bool,
}

impl RoutingDecision {
    fn new(path: &str, folder_type: FolderType, force_read: bool) -> Self {
        Self {
            folder_path: path.to_string(),
            folder_type,
            force_read,
        }
    }
}

/// The configured action never moves a message; `MarkAsRead` only sets the read flag
pub fn route(category: FineCategory, action: CategoryAction, targets: &FolderTargets) -> RoutingDecision {
    if is_spam_like(category) {
        return RoutingDecision::new(&targets.spam, FolderType::Spam, true);
    }

    let force_read = action == CategoryAction::MarkAsRead;
    RoutingDecision::new(&targets.inbox, FolderType::Inbox, force_read)
}
