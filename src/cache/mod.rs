//! Preference cache
//!
//! Category actions, digest opt-ins and the work profile are read for every
//! message of a sync run. They change rarely, so they are cached per user
//! with a short TTL and invalidated explicitly when the settings change.

use crate::categorize::FineCategory;
use crate::db::{CategoryAction, Database, DbResult};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct PreferenceCacheConfig {
    pub max_capacity: u64,
    pub ttl: Duration,
}

impl Default for PreferenceCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Everything the pipeline needs to know about one user's settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPreferences {
    pub actions: HashMap<FineCategory, CategoryAction>,
    /// Categories with the weekly digest enabled, in label order
    pub digest_categories: Vec<FineCategory>,
    pub work_profile: Option<String>,
    pub default_account_id: Option<i64>,
}

impl UserPreferences {
    /// Configured action, [`CategoryAction::None`] when unset
    pub fn action_for(&self, category: FineCategory) -> CategoryAction {
        self.actions.get(&category).copied().unwrap_or_default()
    }

    pub fn work_profile(&self) -> Option<&str> {
        self.work_profile.as_deref().filter(|p| !p.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct PreferenceCache {
    db: Database,
    cache: Cache<String, Arc<UserPreferences>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl PreferenceCache {
    pub fn new(db: Database) -> Self {
        Self::with_config(db, PreferenceCacheConfig::default())
    }

    pub fn with_config(db: Database, config: PreferenceCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .build();

        Self {
            db,
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, user_id: &str) -> DbResult<Arc<UserPreferences>> {
        if let Some(prefs) = self.cache.get(user_id).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(prefs);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let prefs = Arc::new(self.load(user_id)?);
        self.cache.insert(user_id.to_string(), prefs.clone()).await;
        Ok(prefs)
    }

    /// Drop the cached entry after the user's settings changed
    pub async fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    fn load(&self, user_id: &str) -> DbResult<UserPreferences> {
        let mut prefs = UserPreferences::default();

        for pref in self.db.get_category_preferences(user_id)? {
            prefs.actions.insert(pref.category, pref.action);
            if pref.digest_enabled {
                prefs.digest_categories.push(pref.category);
            }
        }
        prefs
            .digest_categories
            .sort_by_key(|c| FineCategory::ALL.iter().position(|x| x == c));

        if let Some(profile) = self.db.get_user_profile(user_id)? {
            prefs.work_profile = profile.work_profile;
            prefs.default_account_id = profile.default_account_id;
        }
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CategoryPreference, UserProfile};

    fn pref(category: FineCategory, action: CategoryAction, digest_enabled: bool) -> CategoryPreference {
        CategoryPreference {
            user_id: "u1".to_string(),
            category,
            action,
            digest_enabled,
        }
    }

    #[tokio::test]
    async fn test_loads_and_caches_preferences() {
        let db = Database::in_memory().unwrap();
        db.set_category_preference(&pref(FineCategory::Work, CategoryAction::Archive, false))
            .unwrap();
        db.set_category_preference(&pref(FineCategory::Newsletter, CategoryAction::None, true))
            .unwrap();
        db.set_user_profile(&UserProfile {
            user_id: "u1".to_string(),
            work_profile: Some("Backend engineer".to_string()),
            default_account_id: None,
        })
        .unwrap();

        let cache = PreferenceCache::new(db);
        let prefs = cache.get("u1").await.unwrap();
        assert_eq!(prefs.action_for(FineCategory::Work), CategoryAction::Archive);
        assert_eq!(prefs.action_for(FineCategory::Personal), CategoryAction::None);
        assert_eq!(prefs.digest_categories, vec![FineCategory::Newsletter]);
        assert_eq!(prefs.work_profile(), Some("Backend engineer"));

        cache.get("u1").await.unwrap();
        assert_eq!(cache.stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_invalidate_reloads_from_database() {
        let db = Database::in_memory().unwrap();
        let cache = PreferenceCache::new(db.clone());
        assert!(cache.get("u1").await.unwrap().digest_categories.is_empty());

        db.set_category_preference(&pref(FineCategory::Payments, CategoryAction::None, true))
            .unwrap();
        assert!(cache.get("u1").await.unwrap().digest_categories.is_empty());

        cache.invalidate("u1").await;
        assert_eq!(
            cache.get("u1").await.unwrap().digest_categories,
            vec![FineCategory::Payments]
        );
    }
}
