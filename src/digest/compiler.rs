//! Per-user digest compilation and delivery

use super::prompts;
use super::render;
use super::{nothing_to_report, Digest, DigestEntry, DigestResult, SummaryShape};
use crate::ai::{parse_structured, AiError, AiResult, CompletionRequest, LanguageModel};
use crate::cache::PreferenceCache;
use crate::categorize::{clean_parts, truncate_chars, FineCategory};
use crate::db::{Account, Database};
use crate::mail::{OutboundEmail, OutboundMailer};
use crate::storage::{DecryptedMessage, MessageStore};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;

pub const DIGEST_WINDOW_DAYS: i64 = 7;
const SUMMARY_BODY_CHARS: usize = 2000;

#[derive(Deserialize)]
struct SummaryOutput {
    title: String,
    #[serde(default)]
    sentence: Option<String>,
    #[serde(default)]
    bullets: Vec<String>,
}

fn sender_label(message: &DecryptedMessage) -> String {
    match &message.from_name {
        Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, message.from_address),
        _ => message.from_address.clone(),
    }
}

/// Fixed intro used when the model cannot write one
fn fallback_intro(category: FineCategory, count: usize) -> String {
    let noun = if count == 1 { "item" } else { "items" };
    format!(
        "Here is your {} digest with {} {} from the past week.",
        category.display_name(),
        count,
        noun
    )
}

#[derive(Clone)]
pub struct DigestCompiler {
    db: Database,
    store: MessageStore,
    preferences: PreferenceCache,
    model: Arc<dyn LanguageModel>,
    mailer: Arc<dyn OutboundMailer>,
}

impl DigestCompiler {
    pub fn new(
        db: Database,
        store: MessageStore,
        preferences: PreferenceCache,
        model: Arc<dyn LanguageModel>,
        mailer: Arc<dyn OutboundMailer>,
    ) -> Self {
        Self {
            db,
            store,
            preferences,
            model,
            mailer,
        }
    }

    /// Compile and send one digest per opted-in category
    pub async fn compile_digests(&self, user_id: &str) -> DigestResult<Vec<Digest>> {
        let accounts = self.db.list_user_accounts(user_id)?;
        if accounts.is_empty() {
            log::info!("User {} has no active accounts, no digests", user_id);
            return Ok(Vec::new());
        }

        // Settings may have changed since the last sync
        self.preferences.invalidate(user_id).await;
        let prefs = self.preferences.get(user_id).await?;
        if prefs.digest_categories.is_empty() {
            log::debug!("User {} has no digest-enabled categories", user_id);
            return Ok(Vec::new());
        }

        let sender = prefs
            .default_account_id
            .and_then(|id| accounts.iter().find(|a| a.id == id))
            .unwrap_or(&accounts[0]);
        let account_ids: Vec<i64> = accounts.iter().map(|a| a.id).collect();

        let until = Utc::now();
        let since = until - Duration::days(DIGEST_WINDOW_DAYS);

        let mut digests = Vec::with_capacity(prefs.digest_categories.len());
        for &category in &prefs.digest_categories {
            let messages = self.store.recent_in_category(&account_ids, category, &since)?;
            let mut digest = self
                .compile_category(user_id, category, &messages, sender, &since, &until)
                .await;
            self.deliver(sender, &mut digest).await;
            digests.push(digest);
        }

        log::info!(
            "Compiled {} digests for user {} ({} delivered)",
            digests.len(),
            user_id,
            digests.iter().filter(|d| d.delivered).count()
        );
        Ok(digests)
    }

    async fn compile_category(
        &self,
        user_id: &str,
        category: FineCategory,
        messages: &[DecryptedMessage],
        sender: &Account,
        since: &DateTime<Utc>,
        until: &DateTime<Utc>,
    ) -> Digest {
        let shape = SummaryShape::for_category(category);

        let results = join_all(
            messages
                .iter()
                .map(|message| self.summarize(category, shape, message)),
        )
        .await;

        let mut entries = Vec::with_capacity(messages.len());
        for (message, result) in messages.iter().zip(results) {
            match result {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("Summary for message row {} dropped: {}", message.id, e),
            }
        }

        let intro = if entries.is_empty() {
            nothing_to_report(category)
        } else {
            self.intro(category, &entries).await
        };

        Digest {
            user_id: user_id.to_string(),
            category,
            message_count: messages.len(),
            html: render::render_html(category, &intro, &entries, since, until),
            text: render::render_text(category, &intro, &entries),
            subject: render::subject(category, until),
            intro,
            entries,
            recipient: sender.email.clone(),
            sender_account_id: sender.id,
            delivered: false,
            delivery_error: None,
        }
    }

    async fn summarize(
        &self,
        category: FineCategory,
        shape: SummaryShape,
        message: &DecryptedMessage,
    ) -> AiResult<DigestEntry> {
        let body = clean_parts(message.body_html.as_deref(), message.body_text.as_deref());
        let sender = sender_label(message);
        let request = CompletionRequest::structured(
            prompts::summary_system(shape),
            prompts::summary_prompt(
                category,
                &sender,
                &message.subject,
                &message.received_at.to_rfc2822(),
                truncate_chars(&body, SUMMARY_BODY_CHARS),
            ),
            prompts::summary_schema(shape),
        );

        let raw = self.model.complete(&request).await?;
        let output: SummaryOutput = parse_structured(&raw)?;

        let title = output.title.trim().to_string();
        if title.is_empty() {
            return Err(AiError::Schema("empty title".to_string()));
        }

        let (sentence, bullets) = match shape {
            SummaryShape::TitleOnly => (None, Vec::new()),
            SummaryShape::TitleSentence => {
                let sentence = output
                    .sentence
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| AiError::Schema("missing sentence".to_string()))?;
                (Some(sentence), Vec::new())
            }
            SummaryShape::Bullets => {
                let bullets: Vec<String> = output
                    .bullets
                    .into_iter()
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect();
                if bullets.is_empty() {
                    return Err(AiError::Schema("missing bullets".to_string()));
                }
                (None, bullets)
            }
        };

        Ok(DigestEntry {
            message_row_id: message.id,
            sender,
            received_at: message.received_at,
            title,
            sentence,
            bullets,
        })
    }

    async fn intro(&self, category: FineCategory, entries: &[DigestEntry]) -> String {
        let lines: Vec<String> = entries
            .iter()
            .map(|entry| match (&entry.sentence, entry.bullets.is_empty()) {
                (Some(sentence), _) => format!("- {}: {}", entry.title, sentence),
                (None, false) => format!("- {}: {}", entry.title, entry.bullets.join("; ")),
                (None, true) => format!("- {}", entry.title),
            })
            .collect();

        let request = CompletionRequest::text(
            prompts::intro_system(),
            prompts::intro_prompt(category, &lines),
        );
        match self.model.complete(&request).await {
            Ok(intro) if !intro.trim().is_empty() => intro.trim().to_string(),
            Ok(_) => fallback_intro(category, entries.len()),
            Err(e) => {
                log::warn!("Intro for {} digest fell back: {}", category, e);
                fallback_intro(category, entries.len())
            }
        }
    }

    async fn deliver(&self, sender: &Account, digest: &mut Digest) {
        let email = OutboundEmail {
            to: digest.recipient.clone(),
            subject: digest.subject.clone(),
            html_body: digest.html.clone(),
            text_body: Some(digest.text.clone()),
            digest_marker: Some(digest.category.as_str().to_string()),
        };

        match self.mailer.send(sender, &email).await {
            Ok(()) => {
                digest.delivered = true;
                log::info!(
                    "Sent {} digest ({} entries) for user {} via account {}",
                    digest.category,
                    digest.entries.len(),
                    digest.user_id,
                    sender.id
                );
            }
            Err(e) => {
                log::error!("Failed to send {} digest for user {}: {}", digest.category, digest.user_id, e);
                digest.delivery_error = Some(e.to_string());
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingMailer;
    use super::*;
    use crate::categorize::engine::test_support::ScriptedModel;
    use crate::categorize::engine::DIGEST_BODY_MARKER;
    use crate::crypto::{Cipher, SALT_LEN};
    use crate::db::test_support::new_password_account;
    use crate::db::{CategoryAction, CategoryPreference, UserProfile};
    use crate::mail::{Address, ParsedMessage};

    struct Fixture {
        db: Database,
        store: MessageStore,
        account_id: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let cipher = Cipher::from_secret("digest-tests", &[9u8; SALT_LEN]).unwrap();
        let account_id = db
            .add_account(&new_password_account("u1", "me@example.com", "enc"))
            .unwrap();
        Fixture {
            store: MessageStore::new(db.clone(), cipher),
            db,
            account_id,
        }
    }

    fn enable_digest(db: &Database, category: FineCategory) {
        db.set_category_preference(&CategoryPreference {
            user_id: "u1".to_string(),
            category,
            action: CategoryAction::None,
            digest_enabled: true,
        })
        .unwrap();
    }

    fn store_message(f: &Fixture, message_id: &str, category: FineCategory, days_ago: i64) {
        let folder = f.store.get_or_create_folder(f.account_id, "INBOX", None).unwrap();
        let message = ParsedMessage {
            uid: 1,
            message_id: Some(message_id.to_string()),
            subject: format!("Subject {}", message_id),
            date: Some(Utc::now() - Duration::days(days_ago)),
            from: Some(Address::new(Some("Sender"), "sender@example.com")),
            body_html: Some("<p>Hello <b>there</b></p>".to_string()),
            ..Default::default()
        };
        f.store.store(f.account_id, &message, folder.id, category, false).unwrap();
    }

    fn compiler(f: &Fixture, model: Arc<ScriptedModel>, mailer: Arc<RecordingMailer>) -> DigestCompiler {
        DigestCompiler::new(
            f.db.clone(),
            f.store.clone(),
            PreferenceCache::new(f.db.clone()),
            model,
            mailer,
        )
    }

    #[tokio::test]
    async fn test_empty_category_still_produces_digest() {
        let f = fixture();
        enable_digest(&f.db, FineCategory::Work);
        // Outside the window
        store_message(&f, "<old@x>", FineCategory::Work, 30);

        let model = Arc::new(ScriptedModel::default());
        let mailer = Arc::new(RecordingMailer::default());
        let digests = compiler(&f, model.clone(), mailer.clone())
            .compile_digests("u1")
            .await
            .unwrap();

        assert_eq!(digests.len(), 1);
        let digest = &digests[0];
        assert!(digest.is_empty());
        assert_eq!(digest.message_count, 0);
        assert_eq!(digest.intro, "No new items in Work this week.");
        assert!(digest.delivered);
        assert_eq!(model.call_count(), 0);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.to, "me@example.com");
        assert!(sent[0].1.html_body.contains(DIGEST_BODY_MARKER));
        assert_eq!(sent[0].1.digest_marker.as_deref(), Some("work"));
    }

    #[tokio::test]
    async fn test_failed_summary_is_dropped() {
        let f = fixture();
        enable_digest(&f.db, FineCategory::Payments);
        store_message(&f, "<a@x>", FineCategory::Payments, 1);
        store_message(&f, "<b@x>", FineCategory::Payments, 2);

        // Newest first: the first summary fails validation, the second succeeds
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(r#"{"title":"Card charged"}"#.to_string()),
            Ok(r#"{"title":"Invoice paid","sentence":"Your May invoice was paid."}"#.to_string()),
            Ok("One payment went through this week.".to_string()),
        ]));
        let mailer = Arc::new(RecordingMailer::default());
        let digests = compiler(&f, model.clone(), mailer)
            .compile_digests("u1")
            .await
            .unwrap();

        let digest = &digests[0];
        assert_eq!(digest.message_count, 2);
        assert_eq!(digest.entries.len(), 1);
        assert_eq!(digest.entries[0].title, "Invoice paid");
        assert_eq!(digest.intro, "One payment went through this week.");
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_intro_falls_back_and_default_account_is_sender() {
        let f = fixture();
        let second = f
            .db
            .add_account(&new_password_account("u1", "work@example.com", "enc"))
            .unwrap();
        f.db.set_user_profile(&UserProfile {
            user_id: "u1".to_string(),
            work_profile: None,
            default_account_id: Some(second),
        })
        .unwrap();
        enable_digest(&f.db, FineCategory::Notification);
        store_message(&f, "<n@x>", FineCategory::Notification, 1);

        let model = Arc::new(ScriptedModel::new(vec![Ok(r#"{"title":"Package shipped"}"#.to_string())]));
        let mailer = Arc::new(RecordingMailer::default());
        let digests = compiler(&f, model, mailer.clone())
            .compile_digests("u1")
            .await
            .unwrap();

        let digest = &digests[0];
        assert_eq!(digest.entries.len(), 1);
        assert!(digest.entries[0].sentence.is_none());
        assert_eq!(digest.intro, fallback_intro(FineCategory::Notification, 1));
        assert_eq!(digest.recipient, "work@example.com");
        assert_eq!(mailer.sent.lock().unwrap()[0].0, second);
    }

    #[tokio::test]
    async fn test_no_digest_without_opt_in() {
        let f = fixture();
        store_message(&f, "<a@x>", FineCategory::Newsletter, 1);

        let mailer = Arc::new(RecordingMailer::default());
        let digests = compiler(&f, Arc::new(ScriptedModel::default()), mailer.clone())
            .compile_digests("u1")
            .await
            .unwrap();
        assert!(digests.is_empty());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }
}
