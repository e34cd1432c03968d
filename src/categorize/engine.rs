//! Two-stage categorizer

use super::prompts;
use super::signals::{clean_body, extract_signals, truncate_chars};
use super::{Categorization, CoarseBucket, Decision, FineCategory};
use crate::ai::{parse_structured, AiError, AiResult, CompletionRequest, LanguageModel};
use crate::mail::ParsedMessage;
use serde::Deserialize;
use std::sync::Arc;

/// Comment embedded in every rendered digest
pub const DIGEST_BODY_MARKER: &str = "<!-- mailsift:digest -->";
pub const DIGEST_HEADER: &str = "x-mailsift-digest";

const FORWARD_SUBJECT_PREFIXES: &[&str] = &["fwd:", "fw:", "forward:"];
const FORWARD_BANNERS: &[&str] = &["forwarded message", "original message"];
const FORWARD_HEADER_LINES: &[&str] = &["from:", "subject:", "date:"];

#[derive(Deserialize)]
struct CoarseOutput {
    bucket: CoarseBucket,
}

#[derive(Deserialize)]
struct FineOutput {
    category: String,
}

/// Carries a system-generated digest marker
pub fn is_digest(message: &ParsedMessage) -> bool {
    message.header(DIGEST_HEADER).is_some()
        || [&message.body_html, &message.body_text]
            .iter()
            .any(|body| body.as_deref().is_some_and(|b| b.contains(DIGEST_BODY_MARKER)))
}

/// Subject prefix, forward banner or forwarded header block near the top
pub fn is_forwarded(subject: &str, cleaned_body: &str, scan_chars: usize) -> bool {
    let subject = subject.trim().to_lowercase();
    if FORWARD_SUBJECT_PREFIXES.iter().any(|p| subject.starts_with(p)) {
        return true;
    }

    let head = truncate_chars(cleaned_body, scan_chars).to_lowercase();
    if FORWARD_BANNERS.iter().any(|b| head.contains(b)) {
        return true;
    }

    let unquoted: Vec<&str> = head
        .lines()
        .map(|line| line.trim_start().trim_start_matches('>').trim_start())
        .filter(|line| !line.is_empty())
        .collect();
    let is_header_line = |line: &str| FORWARD_HEADER_LINES.iter().any(|prefix| line.starts_with(prefix));

    // A body that opens with a header line is a forward on its own
    if unquoted.first().is_some_and(|line| is_header_line(*line)) {
        return true;
    }

    let distinct_headers = FORWARD_HEADER_LINES
        .iter()
        .filter(|prefix| unquoted.iter().any(|line| line.starts_with(*prefix)))
        .count();
    distinct_headers >= 2
}

#[derive(Clone)]
pub struct Categorizer {
    model: Arc<dyn LanguageModel>,
    prompt_body_chars: usize,
    forward_scan_chars: usize,
}

impl Categorizer {
    pub fn new(model: Arc<dyn LanguageModel>, prompt_body_chars: usize, forward_scan_chars: usize) -> Self {
        Self {
            model,
            prompt_body_chars,
            forward_scan_chars,
        }
    }

    /// Never fails: every stage has a fixed fallback
    pub async fn categorize(&self, message: &ParsedMessage, work_profile: Option<&str>) -> Categorization {
        if is_digest(message) {
            return Categorization {
                category: FineCategory::Uncategorizable,
                bucket: None,
                decision: Decision::ShortCircuit,
            };
        }

        let body = clean_body(message);
        if is_forwarded(&message.subject, &body, self.forward_scan_chars) {
            return Categorization {
                category: FineCategory::Personal,
                bucket: Some(CoarseBucket::Personal),
                decision: Decision::ShortCircuit,
            };
        }

        let signals = extract_signals(message);
        let prompt = prompts::message_prompt(
            message.sender_address(),
            message.sender_name(),
            &message.subject,
            truncate_chars(&body, self.prompt_body_chars),
            &signals,
        );

        let mut decision = Decision::Model;

        let bucket = match self.coarse(&prompt).await {
            Ok(bucket) => bucket,
            Err(e) => {
                log::warn!("Coarse classification of UID {} fell back: {}", message.uid, e);
                decision = Decision::Fallback;
                CoarseBucket::Operational
            }
        };

        let category = match self.fine(bucket, &prompt, work_profile).await {
            Ok(category) => category,
            Err(e) => {
                log::warn!(
                    "Fine classification ({}) of UID {} fell back: {}",
                    bucket.as_str(),
                    message.uid,
                    e
                );
                decision = Decision::Fallback;
                bucket.fallback()
            }
        };

        Categorization {
            category,
            bucket: Some(bucket),
            decision,
        }
    }

    async fn coarse(&self, prompt: &str) -> AiResult<CoarseBucket> {
        let request = CompletionRequest::structured(
            prompts::COARSE_SYSTEM,
            prompt,
            prompts::coarse_schema(),
        );
        let raw = self.model.complete(&request).await?;
        let output: CoarseOutput = parse_structured(&raw)?;
        Ok(output.bucket)
    }

    async fn fine(&self, bucket: CoarseBucket, prompt: &str, work_profile: Option<&str>) -> AiResult<FineCategory> {
        // Personal has a single label
        let Some(system) = prompts::fine_system(bucket) else {
            return Ok(bucket.fallback());
        };

        let request = CompletionRequest::structured(
            system,
            prompts::fine_prompt(bucket, prompt, work_profile),
            prompts::fine_schema(bucket),
        );
        let raw = self.model.complete(&request).await?;
        let output: FineOutput = parse_structured(&raw)?;

        FineCategory::parse(&output.category)
            .filter(|category| bucket.labels().contains(category))
            .ok_or_else(|| {
                AiError::Schema(format!(
                    "{} is not a {} label",
                    output.category,
                    bucket.as_str()
                ))
            })
    }
}
