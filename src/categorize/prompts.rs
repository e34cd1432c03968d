//! Prompts and output schemas for the two classification stages

use super::{CoarseBucket, FineCategory, HeuristicSignals};
use crate::ai::{enum_schema, OutputSchema};

pub const COARSE_SYSTEM: &str = "You sort incoming email into exactly one coarse bucket.\n\
transactional: receipts, payments, bank or investment statements, account and security notices, verification codes, shipping and service notifications.\n\
promotional: marketing campaigns, sales, product announcements, newsletters and content subscriptions.\n\
operational: work conversations, tickets, CI and monitoring alerts, automated reports, software and system updates.\n\
personal: mail written by a person to the recipient in a private capacity.\n\
The heuristic signals are hints and may be wrong. Answer with JSON only.";

const TRANSACTIONAL_SYSTEM: &str = "The email is transactional. Choose the most specific label.\n\
payments: receipts, invoices, purchase confirmations, refunds, subscription charges.\n\
finances: bank, card, brokerage or tax statements and balance alerts.\n\
account-related: sign-in alerts, password changes, security or policy notices for an account.\n\
email-verification: verification codes, magic links, confirm-your-address requests.\n\
notification: shipping updates and any other automated service notice.\n\
Answer with JSON only.";

const PROMOTIONAL_SYSTEM: &str = "The email is promotional. Choose one label.\n\
marketing: sales, offers, discounts, product launches, calls to buy.\n\
newsletter: editorial content, digests and subscriptions read for their content.\n\
Answer with JSON only.";

const OPERATIONAL_SYSTEM: &str = "The email is operational. Choose one label.\n\
work: directly relevant to the recipient's job as described in their work profile, including colleagues, customers, tickets and reviews.\n\
system-updates: generic automated updates, release notes, terms changes and alerts unrelated to the work profile.\n\
Answer with JSON only.";

pub fn coarse_schema() -> OutputSchema {
    let values: Vec<&str> = CoarseBucket::ALL.iter().map(|b| b.as_str()).collect();
    enum_schema("coarse_bucket", "bucket", &values)
}

pub fn fine_schema(bucket: CoarseBucket) -> OutputSchema {
    let values: Vec<&str> = bucket.labels().iter().map(FineCategory::as_str).collect();
    enum_schema("fine_category", "category", &values)
}

pub fn fine_system(bucket: CoarseBucket) -> Option<&'static str> {
    match bucket {
        CoarseBucket::Transactional => Some(TRANSACTIONAL_SYSTEM),
        CoarseBucket::Promotional => Some(PROMOTIONAL_SYSTEM),
        CoarseBucket::Operational => Some(OPERATIONAL_SYSTEM),
        CoarseBucket::Personal => None,
    }
}

/// Message block shared by both stages
pub fn message_prompt(
    sender: &str,
    sender_name: Option<&str>,
    subject: &str,
    body: &str,
    signals: &HeuristicSignals,
) -> String {
    let from = match sender_name {
        Some(name) => format!("{} <{}>", name, sender),
        None => sender.to_string(),
    };
    format!(
        "From: {}\nSubject: {}\n\nBody:\n{}\n\nHeuristic signals:\n{}",
        from,
        subject,
        body,
        signals.describe()
    )
}

pub fn fine_prompt(bucket: CoarseBucket, message: &str, work_profile: Option<&str>) -> String {
    match (bucket, work_profile) {
        (CoarseBucket::Operational, Some(profile)) if !profile.trim().is_empty() => {
            format!("Recipient work profile:\n{}\n\n{}", profile.trim(), message)
        }
        (CoarseBucket::Operational, _) => {
            format!("Recipient work profile: not provided\n\n{}", message)
        }
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fine_schema_restricts_to_bucket_labels() {
        let schema = fine_schema(CoarseBucket::Promotional).schema;
        let values = schema["properties"]["category"]["enum"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.iter().any(|v| v == "newsletter"));
    }

    #[test]
    fn test_operational_prompt_includes_work_profile() {
        let prompt = fine_prompt(CoarseBucket::Operational, "MSG", Some("SRE at Acme"));
        assert!(prompt.starts_with("Recipient work profile:\nSRE at Acme"));
        assert!(prompt.ends_with("MSG"));
        assert_eq!(fine_prompt(CoarseBucket::Transactional, "MSG", Some("x")), "MSG");
        assert!(fine_system(CoarseBucket::Personal).is_none());
    }
}
