//! Summary and intro prompts

use super::SummaryShape;
use crate::ai::OutputSchema;
use crate::categorize::FineCategory;
use serde_json::json;

const BULLETS_SYSTEM: &str = "You summarize one newsletter issue for a weekly digest. \
Give a short title and two to four bullets with the most useful points. \
Each bullet is one plain sentence. Answer with JSON only.";

const TITLE_SENTENCE_SYSTEM: &str = "You summarize one email for a weekly digest. \
Give a short title and exactly one sentence saying what the reader needs to know or do. \
Answer with JSON only.";

const TITLE_ONLY_SYSTEM: &str = "You summarize one automated email for a weekly digest. \
Give a title of at most ten words naming what happened. Answer with JSON only.";

const INTRO_SYSTEM: &str = "You write the opening paragraph of a weekly email digest. \
Given the item summaries of one category, write two or three friendly sentences \
highlighting what stands out. Plain text, no lists, no greeting line.";

pub fn summary_system(shape: SummaryShape) -> &'static str {
    match shape {
        SummaryShape::Bullets => BULLETS_SYSTEM,
        SummaryShape::TitleSentence => TITLE_SENTENCE_SYSTEM,
        SummaryShape::TitleOnly => TITLE_ONLY_SYSTEM,
    }
}

pub fn intro_system() -> &'static str {
    INTRO_SYSTEM
}

pub fn summary_schema(shape: SummaryShape) -> OutputSchema {
    let title = json!({ "type": "string" });
    let schema = match shape {
        SummaryShape::Bullets => json!({
            "type": "object",
            "properties": {
                "title": title,
                "bullets": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["title", "bullets"],
            "additionalProperties": false
        }),
        SummaryShape::TitleSentence => json!({
            "type": "object",
            "properties": {
                "title": title,
                "sentence": { "type": "string" }
            },
            "required": ["title", "sentence"],
            "additionalProperties": false
        }),
        SummaryShape::TitleOnly => json!({
            "type": "object",
            "properties": { "title": title },
            "required": ["title"],
            "additionalProperties": false
        }),
    };

    OutputSchema {
        name: "digest_summary",
        schema,
    }
}

pub fn summary_prompt(
    category: FineCategory,
    sender: &str,
    subject: &str,
    received: &str,
    body: &str,
) -> String {
    format!(
        "Category: {}\nFrom: {}\nSubject: {}\nReceived: {}\n\nBody:\n{}",
        category.display_name(),
        sender,
        subject,
        received,
        body
    )
}

pub fn intro_prompt(category: FineCategory, summaries: &[String]) -> String {
    format!(
        "Category: {}\nItems this week: {}\n\n{}",
        category.display_name(),
        summaries.len(),
        summaries.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_matches_shape() {
        let bullets = summary_schema(SummaryShape::Bullets).schema;
        assert_eq!(bullets["required"][1], "bullets");

        let title_only = summary_schema(SummaryShape::TitleOnly).schema;
        assert!(title_only["properties"].get("sentence").is_none());
    }
}
