//! Digest rendering (HTML and plain text alternatives)

use super::DigestEntry;
use crate::categorize::engine::DIGEST_BODY_MARKER;
use crate::categorize::FineCategory;
use chrono::{DateTime, Utc};
use std::fmt::Write;

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn subject(category: FineCategory, until: &DateTime<Utc>) -> String {
    format!(
        "Your weekly {} digest ({})",
        category.display_name(),
        until.format("%b %-d, %Y")
    )
}

fn format_day(ts: &DateTime<Utc>) -> String {
    ts.format("%a %b %-d").to_string()
}

pub fn render_html(
    category: FineCategory,
    intro: &str,
    entries: &[DigestEntry],
    since: &DateTime<Utc>,
    until: &DateTime<Utc>,
) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head>\n");
    html.push_str("<body style=\"font-family:sans-serif;max-width:640px;margin:0 auto;color:#222\">\n");
    html.push_str(DIGEST_BODY_MARKER);
    html.push('\n');

    let _ = write!(
        html,
        "<h1 style=\"font-size:20px\">{}</h1>\n<p style=\"color:#666;font-size:13px\">{} to {}</p>\n<p>{}</p>\n",
        escape_html(category.display_name()),
        format_day(since),
        format_day(until),
        escape_html(intro)
    );

    if !entries.is_empty() {
        html.push_str("<ul style=\"padding-left:18px\">\n");
        for entry in entries {
            let _ = write!(
                html,
                "<li style=\"margin-bottom:12px\"><strong>{}</strong><br><span style=\"color:#666;font-size:12px\">{} &middot; {}</span>",
                escape_html(&entry.title),
                escape_html(&entry.sender),
                format_day(&entry.received_at)
            );
            if let Some(sentence) = &entry.sentence {
                let _ = write!(html, "<p style=\"margin:4px 0\">{}</p>", escape_html(sentence));
            }
            if !entry.bullets.is_empty() {
                html.push_str("<ul>");
                for bullet in &entry.bullets {
                    let _ = write!(html, "<li>{}</li>", escape_html(bullet));
                }
                html.push_str("</ul>");
            }
            html.push_str("</li>\n");
        }
        html.push_str("</ul>\n");
    }

    html.push_str("</body></html>\n");
    html
}

pub fn render_text(category: FineCategory, intro: &str, entries: &[DigestEntry]) -> String {
    let mut text = format!("{}\n\n{}\n", category.display_name(), intro);
    for entry in entries {
        let _ = write!(text, "\n- {} ({})", entry.title, entry.sender);
        if let Some(sentence) = &entry.sentence {
            let _ = write!(text, "\n  {}", sentence);
        }
        for bullet in &entry.bullets {
            let _ = write!(text, "\n  * {}", bullet);
        }
    }
    text.push('\n');
    text
}
