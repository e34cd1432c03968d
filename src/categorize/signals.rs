//! Heuristic Signal Extractor
//!
//! Cheap structural signals computed from a parsed message. Pure functions;
//! the results are hints for the model, never a verdict.

use crate::mail::ParsedMessage;
use regex_lite::Regex;
use serde::Serialize;

const MAX_PROMO_KEYWORDS: usize = 10;
const HEAVY_STYLE_THRESHOLD: usize = 20;
pub const URL_PLACEHOLDER: &str = "[link]";

const PROMO_KEYWORDS: &[&str] = &[
    "% off",
    "discount",
    "limited time",
    "special offer",
    "exclusive offer",
    "free shipping",
    "buy now",
    "shop now",
    "promo code",
    "coupon",
    "flash sale",
    "sale ends",
    "clearance",
    "deal of the day",
    "last chance",
    "new arrivals",
    "save up to",
    "best seller",
    "don't miss",
    "order now",
];

const UNSUBSCRIBE_PHRASES: &[&str] = &[
    "unsubscribe",
    "opt out",
    "opt-out",
    "manage preferences",
    "email preferences",
    "manage your subscription",
];

const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "msn.com",
    "yahoo.com",
    "ymail.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "gmx.com",
    "gmx.de",
    "mail.com",
    "yandex.com",
    "zoho.com",
];

const AUTOMATION_HEADERS: &[&str] = &[
    "x-mailer",
    "x-campaign",
    "x-campaign-id",
    "x-mc-user",
    "x-mailgun-tag",
];

lazy_static::lazy_static! {
    static ref SCRIPT_STYLE_RE: Option<Regex> =
        Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>").ok();
    static ref COMMENT_RE: Option<Regex> = Regex::new(r"(?s)<!--.*?-->").ok();
    static ref IMG_RE: Option<Regex> = Regex::new(r"(?is)<img\b[^>]*>").ok();
    static ref BLOCK_RE: Option<Regex> =
        Regex::new(r"(?i)<\s*(br|/p|/div|/tr|/li|/h[1-6]|/table|/blockquote|hr)\b[^>]*>").ok();
    static ref TAG_RE: Option<Regex> = Regex::new(r"(?s)<[^>]+>").ok();
    static ref URL_RE: Option<Regex> = Regex::new(r#"(?i)\b(https?://|www\.)[^\s<>"']+"#).ok();
    static ref PIXEL_DIM_RE: Option<Regex> =
        Regex::new(r#"(?i)(width|height)\s*[:=]\s*["']?\s*(0|1)(px)?\b"#).ok();
}

fn replace_all(re: &Option<Regex>, text: &str, replacement: &str) -> String {
    match re {
        Some(re) => re.replace_all(text, replacement).into_owned(),
        None => text.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&zwnj;", "")
        .replace("&amp;", "&")
}

/// HTML to plain text: drops scripts, styles and images, keeps block breaks
pub fn html_to_text(html: &str) -> String {
    let text = replace_all(&SCRIPT_STYLE_RE, html, "");
    let text = replace_all(&COMMENT_RE, &text, "");
    let text = replace_all(&IMG_RE, &text, "");
    let text = replace_all(&BLOCK_RE, &text, "\n");
    let text = replace_all(&TAG_RE, &text, "");
    normalize_whitespace(&decode_entities(&text))
}

pub fn replace_urls(text: &str) -> String {
    replace_all(&URL_RE, text, URL_PLACEHOLDER)
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// Cleaned plain body: HTML normalised when present, URLs replaced
pub fn clean_body(message: &ParsedMessage) -> String {
    clean_parts(message.body_html.as_deref(), message.body_text.as_deref())
}

/// Same cleaning for bodies that are not attached to a [`ParsedMessage`]
pub fn clean_parts(html: Option<&str>, text: Option<&str>) -> String {
    let text = match (html, text) {
        (Some(html), _) if !html.trim().is_empty() => html_to_text(html),
        (_, Some(text)) => normalize_whitespace(text),
        _ => String::new(),
    };
    replace_urls(&text)
}

/// First `max_chars` characters, on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeuristicSignals {
    pub has_tracking_pixel: bool,
    pub has_unsubscribe: bool,
    pub promo_keywords: Vec<String>,
    pub sender_domain: Option<String>,
    pub free_mail_sender: bool,
    /// `Some(true)` for pass, `Some(false)` for any other verdict
    pub dkim_pass: Option<bool>,
    pub spf_pass: Option<bool>,
    pub image_count: usize,
    pub heavy_inline_styling: bool,
    pub automation_headers: Vec<String>,
}

impl HeuristicSignals {
    /// Compact description for prompts
    pub fn describe(&self) -> String {
        let verdict = |v: Option<bool>| match v {
            Some(true) => "pass",
            Some(false) => "fail",
            None => "unknown",
        };

        let mut lines = vec![
            format!("tracking_pixel: {}", self.has_tracking_pixel),
            format!("unsubscribe_present: {}", self.has_unsubscribe),
            format!(
                "promotional_keywords: {}",
                if self.promo_keywords.is_empty() {
                    "none".to_string()
                } else {
                    self.promo_keywords.join(", ")
                }
            ),
            format!(
                "sender_domain: {} (free mail: {})",
                self.sender_domain.as_deref().unwrap_or("unknown"),
                self.free_mail_sender
            ),
            format!("dkim: {}, spf: {}", verdict(self.dkim_pass), verdict(self.spf_pass)),
            format!(
                "images: {}, heavy_inline_styling: {}",
                self.image_count, self.heavy_inline_styling
            ),
        ];
        if !self.automation_headers.is_empty() {
            lines.push(format!("automation_headers: {}", self.automation_headers.join(", ")));
        }
        lines.join("\n")
    }
}

fn is_tracking_image(tag: &str) -> bool {
    let compact: String = tag.to_lowercase().split_whitespace().collect();
    if compact.contains("display:none") || compact.contains("visibility:hidden") {
        return true;
    }

    match &*PIXEL_DIM_RE {
        Some(re) => {
            let mut width = false;
            let mut height = false;
            for caps in re.captures_iter(tag) {
                match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
                    Some(ref d) if d == "width" => width = true,
                    Some(ref d) if d == "height" => height = true,
                    _ => {}
                }
            }
            width && height
        }
        None => false,
    }
}

/// `dkim=pass` style verdicts from Authentication-Results
fn auth_verdict(results: &str, method: &str) -> Option<bool> {
    let lower = results.to_lowercase();
    let needle = format!("{}=", method);
    let start = lower.find(&needle)? + needle.len();
    let verdict: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    Some(verdict == "pass")
}

pub fn extract_signals(message: &ParsedMessage) -> HeuristicSignals {
    let html = message.body_html.as_deref().unwrap_or("");
    let text = message.body_text.as_deref().unwrap_or("");
    let haystack = format!("{}\n{}\n{}", message.subject, text, html).to_lowercase();

    let images: Vec<&str> = match &*IMG_RE {
        Some(re) => re.find_iter(html).map(|m| m.as_str()).collect(),
        None => Vec::new(),
    };

    let has_unsubscribe = message.header("list-unsubscribe").is_some()
        || UNSUBSCRIBE_PHRASES.iter().any(|p| haystack.contains(p));

    let promo_keywords = PROMO_KEYWORDS
        .iter()
        .filter(|k| haystack.contains(*k))
        .take(MAX_PROMO_KEYWORDS)
        .map(|k| k.to_string())
        .collect();

    let sender_domain = message.from.as_ref().and_then(|a| a.domain());
    let free_mail_sender = sender_domain
        .as_deref()
        .map(|d| FREE_MAIL_DOMAINS.contains(&d))
        .unwrap_or(false);

    let auth_results = message.header("authentication-results");

    let mut automation_headers: Vec<String> = AUTOMATION_HEADERS
        .iter()
        .filter(|h| message.header(h).is_some())
        .map(|h| h.to_string())
        .collect();
    if let Some(precedence) = message.header("precedence") {
        if matches!(precedence.to_lowercase().as_str(), "bulk" | "list" | "junk") {
            automation_headers.push(format!("precedence={}", precedence.to_lowercase()));
        }
    }
    if let Some(auto) = message.header("auto-submitted") {
        if !auto.eq_ignore_ascii_case("no") {
            automation_headers.push("auto-submitted".to_string());
        }
    }

    HeuristicSignals {
        has_tracking_pixel: images.iter().any(|tag| is_tracking_image(tag)),
        has_unsubscribe,
        promo_keywords,
        sender_domain,
        free_mail_sender,
        dkim_pass: auth_results.and_then(|r| auth_verdict(r, "dkim")),
        spf_pass: auth_results.and_then(|r| auth_verdict(r, "spf")),
        image_count: images.len(),
        heavy_inline_styling: html.matches("style=").count() >= HEAVY_STYLE_THRESHOLD,
        automation_headers,
    }
}
