//! MIME decoding of fetched messages into [`ParsedMessage`]

use super::{Address, AttachmentMeta, FetchedMessage, MailError, MailResult, ParsedMessage};
use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser, MimeHeaders};

/// Raw headers kept on the parsed entity for heuristic signals
pub const RETAINED_HEADERS: &[&str] = &[
    "list-unsubscribe",
    "authentication-results",
    "x-mailer",
    "x-campaign",
    "x-campaign-id",
    "x-mc-user",
    "x-mailgun-tag",
    "precedence",
    "auto-submitted",
    "x-mailsift-digest",
];

/// Decode one fetched message. Structural garbage is a parse error.
pub fn parse_message(fetched: &FetchedMessage) -> MailResult<ParsedMessage> {
    if fetched.raw.iter().all(u8::is_ascii_whitespace) {
        return Err(MailError::Parse(format!("UID {} has an empty body", fetched.uid)));
    }

    let message = MessageParser::default()
        .parse(&fetched.raw)
        .ok_or_else(|| MailError::Parse(format!("UID {} is not a MIME message", fetched.uid)))?;

    if message.headers().is_empty() {
        return Err(MailError::Parse(format!("UID {} carries no headers", fetched.uid)));
    }

    let attachments = message
        .attachments()
        .map(|part| AttachmentMeta {
            filename: part
                .attachment_name()
                .unwrap_or("unnamed")
                .to_string(),
            content_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            disposition: part.content_disposition().map(|d| d.ctype().to_string()),
            size: part.contents().len(),
            content_id: part.content_id().map(str::to_string),
        })
        .collect();

    let headers = RETAINED_HEADERS
        .iter()
        .filter_map(|name| {
            message
                .header_raw(*name)
                .map(|value| (name.to_string(), value.trim().to_string()))
        })
        .collect();

    Ok(ParsedMessage {
        uid: fetched.uid,
        message_id: message.message_id().map(normalize_message_id),
        in_reply_to: text_values(message.in_reply_to())
            .into_iter()
            .next()
            .map(|id| normalize_message_id(&id)),
        references: text_values(message.references())
            .iter()
            .map(|id| normalize_message_id(id))
            .collect(),
        subject: message.subject().unwrap_or("").trim().to_string(),
        date: message
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0)),
        is_read: fetched.seen,
        is_starred: fetched.flagged,
        from: addresses(message.from()).into_iter().next(),
        to: addresses(message.to()),
        cc: addresses(message.cc()),
        bcc: addresses(message.bcc()),
        body_html: message.body_html(0).map(|b| b.into_owned()),
        body_text: message.body_text(0).map(|b| b.into_owned()),
        attachments,
        headers,
    })
}

fn normalize_message_id(id: &str) -> String {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{}>", id)
}

fn text_values(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Text(text) => vec![text.to_string()],
        HeaderValue::TextList(list) => list.iter().map(|t| t.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn addresses(value: Option<&mail_parser::Address<'_>>) -> Vec<Address> {
    let convert = |addr: &mail_parser::Addr<'_>| {
        addr.address
            .as_deref()
            .map(|address| Address::new(addr.name.as_deref(), address))
    };

    match value {
        Some(mail_parser::Address::List(list)) => list.iter().filter_map(convert).collect(),
        Some(mail_parser::Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(convert)
            .collect(),
        None => Vec::new(),
    }
}
