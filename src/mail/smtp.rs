//! Outbound delivery over SMTP (lettre)

use super::config::{SecurityType, SmtpConfig};
use super::{MailError, MailResult};
use crate::credentials::CredentialResolver;
use crate::db::Account;
use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Header stamped on digests so a synced-back copy is recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestMarkerHeader(String);

impl DigestMarkerHeader {
    pub const NAME: &'static str = "X-Mailsift-Digest";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Header for DigestMarkerHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(Self::NAME)
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// A rendered message ready for delivery
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    /// Value of the digest marker header, if any
    pub digest_marker: Option<String>,
}

/// Delivery collaborator
#[async_trait]
pub trait OutboundMailer: Send + Sync {
    async fn send(&self, from: &Account, email: &OutboundEmail) -> MailResult<()>;
}

/// Sends through the account's own SMTP server
#[derive(Clone)]
pub struct SmtpMailer {
    credentials: CredentialResolver,
}

impl SmtpMailer {
    pub fn new(credentials: CredentialResolver) -> Self {
        Self { credentials }
    }
}

/// Build the MIME message for `email` sent from `account`
pub fn build_message(account: &Account, email: &OutboundEmail) -> MailResult<Message> {
    let from: Mailbox = match &account.display_name {
        Some(name) => format!("{} <{}>", name, account.email),
        None => account.email.clone(),
    }
    .parse()
    .map_err(|e: lettre::address::AddressError| MailError::Smtp(format!("Invalid from address: {}", e)))?;

    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::Smtp(format!("Invalid to address: {}", e)))?;

    let mut builder = Message::builder().from(from).to(to).subject(email.subject.clone());
    if let Some(marker) = &email.digest_marker {
        builder = builder.header(DigestMarkerHeader::new(marker.clone()));
    }

    let text = email.text_body.clone().unwrap_or_default();
    builder
        .multipart(MultiPart::alternative_plain_html(text, email.html_body.clone()))
        .map_err(|e| MailError::Smtp(format!("Failed to build email: {}", e)))
}

#[async_trait]
impl OutboundMailer for SmtpMailer {
    async fn send(&self, from: &Account, email: &OutboundEmail) -> MailResult<()> {
        let message = build_message(from, email)?;

        let resolved = self
            .credentials
            .resolve_smtp(from)
            .await
            .map_err(|e| MailError::Authentication(e.to_string()))?;
        let creds = Credentials::new(resolved.username.clone(), resolved.secret().to_string());
        let mechanisms = if resolved.is_oauth() {
            vec![Mechanism::Xoauth2]
        } else {
            vec![Mechanism::Plain, Mechanism::Login]
        };

        let server = SmtpConfig::from_account(from);
        let mailer: AsyncSmtpTransport<Tokio1Executor> = match server.security {
            SecurityType::SSL => AsyncSmtpTransport::<Tokio1Executor>::relay(&server.host)
                .map_err(|e| MailError::Smtp(e.to_string()))?
                .credentials(creds)
                .authentication(mechanisms)
                .port(server.port)
                .build(),
            SecurityType::STARTTLS => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host)
                    .map_err(|e| MailError::Smtp(e.to_string()))?
                    .credentials(creds)
                    .authentication(mechanisms)
                    .port(server.port)
                    .build()
            }
            SecurityType::NONE => {
                return Err(MailError::Smtp("Insecure SMTP not supported".to_string()));
            }
        };

        mailer
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        log::info!("Delivered \"{}\" from account {}", email.subject, from.id);
        Ok(())
    }
}
