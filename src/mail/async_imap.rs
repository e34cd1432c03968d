//! Async IMAP implementation of [`MailConnector`]
//!
//! TLS through `async-native-tls` over a tokio TCP stream. Password accounts
//! use LOGIN, OAuth accounts AUTHENTICATE XOAUTH2.

use super::config::{ImapConfig, SecurityType, CONNECT_TIMEOUT};
use super::session::{MailConnector, MailSession};
use super::{FetchedMessage, MailError, MailResult, MailboxStatus};
use crate::credentials::ResolvedCredentials;
use async_imap::types::Flag;
use async_imap::{Authenticator, Client, Session};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::StreamExt;
use std::fmt::Debug;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

const FETCH_QUERY: &str = "(UID FLAGS RFC822)";

/// XOAUTH2 Authenticator (RFC 7628 style bearer over SASL)
struct XOAuth2<'a> {
    user: &'a str,
    access_token: &'a str,
}

impl Authenticator for XOAuth2<'_> {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        // async-imap base64-encodes the response
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

/// Strip characters that could smuggle extra IMAP commands into a mailbox name
pub fn sanitize_folder_name(folder: &str) -> String {
    folder
        .chars()
        .filter(|c| {
            c.is_alphanumeric()
                || matches!(c, '/' | '.' | '-' | '_' | '[' | ']' | ' ' | '&' | ',')
        })
        .collect()
}

/// Comma-separated UID set for FETCH/STORE
pub fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn imap_err(e: async_imap::error::Error) -> MailError {
    match e {
        async_imap::error::Error::Io(io) => MailError::Io(io),
        other => MailError::Imap(other.to_string()),
    }
}

type TlsStream = async_native_tls::TlsStream<Compat<tokio::net::TcpStream>>;

/// Production connector
#[derive(Debug, Default, Clone)]
pub struct ImapConnector;

impl ImapConnector {
    pub fn new() -> Self {
        Self
    }

    async fn tcp(server: &ImapConfig, port: u16) -> MailResult<Compat<tokio::net::TcpStream>> {
        let address = format!("{}:{}", server.host, port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(&address))
            .await
            .map_err(|_| MailError::Connection(format!("timed out connecting to {}", address)))?
            .map_err(|e| MailError::Connection(format!("{}: {}", address, e)))?;
        Ok(stream.compat())
    }

    async fn tls(server: &ImapConfig, port: u16) -> MailResult<TlsStream> {
        let tcp = Self::tcp(server, port).await?;

        let connector = if server.accept_invalid_certs {
            log::warn!("Accepting invalid TLS certificates for {}", server.host);
            async_native_tls::TlsConnector::new().danger_accept_invalid_certs(true)
        } else {
            async_native_tls::TlsConnector::new()
        };

        tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(&server.host, tcp))
            .await
            .map_err(|_| MailError::Connection(format!("TLS handshake with {} timed out", server.host)))?
            .map_err(|e| MailError::Connection(format!("TLS handshake with {} failed: {}", server.host, e)))
    }

    async fn authenticate<T>(stream: T, credentials: &ResolvedCredentials) -> MailResult<Session<T>>
    where
        T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
    {
        let mut client = Client::new(stream);

        // AUTHENTICATE would otherwise read the greeting as its continuation
        client
            .read_response()
            .await
            .map_err(|e| MailError::Connection(format!("Failed to read server greeting: {}", e)))?;

        if credentials.is_oauth() {
            let auth = XOAuth2 {
                user: &credentials.username,
                access_token: credentials.secret(),
            };
            client
                .authenticate("XOAUTH2", auth)
                .await
                .map_err(|(e, _client)| MailError::Authentication(format!("XOAUTH2 rejected: {}", e)))
        } else {
            client
                .login(&credentials.username, credentials.secret())
                .await
                .map_err(|(e, _client)| MailError::Authentication(e.to_string()))
        }
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(
        &self,
        server: &ImapConfig,
        credentials: &ResolvedCredentials,
    ) -> MailResult<Box<dyn MailSession>> {
        log::debug!("Connecting to {} ({:?})", server.address(), server.security);

        let session: Box<dyn MailSession> = match server.security {
            SecurityType::SSL => {
                let tls = Self::tls(server, server.port).await?;
                Box::new(ImapSession::new(Self::authenticate(tls, credentials).await?))
            }
            SecurityType::STARTTLS => {
                // Upgraded sessions go over implicit TLS on 993
                log::debug!("STARTTLS configured for {}, using implicit TLS on 993", server.host);
                let tls = Self::tls(server, 993).await?;
                Box::new(ImapSession::new(Self::authenticate(tls, credentials).await?))
            }
            SecurityType::NONE => {
                log::warn!("Connecting to {} without encryption", server.host);
                let tcp = Self::tcp(server, server.port).await?;
                Box::new(ImapSession::new(Self::authenticate(tcp, credentials).await?))
            }
        };

        log::debug!("Authenticated as {}", credentials.username);
        Ok(session)
    }
}

/// Authenticated async-imap session over any transport
pub struct ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    inner: Session<T>,
}

impl<T> ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    fn new(inner: Session<T>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T> MailSession for ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    async fn select(&mut self, mailbox: &str) -> MailResult<MailboxStatus> {
        let safe = sanitize_folder_name(mailbox);
        let mailbox = self.inner.select(&safe).await.map_err(imap_err)?;

        let can_store_seen = mailbox
            .permanent_flags
            .iter()
            .any(|flag| matches!(flag, Flag::Seen | Flag::MayCreate));

        Ok(MailboxStatus {
            exists: mailbox.exists,
            uid_next: mailbox.uid_next,
            uid_validity: mailbox.uid_validity,
            can_store_seen,
        })
    }

    async fn uid_search(&mut self, query: &str) -> MailResult<Vec<u32>> {
        let uids = self.inner.uid_search(query).await.map_err(imap_err)?;
        Ok(uids.into_iter().collect())
    }

    async fn uid_fetch(&mut self, uids: &[u32]) -> MailResult<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let set = uid_set(uids);
        let stream = self.inner.uid_fetch(&set, FETCH_QUERY).await.map_err(imap_err)?;
        let responses: Vec<_> = stream.collect().await;

        let mut fetched = Vec::with_capacity(responses.len());
        for response in responses {
            let fetch = match response {
                Ok(fetch) => fetch,
                Err(e) => {
                    log::warn!("Dropping malformed FETCH response: {}", e);
                    continue;
                }
            };

            // Unsolicited FETCH responses carry no UID and no body
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                continue;
            };

            let mut seen = false;
            let mut flagged = false;
            for flag in fetch.flags() {
                match flag {
                    Flag::Seen => seen = true,
                    Flag::Flagged => flagged = true,
                    _ => {}
                }
            }

            fetched.push(FetchedMessage {
                uid,
                seen,
                flagged,
                raw: body.to_vec(),
            });
        }

        Ok(fetched)
    }

    async fn add_seen(&mut self, uids: &[u32]) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }

        let set = uid_set(uids);
        let stream = self
            .inner
            .uid_store(&set, "+FLAGS.SILENT (\\Seen)")
            .await
            .map_err(imap_err)?;
        // Drain so the tagged OK is consumed before the next command
        let _: Vec<_> = stream.collect().await;
        Ok(())
    }

    async fn close(&mut self) -> MailResult<()> {
        self.inner.close().await.map_err(imap_err)
    }

    async fn logout(&mut self) -> MailResult<()> {
        self.inner.logout().await.map_err(imap_err)
    }
}
