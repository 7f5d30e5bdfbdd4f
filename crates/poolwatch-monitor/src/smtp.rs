//! Notification delivery via SMTP.
//!
//! [`SmtpNotifier`] wraps the `lettre` async SMTP transport and sends one
//! plain-text message per notification. The transport is built once at
//! startup; credentials come from a [`SecretProvider`].

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::error::{ConfigError, NotifyError};
use crate::notifier::{ContactHeader, Notification, Notifier, NotifyFuture};
use crate::secrets::SecretProvider;

/// Default SMTP relay.
pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";

/// Default SMTP port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    /// Socket timeout handed to the transport.
    pub timeout: Duration,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SMTP_SERVER.to_string(),
            port: DEFAULT_SMTP_PORT,
            timeout: Duration::from_secs(90),
        }
    }
}

/// Sends notifications as plain-text email.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl SmtpNotifier {
    /// Build the transport. Fails if the relay name is unusable or the
    /// secret provider cannot produce consistent credentials.
    pub fn new(config: &SmtpConfig, secrets: &dyn SecretProvider) -> Result<Self, ConfigError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| ConfigError::Notifier(e.to_string()))?
            .port(config.port)
            .timeout(Some(config.timeout));

        if let Some(creds) = secrets.smtp_credentials()? {
            debug!(username = %creds.username, "SMTP credentials configured");
            builder = builder.credentials(Credentials::new(creds.username, creds.password));
        }

        Ok(Self {
            mailer: builder.build(),
            server: config.server.clone(),
        })
    }

    /// Check that both header addresses parse, so a typo fails at startup
    /// rather than on the first alert.
    pub fn check_addresses(header: &ContactHeader) -> Result<(), ConfigError> {
        header
            .sender
            .parse::<Mailbox>()
            .map_err(|e| ConfigError::Address {
                field: "sender",
                reason: e.to_string(),
            })?;
        header
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| ConfigError::Address {
                field: "recipient",
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = build_message(notification)?;
        debug!(server = %self.server, "sending notification email");
        self.mailer.send(email).await?;
        info!(
            to = %notification.header.recipient,
            reason = %notification.reason,
            "notification email sent"
        );
        Ok(())
    }
}

impl Notifier for SmtpNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
        Box::pin(self.send(notification))
    }
}

/// Assemble the MIME message for a notification.
pub fn build_message(notification: &Notification) -> Result<Message, NotifyError> {
    Message::builder()
        .from(notification.header.sender.parse()?)
        .to(notification.header.recipient.parse()?)
        .subject(notification.subject())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body())
        .map_err(|e| NotifyError::Build(e.to_string()))
}
