use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use secrecy::ExposeSecret;

use crate::domain::SenderCredentials;

/// A fully rendered message, ready to hand to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from_name: String,
    pub from_email: String,
    pub to_name: Option<String>,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("failed to authenticate with the mail relay: {0}")]
    Authentication(String),
    #[error("the mail relay rejected the message: {0}")]
    Delivery(String),
}

/// The mail relay as the dispatcher sees it: authenticate once per sender,
/// then submit messages over the resulting session.
#[async_trait]
pub trait MailRelay: Send + Sync {
    async fn authenticate(
        &self,
        credentials: &SenderCredentials,
    ) -> Result<Box<dyn RelaySession>, RelayError>;
}

/// An authenticated session. Dropping it releases the underlying connection.
#[async_trait]
pub trait RelaySession: Send {
    async fn submit(&mut self, email: &OutgoingEmail) -> Result<(), RelayError>;
}

/// STARTTLS SMTP relay backed by `lettre`.
pub struct SmtpRelay {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpRelay {
    pub fn new(host: String, port: u16, timeout: Duration) -> Self {
        Self {
            host,
            port,
            timeout,
        }
    }
}

#[async_trait]
impl MailRelay for SmtpRelay {
    #[tracing::instrument(name = "Opening a relay session", skip(self, credentials), fields(sender_email = %credentials.email))]
    async fn authenticate(
        &self,
        credentials: &SenderCredentials,
    ) -> Result<Box<dyn RelaySession>, RelayError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| RelayError::Authentication(e.to_string()))?
            .port(self.port)
            .credentials(Credentials::new(
                credentials.email.as_ref().to_owned(),
                credentials.secret.expose_secret().to_owned(),
            ))
            .timeout(Some(self.timeout))
            .build();

        // Probe the connection up front so a credential problem surfaces when
        // the session is opened, not on the first message.
        match transport.test_connection().await {
            Ok(true) => Ok(Box::new(SmtpSession { transport })),
            Ok(false) => Err(RelayError::Authentication(
                "the relay refused the connection probe".to_string(),
            )),
            Err(e) => Err(RelayError::Authentication(e.to_string())),
        }
    }
}

struct SmtpSession {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl RelaySession for SmtpSession {
    async fn submit(&mut self, email: &OutgoingEmail) -> Result<(), RelayError> {
        let message = build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| RelayError::Delivery(e.to_string()))?;
        Ok(())
    }
}

fn build_message(email: &OutgoingEmail) -> Result<Message, RelayError> {
    let invalid_address =
        |e: lettre::address::AddressError| RelayError::Delivery(e.to_string());

    let from = Mailbox::new(
        Some(email.from_name.clone()),
        email.from_email.parse::<Address>().map_err(invalid_address)?,
    );
    let to = Mailbox::new(
        email.to_name.clone(),
        email.to_email.parse::<Address>().map_err(invalid_address)?,
    );

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| RelayError::Delivery(e.to_string()))
}
