use std::sync::Mutex;

use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::Mailbox,
    transport::smtp::{authentication::Credentials, client::TlsParameters, Error as SmtpError},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpSettings;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("send error: {0}")]
    Send(String),
}

impl From<SmtpError> for NotifyError {
    fn from(err: SmtpError) -> Self {
        NotifyError::Send(err.to_string())
    }
}

impl From<lettre::error::Error> for NotifyError {
    fn from(err: lettre::error::Error) -> Self {
        NotifyError::Send(err.to_string())
    }
}

impl From<AddressError> for NotifyError {
    fn from(err: AddressError) -> Self {
        NotifyError::InvalidAddress(err.to_string())
    }
}

/// Fire-and-forget customer notifications. Callers log failures with
/// `warn!` and move on; delivery never gates a state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, anyhow::Error> {
        let sender: Mailbox = settings.from.parse()?;

        let transport = if settings.tls_disabled {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
                .build()
        } else {
            let creds = Credentials::new(settings.username.clone(), settings.password.clone());
            let tls = TlsParameters::new(settings.host.clone())?;

            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
                .port(settings.port)
                .tls(lettre::transport::smtp::client::Tls::Required(tls))
                .credentials(creds)
                .build()
        };

        Ok(Self { transport, sender })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.sender.clone())
            .to(to.parse()?)
            .subject(subject)
            .body(body.to_string())?;

        self.transport.send(email).await.map(|_| ()).map_err(|e| e.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct MockNotifier {
    pub sent: Mutex<Vec<SentMessage>>,
    pub should_fail: Mutex<bool>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        if *self.should_fail.lock().unwrap() {
            return Err(NotifyError::Send("mock failure".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
