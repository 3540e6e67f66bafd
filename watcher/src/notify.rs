use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use plate_watch_common::config::EmailConfig;
use tracing::info;

/// Tells an operator about a plate that was just added to the known set.
pub trait Notifier {
    fn notify_new_plate(&self, plate: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid email address {0:?}: {1}")]
    Address(String, AddressError),
    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

pub const SUBJECT: &str = "New Number Plate Detected";

/// Plain-text mail over an authenticated STARTTLS submission session.
///
/// Each notification opens, uses and closes its own SMTP connection.
pub struct SmtpNotifier {
    host: String,
    port: u16,
    sender: Mailbox,
    recipient: Mailbox,
    credentials: Credentials,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let parse = |addr: &str| {
            addr.parse::<Mailbox>()
                .map_err(|e| NotifyError::Address(addr.to_string(), e))
        };
        Ok(Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            sender: parse(&config.sender)?,
            recipient: parse(&config.recipient)?,
            credentials: Credentials::new(config.sender.clone(), config.password.clone()),
        })
    }

    fn compose(&self, plate: &str) -> Result<Message, NotifyError> {
        let body = format!("A new number plate {plate} was detected and added to the sample list.");
        Ok(Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?)
    }
}

impl Notifier for SmtpNotifier {
    fn notify_new_plate(&self, plate: &str) -> Result<(), NotifyError> {
        let message = self.compose(plate)?;
        let transport = SmtpTransport::starttls_relay(&self.host)?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();
        transport.send(&message)?;
        info!(plate, recipient = %self.recipient, "new plate email sent");
        Ok(())
    }
}
