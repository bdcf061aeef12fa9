//! Email channels over SMTP.
//!
//! One [`SmtpMailer`] is shared by the `email` channel (internal recipients,
//! logos inline) and the `teams_email` channel (a Teams channel mailbox,
//! no logos).

use std::sync::Arc;
use std::time::Duration;

use alerts_core::config::EmailConfig;
use alerts_core::error::{AlertsError, Result};
use alerts_core::traits::NotifyChannel;
use alerts_core::types::{Audience, Event};
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::logo::LogoSet;
use crate::render::{LogoRefs, MessageRenderer};
use crate::retry::{Failure, RetryPolicy};

/// Implicit-TLS SMTP port; every other port negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Authenticated SMTP transport plus sender identity.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
    port: u16,
    retry: RetryPolicy,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let builder = match config.smtp_port {
            SMTPS_PORT => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host),
        }
        .map_err(|e| AlertsError::config(format!("SMTP host '{}': {e}", config.smtp_host)))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        let from: Mailbox = config
            .sender()
            .parse()
            .map_err(|e| AlertsError::config(format!("invalid sender '{}': {e}", config.sender())))?;

        Ok(Self {
            transport,
            from,
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            retry: RetryPolicy::new(config.max_attempts),
        })
    }

    pub fn sender(&self) -> &Mailbox {
        &self.from
    }

    /// Deliver a built message, retrying transient SMTP failures.
    pub async fn deliver(&self, message: Message) -> Result<()> {
        let label = format!("SMTP {}:{}", self.host, self.port);
        let transport = &self.transport;
        let message = &message;
        self.retry
            .run(&label, move |_| async move {
                match transport.send(message.clone()).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_permanent() => {
                        Err(Failure::Permanent(AlertsError::channel(format!("SMTP rejected: {e}"))))
                    }
                    Err(e) => Err(Failure::Transient(AlertsError::channel(format!("SMTP send failed: {e}")))),
                }
            })
            .await
    }

    /// Open a connection and authenticate without sending anything.
    pub async fn test_connection(&self) -> Result<()> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AlertsError::channel(format!(
                "SMTP server {}:{} did not accept the connection",
                self.host, self.port
            ))),
            Err(e) => Err(AlertsError::channel(format!("SMTP connection failed: {e}"))),
        }
    }
}

/// Email notification channel.
pub struct EmailChannel {
    name: &'static str,
    mailer: Arc<SmtpMailer>,
    renderer: Arc<MessageRenderer>,
    logos: Option<Arc<LogoSet>>,
}

impl EmailChannel {
    /// The `email` channel: internal recipients, logos embedded.
    pub fn internal(
        mailer: Arc<SmtpMailer>,
        renderer: Arc<MessageRenderer>,
        logos: Arc<LogoSet>,
    ) -> Self {
        Self {
            name: "email",
            mailer,
            renderer,
            logos: Some(logos),
        }
    }

    /// The `teams_email` channel: a Teams channel mailbox, plain branding.
    pub fn teams_mailbox(mailer: Arc<SmtpMailer>, renderer: Arc<MessageRenderer>) -> Self {
        Self {
            name: "teams_email",
            mailer,
            renderer,
            logos: None,
        }
    }

    /// Build the multipart message for one event.
    pub fn build_message(&self, event: &Event, audience: &Audience) -> Result<Message> {
        if audience.recipients.is_empty() {
            return Err(AlertsError::ChannelNotConfigured(format!(
                "{}: no recipients for audience '{}'",
                self.name, audience.name
            )));
        }

        let now = Utc::now();
        let logos = self.logos.as_deref().filter(|l| !l.is_empty());
        let refs = logos
            .map(|l| LogoRefs {
                company: l.company.is_some(),
                st_company: l.st_company.is_some(),
            })
            .unwrap_or_default();

        let mut builder = Message::builder()
            .from(self.mailer.sender().clone())
            .subject(self.renderer.subject(event));
        for recipient in &audience.recipients {
            let mailbox: Mailbox = recipient.parse().map_err(|e| {
                AlertsError::channel(format!("invalid recipient '{recipient}': {e}"))
            })?;
            builder = builder.to(mailbox);
        }

        let alternative = MultiPart::alternative_plain_html(
            self.renderer.plain_text(event, now),
            self.renderer.html(event, now, refs),
        );
        let body = match logos {
            Some(logos) => {
                let mut related = MultiPart::related().multipart(alternative);
                for logo in logos.iter() {
                    let content_type = ContentType::parse(logo.mime_type).map_err(|e| {
                        AlertsError::channel(format!("logo content type '{}': {e}", logo.mime_type))
                    })?;
                    related = related.singlepart(
                        Attachment::new_inline(logo.content_id.to_string())
                            .body(logo.bytes.clone(), content_type),
                    );
                }
                related
            }
            None => alternative,
        };

        builder
            .multipart(body)
            .map_err(|e| AlertsError::channel(format!("cannot build message: {e}")))
    }
}

#[async_trait]
impl NotifyChannel for EmailChannel {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(&self, event: &Event, audience: &Audience) -> Result<()> {
        let message = self.build_message(event, audience)?;
        self.mailer.deliver(message).await?;
        tracing::info!(
            event_id = %event.id,
            channel = self.name,
            "email sent to {} recipient(s)",
            audience.recipients.len()
        );
        Ok(())
    }
}
