//! Deliver stage — SMTP delivery via a recognized provider.
//!
//! The transport connects and verifies before sending; a failed
//! verification or send surfaces as a delivery error and becomes the
//! run's `failed` delivery record upstream.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use prdigest_core::config::SmtpConfig;
use prdigest_core::error::{DigestError, Result};
use prdigest_core::traits::DeliveryChannel;

use crate::render::render_html;

/// Map a provider name onto its SMTP relay. Unknown providers are a
/// validation error, caught at construction time.
fn relay_host(provider: &str) -> Result<&'static str> {
    match provider {
        "gmail" => Ok("smtp.gmail.com"),
        "zoho" => Ok("smtp.zoho.com"),
        other => Err(DigestError::Config(format!(
            "unknown SMTP provider '{other}' (expected gmail or zoho)"
        ))),
    }
}

pub struct EmailChannel {
    relay: &'static str,
    user: String,
    app_password: String,
    from_name: String,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let relay = relay_host(&config.provider)?;
        if config.user.is_empty() || config.app_password.is_empty() {
            return Err(DigestError::Config(
                "SMTP user and app password must be configured".into(),
            ));
        }
        Ok(Self {
            relay,
            user: config.user.clone(),
            app_password: config.app_password.clone(),
            from_name: config.from_name.clone(),
            timeout: Duration::from_secs(config.operation_timeout_secs),
        })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let creds = Credentials::new(self.user.clone(), self.app_password.clone());
        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(self.relay)
                .map_err(|e| DigestError::Delivery(format!("SMTP relay setup: {e}")))?
                .credentials(creds)
                .timeout(Some(self.timeout))
                .build(),
        )
    }

    fn build_message(&self, recipients: &[String], subject: &str, body: &str) -> Result<Message> {
        let from: Mailbox = format!("{} <{}>", self.from_name, self.user)
            .parse()
            .map_err(|e| DigestError::Delivery(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| DigestError::Delivery(format!("invalid recipient '{recipient}': {e}")))?;
            builder = builder.to(to);
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                body.to_string(),
                render_html(body),
            ))
            .map_err(|e| DigestError::Delivery(format!("message build failed: {e}")))
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    async fn deliver(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        if recipients.is_empty() {
            return Err(DigestError::Delivery("no recipients".into()));
        }
        let message = self.build_message(recipients, subject, body)?;
        let mailer = self.transport()?;

        // Connect and authenticate before committing to the send.
        let verified = mailer
            .test_connection()
            .await
            .map_err(|e| DigestError::Delivery(format!("SMTP verification failed: {e}")))?;
        if !verified {
            return Err(DigestError::Delivery("SMTP verification failed".into()));
        }

        mailer
            .send(message)
            .await
            .map_err(|e| DigestError::Delivery(format!("SMTP send failed: {e}")))?;

        tracing::info!(
            recipients = recipients.len(),
            subject,
            "📤 digest email sent"
        );
        Ok(())
    }
}
