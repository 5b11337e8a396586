//! Email Service
//!
//! SMTP-based delivery for the lifecycle notifications: export ready,
//! deletion scheduled (carrying the recovery code), deletion completed.

use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;

/// Email service for sending transactional emails via SMTP.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: Mailbox,
}

impl EmailService {
    /// Create a new email service from server configuration.
    ///
    /// Requires SMTP to be configured (`config.has_smtp()` must be true).
    pub fn new(config: &Config) -> Result<Self> {
        let host = config.smtp_host.as_ref().context("SMTP_HOST is required")?;
        let from = config.smtp_from.as_ref().context("SMTP_FROM is required")?;

        let from_address: Mailbox = from
            .parse()
            .context("SMTP_FROM is not a valid email address")?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("Failed to create SMTP transport")?
            .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from_address,
        })
    }

    async fn send(&self, to_email: &str, subject: &str, body: String) -> Result<()> {
        let to_mailbox: Mailbox = to_email
            .parse()
            .context("Invalid recipient email address")?;

        let email = Message::builder()
            .from(self.from_address.clone())
            .to(to_mailbox)
            .subject(subject)
            .body(body)
            .context("Failed to build email message")?;

        self.mailer
            .send(email)
            .await
            .context("Failed to send email via SMTP")?;

        Ok(())
    }

    /// Notify the user their data export is ready for download.
    pub async fn send_export_ready(&self, to_email: &str, download_url: &str) -> Result<()> {
        let body = format!(
            "Your data export is ready.\n\
             \n\
             Download it here: {download_url}\n\
             \n\
             The link expires in 7 days. If you did not request an export,\n\
             please review your account security.\n"
        );
        self.send(to_email, "Your data export is ready", body).await
    }

    /// Notify the user a deletion was scheduled, including the recovery code
    /// that cancels it.
    pub async fn send_deletion_scheduled(
        &self,
        to_email: &str,
        scheduled_for: &str,
        recovery_code: &str,
    ) -> Result<()> {
        let body = format!(
            "Your account is scheduled for permanent deletion on {scheduled_for}.\n\
             \n\
             If you change your mind, use this recovery code on the account\n\
             recovery page to cancel the deletion:\n\
             \n\
             {recovery_code}\n\
             \n\
             If you did not request this, recover your account now and contact\n\
             support.\n"
        );
        self.send(to_email, "Account deletion scheduled", body).await
    }

    /// Confirm a deletion has completed, pointing at the certificate.
    pub async fn send_deletion_complete(
        &self,
        to_email: &str,
        certificate_id: &str,
    ) -> Result<()> {
        let body = format!(
            "Your account and associated data have been permanently deleted.\n\
             \n\
             Deletion certificate: {certificate_id}\n\
             \n\
             You can verify the certificate at any time on the public\n\
             certificate validation page.\n"
        );
        self.send(to_email, "Account deletion completed", body).await
    }
}
