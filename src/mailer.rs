use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::html::escape;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Sends mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
            .context("smtp relay")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        Ok(Self {
            transport,
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse().context("invalid from address")?)
            .to(email.to.parse().context("invalid to address")?)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html)
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        Ok(())
    }
}

/// Used when SMTP is not configured: the message is only logged.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, "email (smtp not configured)");
        Ok(())
    }
}

/// Fire-and-forget delivery; failures are logged, never returned.
pub fn dispatch(mailer: &Arc<dyn Mailer>, email: Email) {
    let mailer = Arc::clone(mailer);
    tokio::spawn(async move {
        let to = email.to.clone();
        if let Err(e) = mailer.send(email).await {
            warn!(error = %e, %to, "email delivery failed");
        }
    });
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>{title}</title></head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #1f2937;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #0e7490;">{title}</h2>
    {body}
  </div>
</body>
</html>"#
    )
}

pub fn verification_email(to: &str, name: &str, link: &str) -> Email {
    let (name, link) = (escape(name), escape(link));
    Email {
        to: to.to_string(),
        subject: "Verify your HullCheck account".into(),
        html: layout(
            "Verify your email",
            &format!(
                r#"<p>Hi {name},</p>
    <p>Confirm your address to start booking inspections. The link is valid for 24 hours.</p>
    <p><a href="{link}">{link}</a></p>"#
            ),
        ),
    }
}

pub fn assignment_email(to: &str, boat_name: &str, technician_name: &str) -> Email {
    let technician_name = escape(technician_name);
    let boat = escape(boat_name);
    Email {
        to: to.to_string(),
        subject: format!("Technician assigned to {boat_name}"),
        html: layout(
            "Your inspection is confirmed",
            &format!("<p>{technician_name} will inspect <strong>{boat}</strong>.</p>"),
        ),
    }
}

pub fn completion_email(to: &str, boat_name: &str) -> Email {
    let boat = escape(boat_name);
    Email {
        to: to.to_string(),
        subject: format!("Inspection of {boat_name} completed"),
        html: layout(
            "Inspection completed",
            &format!(
                "<p>The inspection of <strong>{boat}</strong> is complete. \
                 You can now rate the technician.</p>"
            ),
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_email_contains_link() {
        let email = verification_email("a@b.io", "Ana", "https://x/verify/tok");
        assert_eq!(email.to, "a@b.io");
        assert!(email.html.contains("https://x/verify/tok"));
        assert!(email.html.contains("Ana"));
    }

    #[test]
    fn user_supplied_names_are_escaped() {
        let email = assignment_email("c@b.io", "Boat", "<img src=x onerror=alert(1)>");
        assert!(!email.html.contains("<img"));
        assert!(email.html.contains("&lt;img src=x onerror=alert(1)&gt;"));

        let email = completion_email("c@b.io", "<b>Sea</b>");
        assert!(email.html.contains("&lt;b&gt;Sea&lt;/b&gt;"));

        let email = verification_email("c@b.io", "<script>x</script>", "https://x/v/t");
        assert!(!email.html.contains("<script>"));
    }

    #[tokio::test]
    async fn log_mailer_never_fails() {
        let mailer = LogMailer;
        mailer
            .send(completion_email("a@b.io", "Sea Breeze"))
            .await
            .unwrap();
    }
}
