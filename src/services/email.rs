use crate::config::{RoutingConfig, SmtpConfig};
use crate::domain::models::FeedbackRecord;
use crate::services::export::format_msk;
use crate::services::notifications::{needs_team_alert, Notifier};
use crate::services::telegram::escape_html;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn confirmation_email(record: &FeedbackRecord, to: &str) -> EmailContent {
    let created = format_msk(record.created_at);
    let high_note = if needs_team_alert(record) {
        "Your report is marked as high urgency. The team has been notified and will contact you shortly."
    } else {
        ""
    };

    let html = format!(
        "<html><body>\
         <h2>Thank you for your feedback!</h2>\
         <p>We have received your report and will review it.</p>\
         <ul>\
         <li><strong>ID:</strong> {id}</li>\
         <li><strong>Form:</strong> {form}</li>\
         <li><strong>Urgency:</strong> {urgency}</li>\
         <li><strong>Received:</strong> {created} MSK</li>\
         </ul>\
         {note}\
         <p>Kind regards,<br>Support team</p>\
         </body></html>",
        id = record.id,
        form = record.form_type.title(),
        urgency = record.urgency.as_str(),
        created = created,
        note = if high_note.is_empty() {
            String::new()
        } else {
            format!("<p><strong>{}</strong></p>", high_note)
        },
    );
    let text = format!(
        "Thank you for your feedback!\n\n\
         We have received your report and will review it.\n\n\
         ID: {}\nForm: {}\nUrgency: {}\nReceived: {} MSK\n\n{}{}\
         Kind regards,\nSupport team\n",
        record.id,
        record.form_type.title(),
        record.urgency.as_str(),
        created,
        high_note,
        if high_note.is_empty() { "" } else { "\n\n" },
    );

    EmailContent {
        to: to.to_string(),
        subject: format!("Your feedback #{} has been received", record.id),
        html,
        text,
    }
}

pub fn team_alert_email(record: &FeedbackRecord, routing: &RoutingConfig, admin_base_url: &str) -> EmailContent {
    let link = format!(
        "{}/api/admin/feedbacks/{}",
        admin_base_url.trim_end_matches('/'),
        record.id
    );
    let created = format_msk(record.created_at);
    let client = record.client_name.as_deref().unwrap_or("not provided");
    let email = record.client_email.as_deref().unwrap_or("not provided");

    let html = format!(
        "<html><body style=\"font-family: Arial, sans-serif;\">\
         <h2 style=\"color: #dc3545;\">{emoji} HIGH URGENCY FEEDBACK</h2>\
         <p>Needs immediate attention.</p>\
         <table>\
         <tr><td><strong>ID:</strong></td><td>{id}</td></tr>\
         <tr><td><strong>From:</strong></td><td>{role}</td></tr>\
         <tr><td><strong>Urgency:</strong></td><td>{urgency} ({reason})</td></tr>\
         <tr><td><strong>Client:</strong></td><td>{client}</td></tr>\
         <tr><td><strong>Email:</strong></td><td>{email}</td></tr>\
         <tr><td><strong>Received:</strong></td><td>{created} MSK</td></tr>\
         </table>\
         <h3>Message</h3><div>{problem}</div>\
         <p><a href=\"{link}\">Open in admin</a></p>\
         </body></html>",
        emoji = record.urgency.emoji(),
        id = record.id,
        role = record.form_type.role_name(),
        urgency = record.urgency.as_str(),
        reason = escape_html(&record.urgency_reason),
        client = escape_html(client),
        email = escape_html(email),
        created = created,
        problem = escape_html(&record.problem_text),
        link = link,
    );
    let text = format!(
        "HIGH URGENCY FEEDBACK - needs immediate attention\n\n\
         ID: {}\nFrom: {}\nUrgency: {} ({})\nClient: {}\nEmail: {}\nReceived: {} MSK\n\n\
         Message:\n{}\n\nOpen in admin: {}\n",
        record.id,
        record.form_type.role_name(),
        record.urgency.as_str(),
        record.urgency_reason,
        client,
        email,
        created,
        record.problem_text,
        link,
    );

    EmailContent {
        to: routing.recipient_for(record.form_type).to_string(),
        subject: format!(
            "{} High urgency feedback from {} - ID: {}",
            record.urgency.emoji(),
            record.form_type.role_name(),
            record.id
        ),
        html,
        text,
    }
}

/// Everything a record should trigger by email.
pub fn emails_for(record: &FeedbackRecord, routing: &RoutingConfig, admin_base_url: &str) -> Vec<EmailContent> {
    let mut out = Vec::new();
    if needs_team_alert(record) {
        out.push(team_alert_email(record, routing, admin_base_url));
    }
    if let Some(to) = record.client_email.as_deref().filter(|e| !e.trim().is_empty()) {
        out.push(confirmation_email(record, to.trim()));
    }
    out
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    routing: RoutingConfig,
    admin_base_url: String,
}

impl EmailNotifier {
    pub fn new(smtp: &SmtpConfig, routing: RoutingConfig, admin_base_url: &str) -> Result<Self> {
        // 465 is implicit TLS, everything else upgrades with STARTTLS.
        let relay = if smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        };
        let transport = relay
            .with_context(|| format!("Invalid SMTP host {}", smtp.host))?
            .port(smtp.port)
            .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
            .build();
        let from = smtp
            .from_email
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid FROM_EMAIL {}", smtp.from_email))?;

        Ok(Self {
            transport,
            from,
            routing,
            admin_base_url: admin_base_url.to_string(),
        })
    }

    async fn send(&self, email: &EmailContent) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse::<Mailbox>().with_context(|| format!("Invalid recipient {}", email.to))?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))?;
        self.transport.send(message).await?;
        Ok(())
    }

    pub async fn test_connection(&self) -> Result<bool> {
        Ok(self.transport.test_connection().await?)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, record: &FeedbackRecord) -> Result<()> {
        let mut first_error = None;
        for email in emails_for(record, &self.routing, &self.admin_base_url) {
            match self.send(&email).await {
                Ok(()) => tracing::info!("Email '{}' sent for feedback {}", email.subject, record.id),
                Err(e) => {
                    tracing::error!("Failed to send email to {}: {:#}", email.to, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
