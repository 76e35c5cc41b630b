//! Notification gateway — templated transactional email on state transitions.
//!
//! Sends are best-effort by contract: they run after the state mutation has
//! committed, and a failure is logged, never surfaced to the client. The
//! concrete adapter is picked at startup: Resend when an API key is
//! configured, a log-only stand-in otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::ProofMethod;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email api returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Contact fields every template needs about the applicant.
#[derive(Debug, Clone)]
pub struct Applicant {
    pub name: String,
    pub email: String,
    pub whatsapp: String,
    pub project: String,
}

/// One templated message per workflow transition.
#[derive(Debug)]
pub enum Notification {
    /// To the admin: a new submission awaits project review.
    SubmissionReceived { applicant: Applicant, id: String },
    /// To the applicant: project accepted; payment instructions with the
    /// submission id as the payment-continuation reference.
    ProjectApproved { applicant: Applicant, id: String },
    /// To the applicant: project rejected, with the reason.
    ProjectRejected { applicant: Applicant, reason: String },
    /// To the admin: a payment proof awaits verification.
    PaymentProofReceived {
        applicant: Applicant,
        id: String,
        method: ProofMethod,
    },
    /// To the applicant: enrollment confirmed; acceptance document attached,
    /// group link included when available.
    PaymentApproved {
        applicant: Applicant,
        group_link: Option<String>,
        document: Option<Vec<u8>>,
    },
    /// To the applicant: proof rejected; a new proof may be submitted.
    PaymentRejected { applicant: Applicant },
}

impl Notification {
    /// Short identifier used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubmissionReceived { .. } => "submission_received",
            Self::ProjectApproved { .. } => "project_approved",
            Self::ProjectRejected { .. } => "project_rejected",
            Self::PaymentProofReceived { .. } => "payment_proof_received",
            Self::PaymentApproved { .. } => "payment_approved",
            Self::PaymentRejected { .. } => "payment_rejected",
        }
    }

}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Fire a notification without blocking the response. Failures are logged
/// only; the state transition that triggered the send has already committed.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        let kind = notification.kind();
        if let Err(e) = notifier.notify(notification).await {
            warn!("{kind} notification failed: {e}");
        }
    });
}

// ─────────────────────────────────────────────────────────
// Resend adapter
// ─────────────────────────────────────────────────────────

struct Message {
    to: String,
    subject: String,
    html: String,
    /// `(filename, base64 content)` of a PDF attachment.
    attachment: Option<(String, String)>,
}

/// Sends through the Resend HTTP API.
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
    admin_email: Option<String>,
    program: String,
}

impl ResendNotifier {
    pub fn new(
        api_key: String,
        from: String,
        admin_email: Option<String>,
        program: String,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            from,
            admin_email,
            program,
        })
    }

    /// Render the message, or `None` when it is admin-bound and no admin
    /// address is configured.
    fn render(&self, notification: &Notification) -> Option<Message> {
        let program = &self.program;
        match notification {
            Notification::SubmissionReceived { applicant, id } => {
                Some(Message {
                    to: self.admin_email.clone()?,
                    subject: format!("[{program}] New submission from {}", applicant.name),
                    html: format!(
                        "<h2>New submission awaiting project review</h2>\
                         <ul>\
                           <li><b>Name:</b> {}</li>\
                           <li><b>Email:</b> {}</li>\
                           <li><b>WhatsApp:</b> {}</li>\
                           <li><b>Project:</b> {}</li>\
                           <li><b>Submission id:</b> <code>{id}</code></li>\
                         </ul>\
                         <p>Open the admin dashboard to approve or reject the project.</p>",
                        applicant.name, applicant.email, applicant.whatsapp, applicant.project,
                    ),
                    attachment: None,
                })
            }
            Notification::ProjectApproved { applicant, id } => Some(Message {
                to: applicant.email.clone(),
                subject: format!("Your {program} project has been accepted"),
                html: format!(
                    "<h2>Good news, {}!</h2>\
                     <p>Your project has been reviewed and accepted. To secure your place, \
                     please complete the payment and submit your proof of payment on the site.</p>\
                     <p><b>Your payment reference:</b> <code>{id}</code><br>\
                     Keep this reference — you will need it when submitting your proof.</p>\
                     <p>Your place is only confirmed once the payment has been verified.</p>",
                    applicant.name,
                ),
                attachment: None,
            }),
            Notification::ProjectRejected { applicant, reason } => Some(Message {
                to: applicant.email.clone(),
                subject: format!("About your {program} application"),
                html: format!(
                    "<h2>Hello {},</h2>\
                     <p>Thank you for your interest. After reviewing your project proposal, \
                     we are unable to accept it this time.</p>\
                     <p><b>Reason:</b> {reason}</p>\
                     <p>You are welcome to apply again in a future session.</p>",
                    applicant.name,
                ),
                attachment: None,
            }),
            Notification::PaymentProofReceived {
                applicant,
                id,
                method,
            } => Some(Message {
                to: self.admin_email.clone()?,
                subject: format!("[{program}] Payment proof from {}", applicant.name),
                html: format!(
                    "<h2>Payment awaiting verification</h2>\
                     <ul>\
                       <li><b>Name:</b> {}</li>\
                       <li><b>Email:</b> {}</li>\
                       <li><b>Method:</b> {}</li>\
                       <li><b>Submission id:</b> <code>{id}</code></li>\
                     </ul>\
                     <p>Review the proof in the admin dashboard and approve or reject it.</p>",
                    applicant.name,
                    applicant.email,
                    method.as_str(),
                ),
                attachment: None,
            }),
            Notification::PaymentApproved {
                applicant,
                group_link,
                document,
            } => {
                let link_section = match group_link {
                    Some(link) => format!(
                        "<p><b>Private group access:</b> \
                         <a href=\"{link}\">join the {program} group</a></p>"
                    ),
                    None => "<p>Access instructions for the private group will follow \
                             in a separate email.</p>"
                        .to_string(),
                };
                Some(Message {
                    to: applicant.email.clone(),
                    subject: format!("Welcome to {program} — your enrollment is confirmed"),
                    html: format!(
                        "<h2>Welcome, {}!</h2>\
                         <p>Your payment has been verified and your enrollment is confirmed.</p>\
                         {link_section}\
                         <p>Your signed acceptance terms are attached for your records.</p>",
                        applicant.name,
                    ),
                    attachment: document.as_ref().map(|bytes| {
                        (
                            format!("acceptance_{}.pdf", applicant.name.replace(' ', "_")),
                            BASE64.encode(bytes),
                        )
                    }),
                })
            }
            Notification::PaymentRejected { applicant } => Some(Message {
                to: applicant.email.clone(),
                subject: format!("Your {program} payment proof was rejected"),
                html: format!(
                    "<h2>Hello {},</h2>\
                     <p>We reviewed your proof of payment but could not verify it.</p>\
                     <ul>\
                       <li>Make sure a screenshot is clear and readable</li>\
                       <li>Make sure a transaction id contains digits only</li>\
                     </ul>\
                     <p>You can submit a new proof of payment on the site at any time.</p>",
                    applicant.name,
                ),
                attachment: None,
            }),
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let Some(message) = self.render(&notification) else {
            warn!(
                "{} notification skipped: ADMIN_EMAIL not configured",
                notification.kind()
            );
            return Ok(());
        };

        let mut payload = json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
        });
        if let Some((filename, content)) = &message.attachment {
            payload["attachments"] = json!([{
                "filename": filename,
                "type": "application/pdf",
                "content": content,
            }]);
        }

        let response = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api { status, body });
        }

        info!("{} email sent to {}", notification.kind(), message.to);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Log-only adapter
// ─────────────────────────────────────────────────────────

/// Stand-in used when no email provider is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        warn!(
            "email not configured; dropping {} notification",
            notification.kind()
        );
        Ok(())
    }
}
