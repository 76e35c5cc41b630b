//! The submission workflow — status state machine and capacity gate.
//!
//! Each operation runs as one logical unit of work: validate, mutate the
//! registries, then fire its notification. Notification and document failures
//! never roll back the mutation that triggered them.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Store;
use crate::errors::{ApiError, Result};
use crate::models::{ProofMethod, Submission, SubmissionStatus};
use crate::notify::{self, Applicant, Notification, Notifier};
use crate::pdf;

const MAX_PROOF_BYTES: usize = 10 * 1024 * 1024;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

// ─────────────────────────────────────────────────────────
// Capacity gate
// ─────────────────────────────────────────────────────────

/// Snapshot served by the capacity gate.
#[derive(Debug, Clone, Serialize)]
pub struct Capacity {
    pub count: i64,
    pub max: i64,
    pub available: bool,
    #[serde(rename = "sessionOpen")]
    pub session_open: bool,
}

/// Current member count against the configured maximum.
pub async fn check_capacity(store: &Store) -> Result<Capacity> {
    let config = store.config().await?;
    let count = store.member_count().await?;
    Ok(Capacity {
        count,
        max: config.max_places,
        available: count < config.max_places,
        session_open: config.session_open,
    })
}

// ─────────────────────────────────────────────────────────
// Input shapes and validation
// ─────────────────────────────────────────────────────────

/// Applicant input for `submit`, as received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubmission {
    #[serde(rename = "nom")]
    pub name: String,
    pub email: String,
    pub whatsapp: String,
    #[serde(rename = "projet")]
    pub project: String,
}

/// Proof payload as extracted from the upload.
#[derive(Debug)]
pub struct ProofSubmission {
    pub method: ProofMethod,
    /// Raw screenshot bytes with their mime type.
    pub file: Option<(Vec<u8>, String)>,
    pub transaction_id: Option<String>,
}

/// Trim, strip markup-significant characters, cap length.
fn sanitize_with(input: &str, max_chars: usize) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .take(max_chars)
        .collect()
}

fn sanitize(input: &str) -> String {
    sanitize_with(input, 500)
}

fn validation(message: &str) -> ApiError {
    ApiError::Validation(message.to_string())
}

// ─────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────

/// Create a submission in `pending_review`.
///
/// The session and capacity gates run before field validation: a closed
/// session or a full registry rejects the request no matter what the fields
/// contain.
pub async fn submit(
    store: &Store,
    notifier: &Arc<dyn Notifier>,
    input: NewSubmission,
) -> Result<Submission> {
    let capacity = check_capacity(store).await?;
    if !capacity.session_open {
        return Err(ApiError::SessionClosed);
    }
    if !capacity.available {
        return Err(ApiError::CapacityExceeded);
    }

    let name = sanitize(&input.name);
    let email = sanitize(&input.email);
    let whatsapp = sanitize(&input.whatsapp);
    let project = sanitize_with(&input.project, 1000);

    if name.chars().count() < 3 {
        return Err(validation("name must be at least 3 characters"));
    }
    if email.len() > 100 || !EMAIL_RE.is_match(&email) {
        return Err(validation("invalid email address"));
    }
    if whatsapp.len() != 10 || !whatsapp.chars().all(|c| c.is_ascii_digit()) {
        return Err(validation("whatsapp number must be exactly 10 digits"));
    }
    let project_len = project.chars().count();
    if !(20..=1000).contains(&project_len) {
        return Err(validation(
            "project description must be between 20 and 1000 characters",
        ));
    }

    let submission = Submission {
        id: Uuid::new_v4().to_string(),
        name,
        email,
        whatsapp,
        project,
        status: SubmissionStatus::PendingReview,
        proof_method: None,
        proof: None,
        proof_mime: None,
        transaction_id: None,
        reject_reason: None,
        created_at: Utc::now().timestamp(),
    };
    store.insert_submission(&submission).await?;

    notify::dispatch(
        notifier.clone(),
        Notification::SubmissionReceived {
            applicant: applicant_of(&submission),
            id: submission.id.clone(),
        },
    );
    Ok(submission)
}

/// `pending_review → awaiting_payment`; sends payment instructions.
pub async fn approve_project(
    store: &Store,
    notifier: &Arc<dyn Notifier>,
    id: &str,
) -> Result<Submission> {
    let submission = require(store, id).await?;
    require_status(&submission, SubmissionStatus::PendingReview)?;

    store.set_status(id, SubmissionStatus::AwaitingPayment).await?;

    notify::dispatch(
        notifier.clone(),
        Notification::ProjectApproved {
            applicant: applicant_of(&submission),
            id: submission.id.clone(),
        },
    );
    Ok(Submission {
        status: SubmissionStatus::AwaitingPayment,
        ..submission
    })
}

/// `pending_review → project_rejected` (terminal); notifies with the reason.
pub async fn reject_project(
    store: &Store,
    notifier: &Arc<dyn Notifier>,
    id: &str,
    reason: Option<String>,
) -> Result<Submission> {
    let submission = require(store, id).await?;
    require_status(&submission, SubmissionStatus::PendingReview)?;

    let reason = reason
        .map(|r| sanitize(&r))
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "the project proposal does not fit the current program".to_string());

    store
        .set_status_with_reason(id, SubmissionStatus::ProjectRejected, &reason)
        .await?;

    notify::dispatch(
        notifier.clone(),
        Notification::ProjectRejected {
            applicant: applicant_of(&submission),
            reason: reason.clone(),
        },
    );
    Ok(Submission {
        status: SubmissionStatus::ProjectRejected,
        reject_reason: Some(reason),
        ..submission
    })
}

/// `awaiting_payment | rejected → pending`.
///
/// The payload is validated before any state is touched. Capacity is
/// deliberately not checked here: the final approval step is the single
/// point that consumes a slot.
pub async fn submit_payment_proof(
    store: &Store,
    notifier: &Arc<dyn Notifier>,
    id: &str,
    proof: ProofSubmission,
) -> Result<Submission> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let (proof_b64, proof_mime, transaction_id) = match proof.method {
        ProofMethod::Screenshot => {
            if proof.transaction_id.is_some() {
                return Err(validation("provide exactly one form of proof"));
            }
            let Some((bytes, mime)) = proof.file else {
                return Err(validation("a payment screenshot is required"));
            };
            if bytes.is_empty() {
                return Err(validation("the screenshot file is empty"));
            }
            if bytes.len() > MAX_PROOF_BYTES {
                return Err(validation("the screenshot exceeds the 10 MB limit"));
            }
            (Some(BASE64.encode(&bytes)), Some(mime), None)
        }
        ProofMethod::TransactionId => {
            if proof.file.is_some() {
                return Err(validation("provide exactly one form of proof"));
            }
            let Some(tx) = proof.transaction_id else {
                return Err(validation("a transaction id is required"));
            };
            let tx = tx.trim().to_string();
            if tx.is_empty() || !tx.chars().all(|c| c.is_ascii_digit()) {
                return Err(validation("transaction id must contain digits only"));
            }
            (None, None, Some(tx))
        }
    };

    let submission = require(store, id).await?;
    if !matches!(
        submission.status,
        SubmissionStatus::AwaitingPayment | SubmissionStatus::Rejected
    ) {
        return Err(ApiError::InvalidState {
            actual: submission.status.as_str(),
        });
    }

    store
        .attach_proof(
            id,
            proof.method,
            proof_b64,
            proof_mime,
            transaction_id,
            SubmissionStatus::Pending,
        )
        .await?;

    notify::dispatch(
        notifier.clone(),
        Notification::PaymentProofReceived {
            applicant: applicant_of(&submission),
            id: submission.id.clone(),
            method: proof.method,
        },
    );
    require(store, id).await
}

/// `pending → approved`: the capacity-consuming step.
///
/// The status re-check, the capacity re-check and the member insert commit as
/// one transaction; the acceptance document and the email run afterwards and
/// are best-effort.
pub async fn approve_payment(
    store: &Store,
    notifier: &Arc<dyn Notifier>,
    config: &Config,
    id: &str,
    group_link: Option<String>,
) -> Result<(Submission, i64)> {
    let group_link = group_link
        .map(|link| link.trim().to_string())
        .filter(|link| !link.is_empty());

    let now = Utc::now();
    let (submission, count) = store
        .approve_submission(id, group_link.as_deref(), now.timestamp())
        .await?;

    let document = match pdf::acceptance_document(
        &config.program_name,
        &submission.name,
        &submission.email,
        &submission.whatsapp,
        now,
    ) {
        Ok(bytes) => {
            pdf::archive_copy(&config.archive_dir, &submission.name, &bytes).await;
            Some(bytes)
        }
        Err(e) => {
            warn!("acceptance document generation failed: {e}");
            None
        }
    };

    notify::dispatch(
        notifier.clone(),
        Notification::PaymentApproved {
            applicant: applicant_of(&submission),
            group_link,
            document,
        },
    );
    Ok((submission, count))
}

/// `pending → rejected`; the applicant may submit a new proof.
pub async fn reject_payment(
    store: &Store,
    notifier: &Arc<dyn Notifier>,
    id: &str,
) -> Result<Submission> {
    let submission = require(store, id).await?;
    require_status(&submission, SubmissionStatus::Pending)?;

    store.set_status(id, SubmissionStatus::Rejected).await?;

    notify::dispatch(
        notifier.clone(),
        Notification::PaymentRejected {
            applicant: applicant_of(&submission),
        },
    );
    Ok(Submission {
        status: SubmissionStatus::Rejected,
        ..submission
    })
}

// ─────────────────────────────────────────────────────────
// Capacity administration
// ─────────────────────────────────────────────────────────

/// Admin action against the configured capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacesAction {
    Increment,
    Decrement,
    Reset,
    Set,
}

/// Apply a capacity action; any result below one place is rejected.
pub async fn update_places(
    store: &Store,
    default_max_places: i64,
    action: PlacesAction,
    max_places: Option<i64>,
) -> Result<i64> {
    let mut config = store.config().await?;

    let new_max = match action {
        PlacesAction::Increment | PlacesAction::Decrement => {
            let step = max_places.unwrap_or(1);
            if step < 1 {
                return Err(validation("maxPlaces must be a positive step"));
            }
            match action {
                PlacesAction::Increment => config.max_places + step,
                _ => config.max_places - step,
            }
        }
        PlacesAction::Reset => default_max_places,
        PlacesAction::Set => {
            max_places.ok_or_else(|| validation("maxPlaces is required for set"))?
        }
    };

    if new_max < 1 {
        return Err(validation("maxPlaces must stay at least 1"));
    }

    config.max_places = new_max;
    store.save_config(&config).await?;
    Ok(new_max)
}

/// Flip the enrollment-session flag; returns the new state.
pub async fn toggle_session(store: &Store) -> Result<bool> {
    let mut config = store.config().await?;
    config.session_open = !config.session_open;
    store.save_config(&config).await?;
    Ok(config.session_open)
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

async fn require(store: &Store, id: &str) -> Result<Submission> {
    store
        .submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown submission: {id}")))
}

fn require_status(submission: &Submission, expected: SubmissionStatus) -> Result<()> {
    if submission.status != expected {
        return Err(ApiError::InvalidState {
            actual: submission.status.as_str(),
        });
    }
    Ok(())
}

fn applicant_of(submission: &Submission) -> Applicant {
    Applicant {
        name: submission.name.clone(),
        email: submission.email.clone(),
        whatsapp: submission.whatsapp.clone(),
        project: submission.project.clone(),
    }
}
