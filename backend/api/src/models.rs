//! Core domain records of the enrollment funnel.
//!
//! ## Status as a finite-state machine
//!
//! A submission moves through a strict forward-only lifecycle:
//!
//! ```text
//! pending_review ──► awaiting_payment ──► pending ──► approved
//!       │                                  │    ▲
//!       ▼                                  ▼    │
//! project_rejected                       rejected
//! ```
//!
//! `approved` and `project_rejected` are terminal. `rejected` is not: a new
//! payment proof moves the submission back to `pending`.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Waiting for the admin to review the project proposal.
    PendingReview,
    /// Project accepted; waiting for the applicant's payment proof.
    AwaitingPayment,
    /// Payment proof received; waiting for admin verification.
    Pending,
    /// Payment verified; the applicant is a confirmed member.
    Approved,
    /// Payment proof rejected; the applicant may submit a new proof.
    Rejected,
    /// Project proposal rejected; no further transitions.
    ProjectRejected,
}

impl SubmissionStatus {
    /// Short identifier string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ProjectRejected => "project_rejected",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::ProjectRejected)
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn allows(&self, to: SubmissionStatus) -> bool {
        matches!(
            (self, to),
            (Self::PendingReview, Self::AwaitingPayment)
                | (Self::PendingReview, Self::ProjectRejected)
                | (Self::AwaitingPayment, Self::Pending)
                | (Self::Rejected, Self::Pending)
                | (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
        )
    }
}

/// How the applicant evidences payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum ProofMethod {
    /// An uploaded image of the payment confirmation.
    Screenshot,
    /// A digits-only transaction identifier.
    TransactionId,
}

impl ProofMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::TransactionId => "transaction-id",
        }
    }
}

/// One applicant's record, tracked through review and payment.
///
/// Wire names on the public surface stay aligned with the frontend contract
/// (`nom`, `projet`); the screenshot payload travels base64-encoded.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Submission {
    pub id: String,
    #[serde(rename = "nom")]
    pub name: String,
    pub email: String,
    pub whatsapp: String,
    #[serde(rename = "projet")]
    pub project: String,
    pub status: SubmissionStatus,
    #[serde(rename = "method", skip_serializing_if = "Option::is_none")]
    pub proof_method: Option<ProofMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    #[serde(rename = "proofMime", skip_serializing_if = "Option::is_none")]
    pub proof_mime: Option<String>,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(rename = "rejectReason", skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    pub created_at: i64,
}

/// A finalized, capacity-consuming enrollment.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Member {
    pub id: i64,
    #[serde(rename = "submissionId")]
    pub submission_id: String,
    #[serde(rename = "nom")]
    pub name: String,
    pub email: String,
    pub whatsapp: String,
    #[serde(rename = "projet")]
    pub project: String,
    pub confirmed_at: i64,
}

/// Access link handed to an approved member; append-only log.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GroupLink {
    pub id: i64,
    #[serde(rename = "submissionId")]
    pub submission_id: String,
    #[serde(rename = "nom")]
    pub name: String,
    pub email: String,
    pub link: String,
    pub created_at: i64,
}

/// Process-wide capacity and gating state (singleton row).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppConfig {
    pub max_places: i64,
    pub session_open: bool,
}

/// Human-readable UTC rendering of a stored unix timestamp.
pub fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_identifier() {
        for status in [
            SubmissionStatus::PendingReview,
            SubmissionStatus::AwaitingPayment,
            SubmissionStatus::Pending,
            SubmissionStatus::Approved,
            SubmissionStatus::Rejected,
            SubmissionStatus::ProjectRejected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn terminal_states_allow_nothing() {
        let all = [
            SubmissionStatus::PendingReview,
            SubmissionStatus::AwaitingPayment,
            SubmissionStatus::Pending,
            SubmissionStatus::Approved,
            SubmissionStatus::Rejected,
            SubmissionStatus::ProjectRejected,
        ];
        for terminal in [SubmissionStatus::Approved, SubmissionStatus::ProjectRejected] {
            assert!(terminal.is_terminal());
            for to in all {
                assert!(!terminal.allows(to));
            }
        }
    }
}
