//! Workflow tests against an in-memory store and a recording notifier.

use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::db::Store;
use crate::errors::ApiError;
use crate::invariants;
use crate::models::{ProofMethod, Submission, SubmissionStatus};
use crate::notify::{Notification, Notifier, NotifyError};
use crate::workflow::{self, NewSubmission, PlacesAction, ProofSubmission};

/// Records every notification kind instead of sending anything.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<&'static str>>,
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.kind());
        Ok(())
    }
}

struct Ctx {
    store: Store,
    recorder: Arc<RecordingNotifier>,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

async fn setup() -> Ctx {
    let store = Store::open("sqlite::memory:").await.unwrap();
    store.seed_config(5).await.unwrap();
    let recorder = Arc::new(RecordingNotifier::default());
    let notifier: Arc<dyn Notifier> = recorder.clone();
    Ctx {
        store,
        recorder,
        notifier,
        config: test_config(),
    }
}

fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        admin_password: "test".to_string(),
        admin_email: None,
        resend_api_key: None,
        email_from: "noreply@example.com".to_string(),
        program_name: "Test Program".to_string(),
        archive_dir: std::env::temp_dir()
            .join("enrollment-workflow-test-archive")
            .to_string_lossy()
            .into_owned(),
        default_max_places: 5,
    }
}

fn valid_input() -> NewSubmission {
    NewSubmission {
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        whatsapp: "0612345678".to_string(),
        project: "A study group around building small analytical engines".to_string(),
    }
}

fn transaction_proof(id: &str) -> ProofSubmission {
    ProofSubmission {
        method: ProofMethod::TransactionId,
        file: None,
        transaction_id: Some(id.to_string()),
    }
}

fn screenshot_proof(bytes: &[u8]) -> ProofSubmission {
    ProofSubmission {
        method: ProofMethod::Screenshot,
        file: Some((bytes.to_vec(), "image/png".to_string())),
        transaction_id: None,
    }
}

/// Drive one submission from creation to a confirmed member.
async fn enroll(ctx: &Ctx, input: NewSubmission) -> Submission {
    let submission = workflow::submit(&ctx.store, &ctx.notifier, input).await.unwrap();
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("12345678901"),
    )
    .await
    .unwrap();
    let (approved, _) = workflow::approve_payment(
        &ctx.store,
        &ctx.notifier,
        &ctx.config,
        &submission.id,
        None,
    )
    .await
    .unwrap();
    approved
}

/// Let spawned notification tasks run to completion.
async fn drain() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ─────────────────────────────────────────────────────────
// The happy path
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn round_trip_yields_exactly_one_matching_member() {
    let ctx = setup().await;

    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::PendingReview);

    invariants::assert_valid_transition(
        SubmissionStatus::PendingReview,
        SubmissionStatus::AwaitingPayment,
    );
    let s = workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    assert_eq!(s.status, SubmissionStatus::AwaitingPayment);

    let s = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("12345678901"),
    )
    .await
    .unwrap();
    assert_eq!(s.status, SubmissionStatus::Pending);
    assert_eq!(s.transaction_id.as_deref(), Some("12345678901"));

    let (approved, count) = workflow::approve_payment(
        &ctx.store,
        &ctx.notifier,
        &ctx.config,
        &submission.id,
        Some("https://chat.example.com/invite".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(approved.status, SubmissionStatus::Approved);
    assert_eq!(count, 1);
    invariants::assert_capacity_respected(count, 5);

    let members = ctx.store.list_members().await.unwrap();
    assert_eq!(members.len(), 1);
    let member = &members[0];
    assert_eq!(member.name, "Ada Lovelace");
    assert_eq!(member.email, "ada@example.com");
    assert_eq!(member.whatsapp, "0612345678");
    assert_eq!(member.project, submission.project);
    assert_eq!(member.submission_id, submission.id);

    let links = ctx.store.list_group_links().await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].link, "https://chat.example.com/invite");

    drain().await;
    let mut sent = ctx.recorder.kinds();
    sent.sort_unstable();
    assert_eq!(
        sent,
        vec![
            "payment_approved",
            "payment_proof_received",
            "project_approved",
            "submission_received",
        ],
    );
}

// ─────────────────────────────────────────────────────────
// Gates on submit
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_session_rejects_submissions_regardless_of_fields() {
    let ctx = setup().await;
    let open = workflow::toggle_session(&ctx.store).await.unwrap();
    assert!(!open);

    // Fields are deliberately invalid: the gate must still answer first.
    let garbage = NewSubmission {
        name: "x".to_string(),
        email: "not-an-email".to_string(),
        whatsapp: "abc".to_string(),
        project: "short".to_string(),
    };
    let err = workflow::submit(&ctx.store, &ctx.notifier, garbage)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::SessionClosed));

    assert!(workflow::toggle_session(&ctx.store).await.unwrap());
}

#[tokio::test]
async fn full_registry_rejects_submissions() {
    let ctx = setup().await;
    workflow::update_places(&ctx.store, 5, PlacesAction::Set, Some(1))
        .await
        .unwrap();
    enroll(&ctx, valid_input()).await;

    let err = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::CapacityExceeded));
}

#[tokio::test]
async fn field_validation_rejects_before_any_insert() {
    let ctx = setup().await;

    let cases = [
        NewSubmission {
            name: "Al".to_string(),
            ..valid_input()
        },
        NewSubmission {
            email: "nope".to_string(),
            ..valid_input()
        },
        NewSubmission {
            whatsapp: "12345".to_string(),
            ..valid_input()
        },
        NewSubmission {
            project: "too short".to_string(),
            ..valid_input()
        },
    ];
    for input in cases {
        let err = workflow::submit(&ctx.store, &ctx.notifier, input)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    assert!(ctx.store.list_submissions().await.unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────
// Project review
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_submission_is_not_found() {
    let ctx = setup().await;
    let err = workflow::approve_project(&ctx.store, &ctx.notifier, "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn project_rejection_is_terminal() {
    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();

    let rejected = workflow::reject_project(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        Some("outside the program scope".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(rejected.status, SubmissionStatus::ProjectRejected);
    invariants::assert_terminal(SubmissionStatus::ProjectRejected);

    let stored = ctx.store.submission(&submission.id).await.unwrap().unwrap();
    assert_eq!(
        stored.reject_reason.as_deref(),
        Some("outside the program scope"),
    );

    // No edge leaves the terminal state.
    let err = workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState { .. }));
    let err = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("12345678901"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState { .. }));
}

// ─────────────────────────────────────────────────────────
// Payment proof
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn non_numeric_transaction_id_is_rejected_before_state_change() {
    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();

    let err = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("12AB34"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let stored = ctx.store.submission(&submission.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::AwaitingPayment);
    assert!(stored.proof_method.is_none());
    assert!(stored.transaction_id.is_none());
}

#[tokio::test]
async fn screenshot_method_requires_exactly_one_proof_form() {
    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();

    // Screenshot method without a file.
    let err = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        ProofSubmission {
            method: ProofMethod::Screenshot,
            file: None,
            transaction_id: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    // Both forms at once.
    let err = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        ProofSubmission {
            method: ProofMethod::Screenshot,
            file: Some((vec![1, 2, 3], "image/png".to_string())),
            transaction_id: Some("12345678901".to_string()),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn screenshot_proof_is_stored_base64() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();

    let bytes = [0x89u8, 0x50, 0x4e, 0x47];
    let stored = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        screenshot_proof(&bytes),
    )
    .await
    .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Pending);
    assert_eq!(stored.proof.as_deref(), Some(BASE64.encode(bytes).as_str()));
    assert_eq!(stored.proof_mime.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn rejected_payment_allows_a_retry() {
    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("12345678901"),
    )
    .await
    .unwrap();

    let rejected = workflow::reject_payment(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    assert_eq!(rejected.status, SubmissionStatus::Rejected);
    invariants::assert_valid_transition(SubmissionStatus::Rejected, SubmissionStatus::Pending);

    // No slot was consumed by the rejection.
    assert_eq!(ctx.store.member_count().await.unwrap(), 0);

    let retried = workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("98765432109"),
    )
    .await
    .unwrap();
    assert_eq!(retried.status, SubmissionStatus::Pending);
    assert_eq!(retried.transaction_id.as_deref(), Some("98765432109"));
}

#[tokio::test]
async fn rejecting_twice_is_an_invalid_state_not_a_double_rejection() {
    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    workflow::submit_payment_proof(
        &ctx.store,
        &ctx.notifier,
        &submission.id,
        transaction_proof("12345678901"),
    )
    .await
    .unwrap();

    workflow::reject_payment(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    let err = workflow::reject_payment(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState { .. }));

    drain().await;
    let rejections = ctx
        .recorder
        .kinds()
        .into_iter()
        .filter(|kind| *kind == "payment_rejected")
        .count();
    assert_eq!(rejections, 1);
}

// ─────────────────────────────────────────────────────────
// Approval and the capacity gate
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn approval_requires_passing_through_pending() {
    let ctx = setup().await;
    let submission = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();

    // Straight from pending_review.
    let err = workflow::approve_payment(
        &ctx.store,
        &ctx.notifier,
        &ctx.config,
        &submission.id,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState { .. }));

    // From awaiting_payment, before any proof.
    workflow::approve_project(&ctx.store, &ctx.notifier, &submission.id)
        .await
        .unwrap();
    let err = workflow::approve_payment(
        &ctx.store,
        &ctx.notifier,
        &ctx.config,
        &submission.id,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState { .. }));

    assert_eq!(ctx.store.member_count().await.unwrap(), 0);
}

#[tokio::test]
async fn second_approval_fails_when_the_last_place_is_taken() {
    let ctx = setup().await;
    workflow::update_places(&ctx.store, 5, PlacesAction::Set, Some(1))
        .await
        .unwrap();

    // Both applicants get in line while a place is still free.
    let first = workflow::submit(&ctx.store, &ctx.notifier, valid_input())
        .await
        .unwrap();
    let second = workflow::submit(
        &ctx.store,
        &ctx.notifier,
        NewSubmission {
            name: "Grace Hopper".to_string(),
            email: "grace@example.com".to_string(),
            ..valid_input()
        },
    )
    .await
    .unwrap();

    for id in [&first.id, &second.id] {
        workflow::approve_project(&ctx.store, &ctx.notifier, id)
            .await
            .unwrap();
        workflow::submit_payment_proof(
            &ctx.store,
            &ctx.notifier,
            id,
            transaction_proof("12345678901"),
        )
        .await
        .unwrap();
    }

    let (_, count) = workflow::approve_payment(
        &ctx.store,
        &ctx.notifier,
        &ctx.config,
        &first.id,
        None,
    )
    .await
    .unwrap();
    assert_eq!(count, 1);

    let err = workflow::approve_payment(
        &ctx.store,
        &ctx.notifier,
        &ctx.config,
        &second.id,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::CapacityExceeded));

    // The losing submission stays in pending and no member was created.
    let stored = ctx.store.submission(&second.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Pending);
    assert_eq!(ctx.store.member_count().await.unwrap(), 1);
    invariants::assert_capacity_respected(ctx.store.member_count().await.unwrap(), 1);
}

// ─────────────────────────────────────────────────────────
// Capacity administration
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn decrement_never_drops_below_one_place() {
    let ctx = setup().await;
    let new_max = workflow::update_places(&ctx.store, 5, PlacesAction::Set, Some(1))
        .await
        .unwrap();
    assert_eq!(new_max, 1);

    let err = workflow::update_places(&ctx.store, 5, PlacesAction::Decrement, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(ctx.store.config().await.unwrap().max_places, 1);
}

#[tokio::test]
async fn increment_defaults_to_a_step_of_one() {
    let ctx = setup().await;
    let new_max = workflow::update_places(&ctx.store, 5, PlacesAction::Increment, None)
        .await
        .unwrap();
    assert_eq!(new_max, 6);

    let new_max = workflow::update_places(&ctx.store, 5, PlacesAction::Increment, Some(4))
        .await
        .unwrap();
    assert_eq!(new_max, 10);

    let new_max = workflow::update_places(&ctx.store, 5, PlacesAction::Reset, None)
        .await
        .unwrap();
    assert_eq!(new_max, 5);
}

#[tokio::test]
async fn reset_all_clears_registries_and_restores_defaults() {
    let ctx = setup().await;
    workflow::update_places(&ctx.store, 5, PlacesAction::Set, Some(2))
        .await
        .unwrap();
    enroll(&ctx, valid_input()).await;
    workflow::toggle_session(&ctx.store).await.unwrap();

    ctx.store.reset_all(ctx.config.default_max_places).await.unwrap();

    assert!(ctx.store.list_submissions().await.unwrap().is_empty());
    assert_eq!(ctx.store.member_count().await.unwrap(), 0);
    assert!(ctx.store.list_group_links().await.unwrap().is_empty());
    let config = ctx.store.config().await.unwrap();
    assert_eq!(config.max_places, 5);
    assert!(config.session_open);
}
