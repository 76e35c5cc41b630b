#![allow(dead_code)]

//! Test-only assertions over the submission state machine.

use crate::models::SubmissionStatus;

pub const ALL_STATUSES: [SubmissionStatus; 6] = [
    SubmissionStatus::PendingReview,
    SubmissionStatus::AwaitingPayment,
    SubmissionStatus::Pending,
    SubmissionStatus::Approved,
    SubmissionStatus::Rejected,
    SubmissionStatus::ProjectRejected,
];

/// INV-1: only the documented forward edges are legal:
///   pending_review   -> awaiting_payment | project_rejected
///   awaiting_payment -> pending
///   pending          -> approved | rejected
///   rejected         -> pending
pub fn assert_valid_transition(from: SubmissionStatus, to: SubmissionStatus) {
    assert!(
        from.allows(to),
        "INV-1 violated: illegal status transition {:?} -> {:?}",
        from,
        to,
    );
}

/// INV-2: terminal states admit no outgoing edge.
pub fn assert_terminal(status: SubmissionStatus) {
    assert!(status.is_terminal(), "INV-2 violated: {status:?} is not terminal");
    for to in ALL_STATUSES {
        assert!(
            !status.allows(to),
            "INV-2 violated: terminal {:?} allows a transition to {:?}",
            status,
            to,
        );
    }
}

/// INV-3: the member count never exceeds the configured maximum.
pub fn assert_capacity_respected(member_count: i64, max_places: i64) {
    assert!(
        member_count <= max_places,
        "INV-3 violated: {member_count} members with max_places = {max_places}",
    );
}
