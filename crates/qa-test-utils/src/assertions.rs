//! Store state checks for Q&A tests.

use common::types::{DocumentId, MeetingId, Page, UserId};
use qa_service::models::QuestionKind;
use qa_service::store::EntityStore;
use std::collections::BTreeMap;

/// Speak count of every participant in the meeting.
pub async fn speak_counts(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
) -> BTreeMap<UserId, i32> {
    store
        .list_participants(meeting_id)
        .await
        .expect("Failed to list participants")
        .into_iter()
        .map(|p| (p.user_id, p.speak_num))
        .collect()
}

/// Sum of speak counts across the meeting.
pub async fn total_speak_num(store: &dyn EntityStore, meeting_id: MeetingId) -> i32 {
    speak_counts(store, meeting_id).await.values().sum()
}

pub async fn assert_speak_num(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
    user: &str,
    expected: i32,
) {
    let participant = store
        .get_participant(meeting_id, &UserId::from(user))
        .await
        .expect("Failed to read participant")
        .unwrap_or_else(|| panic!("{user} is not in meeting {meeting_id}"));
    assert_eq!(
        participant.speak_num, expected,
        "speak_num of {user} in meeting {meeting_id}"
    );
}

/// Whether `user` has a pending raised hand on (document, page).
pub async fn assert_hand_raised(
    store: &dyn EntityStore,
    user: &str,
    document_id: DocumentId,
    page: Page,
    expected: bool,
) {
    let hand = store
        .find_raised_hand(&UserId::from(user), document_id, page)
        .await
        .expect("Failed to read raised hand");
    assert_eq!(
        hand.is_some(),
        expected,
        "raised hand of {user} on document {document_id} page {page}"
    );
}

/// No pending question of `kind` remains on the document.
pub async fn assert_queue_empty(
    store: &dyn EntityStore,
    document_id: DocumentId,
    kind: QuestionKind,
) {
    let pending = store
        .find_pending_question(document_id, kind)
        .await
        .expect("Failed to read question queue");
    assert!(
        pending.is_none(),
        "expected no pending {kind:?} question on document {document_id}, found {pending:?}"
    );
}
