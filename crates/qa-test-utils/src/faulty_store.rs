//! Entity store double with injectable failures.
//!
//! Wraps an [`InMemoryStore`] and delegates every call. Commits can be made
//! to fail when they carry a given [`Mutation::kind`], and can be delayed to
//! exercise deadlines under `tokio::time::pause`.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(FaultyStore::new());
//! store.fail_commits_containing("increment_speak_num");
//!
//! // select_next now fails and leaves no partial writes behind
//! assert!(orchestrator.select_next(meeting, doc, &presenter).await.is_err());
//! ```

use common::types::{DocumentId, MeetingId, Page, QuestionId, UserId};
use qa_service::models::{
    CreatedMeeting, Document, Meeting, NewMeeting, Participant, Question, QuestionKind,
    Reaction, User,
};
use qa_service::store::{ChangeSet, CommitReceipt, EntityStore, InMemoryStore, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    fail_kind: Option<&'static str>,
    commit_delay: Option<Duration>,
    ping_fails: bool,
}

/// In-memory store whose commits can be made to fail or stall.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    faults: Mutex<Faults>,
    rejected_commits: AtomicUsize,
}

impl FaultyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any commit that contains a mutation of `kind`.
    pub fn fail_commits_containing(&self, kind: &'static str) {
        self.faults.lock().unwrap().fail_kind = Some(kind);
    }

    /// Sleep this long before every commit.
    pub fn delay_commits(&self, delay: Duration) {
        self.faults.lock().unwrap().commit_delay = Some(delay);
    }

    /// Make readiness pings fail.
    pub fn fail_pings(&self) {
        self.faults.lock().unwrap().ping_fails = true;
    }

    /// Clear every injected fault.
    pub fn heal(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    /// Commits rejected so far.
    pub fn rejected_commits(&self) -> usize {
        self.rejected_commits.load(Ordering::SeqCst)
    }

    /// The wrapped store, for seeding and direct reads.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn snapshot(&self) -> (Option<&'static str>, Option<Duration>, bool) {
        let faults = self.faults.lock().unwrap();
        (faults.fail_kind, faults.commit_delay, faults.ping_fails)
    }
}

#[async_trait::async_trait]
impl EntityStore for FaultyStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        self.inner.get_user(user_id).await
    }

    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        self.inner.create_user(user).await
    }

    async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Option<Meeting>, StoreError> {
        self.inner.get_meeting(meeting_id).await
    }

    async fn create_meeting(
        &self,
        meeting: NewMeeting,
        presenters: &[UserId],
    ) -> Result<CreatedMeeting, StoreError> {
        self.inner.create_meeting(meeting, presenters).await
    }

    async fn get_participant(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, StoreError> {
        self.inner.get_participant(meeting_id, user_id).await
    }

    async fn find_participant_by_order(
        &self,
        meeting_id: MeetingId,
        rank: u32,
    ) -> Result<Option<Participant>, StoreError> {
        self.inner.find_participant_by_order(meeting_id, rank).await
    }

    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StoreError> {
        self.inner.list_participants(meeting_id).await
    }

    async fn get_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.get_document(document_id).await
    }

    async fn find_document(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.find_document(meeting_id, user_id).await
    }

    async fn get_question(
        &self,
        question_id: QuestionId,
    ) -> Result<Option<Question>, StoreError> {
        self.inner.get_question(question_id).await
    }

    async fn find_pending_question(
        &self,
        document_id: DocumentId,
        kind: QuestionKind,
    ) -> Result<Option<Question>, StoreError> {
        self.inner.find_pending_question(document_id, kind).await
    }

    async fn find_raised_hand(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Question>, StoreError> {
        self.inner.find_raised_hand(user_id, document_id, page).await
    }

    async fn get_reaction(
        &self,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Reaction>, StoreError> {
        self.inner.get_reaction(document_id, page).await
    }

    async fn list_unsuggested_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StoreError> {
        self.inner.list_unsuggested_reactions(document_id).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        let (fail_kind, delay, _) = self.snapshot();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = fail_kind {
            if changes.mutations().iter().any(|m| m.kind() == kind) {
                self.rejected_commits.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Failure(format!("injected failure on {kind}")));
            }
        }
        self.inner.commit(changes).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let (_, _, ping_fails) = self.snapshot();
        if ping_fails {
            return Err(StoreError::Failure("injected ping failure".to_string()));
        }
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_service::store::Mutation;

    #[tokio::test]
    async fn test_rejects_only_matching_commits() {
        let store = FaultyStore::new();
        store.fail_commits_containing("mark_meeting_done");

        let err = store
            .commit(ChangeSet::new().with(Mutation::MarkMeetingDone(MeetingId(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Failure(_)));
        assert_eq!(store.rejected_commits(), 1);

        store.heal();
        store
            .commit(ChangeSet::new().with(Mutation::MarkMeetingDone(MeetingId(1))))
            .await
            .unwrap();
        assert_eq!(store.rejected_commits(), 1);
    }

    #[tokio::test]
    async fn test_ping_failure_is_injectable() {
        let store = FaultyStore::new();
        store.ping().await.unwrap();
        store.fail_pings();
        assert!(store.ping().await.is_err());
    }
}
