//! In-memory `EntityStore`.
//!
//! A commit clones the whole state, applies the change set to the clone and
//! swaps it in only if every mutation succeeded, so a failed change set
//! leaves nothing behind. Ordered maps give the same iteration order the
//! Postgres store gets from its `ORDER BY` clauses.

use super::{ChangeSet, CommitReceipt, EntityStore, Mutation, StoreError};
use crate::models::{
    CreatedMeeting, Document, Meeting, NewMeeting, Participant, Question, QuestionKind, Reaction,
    User,
};
use common::types::{DocumentId, MeetingId, Page, ParticipantOrder, QuestionId, UserId};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    meetings: BTreeMap<MeetingId, Meeting>,
    participants: BTreeMap<(MeetingId, UserId), Participant>,
    documents: BTreeMap<DocumentId, Document>,
    questions: BTreeMap<QuestionId, Question>,
    reactions: BTreeMap<(DocumentId, Page), Reaction>,
    last_meeting_id: i64,
    last_document_id: i64,
    last_question_id: i64,
}

impl State {
    fn next_meeting_id(&mut self) -> MeetingId {
        self.last_meeting_id += 1;
        MeetingId(self.last_meeting_id)
    }

    fn next_document_id(&mut self) -> DocumentId {
        self.last_document_id += 1;
        DocumentId(self.last_document_id)
    }

    fn next_question_id(&mut self) -> QuestionId {
        self.last_question_id += 1;
        QuestionId(self.last_question_id)
    }

    fn apply(&mut self, mutation: Mutation, receipt: &mut CommitReceipt) -> Result<(), StoreError> {
        match mutation {
            Mutation::CreateParticipant(participant) => {
                if !self.meetings.contains_key(&participant.meeting_id) {
                    return Err(StoreError::NotFound(format!(
                        "meeting {}",
                        participant.meeting_id
                    )));
                }
                if !self.users.contains_key(&participant.user_id) {
                    return Err(StoreError::NotFound(format!("user {}", participant.user_id)));
                }
                let key = (participant.meeting_id, participant.user_id.clone());
                if self.participants.contains_key(&key) {
                    return Err(StoreError::Conflict(format!(
                        "participant {} already in meeting {}",
                        participant.user_id, participant.meeting_id
                    )));
                }
                self.participants.insert(key, participant);
            }

            Mutation::CreateQuestion(new) => {
                if !self.documents.contains_key(&new.document_id) {
                    return Err(StoreError::NotFound(format!("document {}", new.document_id)));
                }
                let question_id = self.next_question_id();
                self.questions.insert(
                    question_id,
                    Question {
                        question_id,
                        user_id: new.user_id,
                        body: new.body,
                        document_id: new.document_id,
                        page: new.page,
                        votes: new.votes,
                        asked_at: new.asked_at,
                        answered: new.answered,
                        kind: new.kind,
                    },
                );
                receipt.created_questions.push(question_id);
            }

            Mutation::DeleteQuestion(question_id) => {
                self.questions
                    .remove(&question_id)
                    .ok_or_else(|| StoreError::NotFound(format!("question {question_id}")))?;
            }

            Mutation::MarkQuestionAnswered(question_id) => {
                let question = self
                    .questions
                    .get_mut(&question_id)
                    .ok_or_else(|| StoreError::NotFound(format!("question {question_id}")))?;
                if question.answered {
                    return Err(StoreError::Conflict(format!(
                        "question {question_id} already answered"
                    )));
                }
                question.answered = true;
            }

            Mutation::AdjustQuestionVotes { question_id, delta } => {
                let question = self
                    .questions
                    .get_mut(&question_id)
                    .ok_or_else(|| StoreError::NotFound(format!("question {question_id}")))?;
                question.votes = question.votes.checked_add(delta).ok_or_else(|| {
                    StoreError::Failure(format!("vote count overflow on question {question_id}"))
                })?;
            }

            Mutation::IncrementSpeakNum {
                meeting_id,
                user_id,
            } => {
                let participant = self
                    .participants
                    .get_mut(&(meeting_id, user_id.clone()))
                    .ok_or_else(|| {
                        StoreError::NotFound(format!(
                            "participant {user_id} in meeting {meeting_id}"
                        ))
                    })?;
                participant.speak_num = participant.speak_num.saturating_add(1);
            }

            Mutation::CreateReaction(reaction) => {
                if !self.documents.contains_key(&reaction.document_id) {
                    return Err(StoreError::NotFound(format!(
                        "document {}",
                        reaction.document_id
                    )));
                }
                let key = (reaction.document_id, reaction.page);
                if self.reactions.contains_key(&key) {
                    return Err(StoreError::Conflict(format!(
                        "reaction on document {} page {} exists",
                        reaction.document_id, reaction.page
                    )));
                }
                self.reactions.insert(key, reaction);
            }

            Mutation::AdjustReactionCount {
                document_id,
                page,
                delta,
            } => {
                let reaction = self.reactions.get_mut(&(document_id, page)).ok_or_else(|| {
                    StoreError::NotFound(format!("reaction on document {document_id} page {page}"))
                })?;
                reaction.count = reaction.count.checked_add(delta).ok_or_else(|| {
                    StoreError::Failure(format!(
                        "reaction count overflow on document {document_id} page {page}"
                    ))
                })?;
            }

            Mutation::MarkReactionSuggested { document_id, page } => {
                let reaction = self.reactions.get_mut(&(document_id, page)).ok_or_else(|| {
                    StoreError::NotFound(format!("reaction on document {document_id} page {page}"))
                })?;
                if reaction.suggestion_ok {
                    return Err(StoreError::Conflict(format!(
                        "reaction on document {document_id} page {page} already suggested"
                    )));
                }
                reaction.suggestion_ok = true;
            }

            Mutation::UpdateDocument {
                document_id,
                url,
                script,
            } => {
                let document = self
                    .documents
                    .get_mut(&document_id)
                    .ok_or_else(|| StoreError::NotFound(format!("document {document_id}")))?;
                if let Some(url) = url {
                    document.url = Some(url);
                }
                if let Some(script) = script {
                    document.script = Some(script);
                }
            }

            Mutation::MarkMeetingDone(meeting_id) => {
                if let Some(meeting) = self.meetings.get_mut(&meeting_id) {
                    meeting.done = true;
                }
            }
        }
        Ok(())
    }
}

/// `EntityStore` backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.user_id) {
            return Err(StoreError::Conflict(format!("user {} exists", user.user_id)));
        }
        state.users.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Option<Meeting>, StoreError> {
        Ok(self.state.read().await.meetings.get(&meeting_id).cloned())
    }

    async fn create_meeting(
        &self,
        meeting: NewMeeting,
        presenters: &[UserId],
    ) -> Result<CreatedMeeting, StoreError> {
        let mut state = self.state.write().await;

        let mut seen = HashSet::new();
        for presenter in presenters {
            if !state.users.contains_key(presenter) {
                return Err(StoreError::NotFound(format!("user {presenter}")));
            }
            if !seen.insert(presenter) {
                return Err(StoreError::Conflict(format!(
                    "presenter {presenter} listed twice"
                )));
            }
        }

        let meeting_id = state.next_meeting_id();
        let meeting = Meeting {
            meeting_id,
            meeting_name: meeting.meeting_name,
            start_time: meeting.start_time,
            done: false,
        };
        state.meetings.insert(meeting_id, meeting.clone());

        let mut documents = Vec::with_capacity(presenters.len());
        for (rank, presenter) in (0u32..).zip(presenters) {
            state.participants.insert(
                (meeting_id, presenter.clone()),
                Participant {
                    meeting_id,
                    user_id: presenter.clone(),
                    speak_num: 0,
                    order: ParticipantOrder::Ranked(rank),
                },
            );
            let document = Document {
                document_id: state.next_document_id(),
                user_id: presenter.clone(),
                meeting_id,
                url: None,
                script: None,
            };
            state
                .documents
                .insert(document.document_id, document.clone());
            documents.push(document);
        }

        Ok(CreatedMeeting { meeting, documents })
    }

    async fn get_participant(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .participants
            .get(&(meeting_id, user_id.clone()))
            .cloned())
    }

    async fn find_participant_by_order(
        &self,
        meeting_id: MeetingId,
        rank: u32,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .participants
            .values()
            .find(|p| p.meeting_id == meeting_id && p.order == ParticipantOrder::Ranked(rank))
            .cloned())
    }

    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .participants
            .values()
            .filter(|p| p.meeting_id == meeting_id)
            .cloned()
            .collect())
    }

    async fn get_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.state.read().await.documents.get(&document_id).cloned())
    }

    async fn find_document(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .documents
            .values()
            .find(|d| d.meeting_id == meeting_id && &d.user_id == user_id)
            .cloned())
    }

    async fn get_question(
        &self,
        question_id: QuestionId,
    ) -> Result<Option<Question>, StoreError> {
        Ok(self.state.read().await.questions.get(&question_id).cloned())
    }

    async fn find_pending_question(
        &self,
        document_id: DocumentId,
        kind: QuestionKind,
    ) -> Result<Option<Question>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .questions
            .values()
            .find(|q| q.document_id == document_id && !q.answered && q.kind == kind)
            .cloned())
    }

    async fn find_raised_hand(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Question>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .questions
            .values()
            .find(|q| {
                q.is_raised_hand()
                    && &q.user_id == user_id
                    && q.document_id == document_id
                    && q.page == page
            })
            .cloned())
    }

    async fn get_reaction(
        &self,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Reaction>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .reactions
            .get(&(document_id, page))
            .cloned())
    }

    async fn list_unsuggested_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .reactions
            .values()
            .filter(|r| r.document_id == document_id && !r.suggestion_ok)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.write().await;
        let mut draft = state.clone();
        let mut receipt = CommitReceipt::default();

        for mutation in changes.into_mutations() {
            draft.apply(mutation, &mut receipt)?;
        }

        *state = draft;
        Ok(receipt)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::NewQuestion;
    use chrono::Utc;
    use common::secret::SecretString;

    async fn store_with_users(ids: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for id in ids {
            store
                .create_user(User {
                    user_id: UserId::from(*id),
                    user_name: id.to_uppercase(),
                    credential: SecretString::from("pw"),
                })
                .await
                .unwrap();
        }
        store
    }

    fn new_meeting() -> NewMeeting {
        NewMeeting {
            meeting_name: "Lab review".to_string(),
            start_time: Utc::now(),
        }
    }

    fn voice_question(document_id: DocumentId, user: &str) -> NewQuestion {
        NewQuestion {
            user_id: UserId::from(user),
            body: String::new(),
            document_id,
            page: Page(1),
            votes: 0,
            asked_at: Utc::now(),
            answered: false,
            kind: QuestionKind::Voice,
        }
    }

    #[tokio::test]
    async fn test_create_meeting_ranks_presenters_in_order() {
        let store = store_with_users(&["ann", "ben", "cat"]).await;
        let presenters = [UserId::from("cat"), UserId::from("ann"), UserId::from("ben")];

        let created = store.create_meeting(new_meeting(), &presenters).await.unwrap();
        let meeting_id = created.meeting.meeting_id;

        for (rank, presenter) in (0u32..).zip(&presenters) {
            let p = store
                .find_participant_by_order(meeting_id, rank)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&p.user_id, presenter);
        }
        assert!(store
            .find_participant_by_order(meeting_id, 3)
            .await
            .unwrap()
            .is_none());
        assert_eq!(created.documents.len(), 3);
    }

    #[tokio::test]
    async fn test_create_meeting_with_unknown_presenter_writes_nothing() {
        let store = store_with_users(&["ann"]).await;
        let presenters = [UserId::from("ann"), UserId::from("ghost")];

        let err = store
            .create_meeting(new_meeting(), &presenters)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.get_meeting(MeetingId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_meeting_rejects_duplicate_presenter() {
        let store = store_with_users(&["ann"]).await;
        let presenters = [UserId::from("ann"), UserId::from("ann")];

        let err = store
            .create_meeting(new_meeting(), &presenters)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_state_untouched() {
        let store = store_with_users(&["ann", "zed"]).await;
        let created = store
            .create_meeting(new_meeting(), &[UserId::from("ann")])
            .await
            .unwrap();
        let document_id = created.documents[0].document_id;

        // Second mutation targets a participant that does not exist.
        let changes = ChangeSet::new()
            .with(Mutation::CreateQuestion(voice_question(document_id, "zed")))
            .with(Mutation::IncrementSpeakNum {
                meeting_id: created.meeting.meeting_id,
                user_id: UserId::from("zed"),
            });

        let err = store.commit(changes).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store
            .find_pending_question(document_id, QuestionKind::Voice)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_answered_twice_conflicts() {
        let store = store_with_users(&["ann", "zed"]).await;
        let created = store
            .create_meeting(new_meeting(), &[UserId::from("ann")])
            .await
            .unwrap();
        let document_id = created.documents[0].document_id;

        let receipt = store
            .commit(ChangeSet::new().with(Mutation::CreateQuestion(voice_question(
                document_id,
                "zed",
            ))))
            .await
            .unwrap();
        let question_id = receipt.first_question().unwrap();

        store
            .commit(ChangeSet::new().with(Mutation::MarkQuestionAnswered(question_id)))
            .await
            .unwrap();
        let err = store
            .commit(ChangeSet::new().with(Mutation::MarkQuestionAnswered(question_id)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_pending_questions_come_back_oldest_first() {
        let store = store_with_users(&["ann", "x", "y"]).await;
        let created = store
            .create_meeting(new_meeting(), &[UserId::from("ann")])
            .await
            .unwrap();
        let document_id = created.documents[0].document_id;

        let receipt = store
            .commit(
                ChangeSet::new()
                    .with(Mutation::CreateQuestion(voice_question(document_id, "x")))
                    .with(Mutation::CreateQuestion(voice_question(document_id, "y"))),
            )
            .await
            .unwrap();

        let first = store
            .find_pending_question(document_id, QuestionKind::Voice)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.question_id, receipt.created_questions[0]);
        assert_eq!(first.user_id, UserId::from("x"));
    }

    #[tokio::test]
    async fn test_mark_meeting_done_on_missing_meeting_is_noop() {
        let store = InMemoryStore::new();
        let receipt = store
            .commit(ChangeSet::new().with(Mutation::MarkMeetingDone(MeetingId(404))))
            .await
            .unwrap();
        assert!(receipt.created_questions.is_empty());
    }
}
