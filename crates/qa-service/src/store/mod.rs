//! Entity store seam.
//!
//! The session core never talks to a database directly. It reads through the
//! typed lookups on [`EntityStore`] and writes through [`EntityStore::commit`],
//! which applies a [`ChangeSet`] all-or-nothing. Lookups return `Ok(None)`
//! when nothing matches; `Err` always means the call itself failed.
//!
//! Implementations:
//! - [`memory::InMemoryStore`] - copy-on-write state, used by tests and the
//!   `memory` backend
//! - [`postgres::PgStore`] - one sqlx transaction per change set

pub mod memory;
pub mod postgres;

use crate::models::{
    CreatedMeeting, Document, Meeting, NewMeeting, NewQuestion, Participant, Question,
    QuestionKind, Reaction, User,
};
use common::types::{DocumentId, MeetingId, Page, QuestionId, UserId};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Store failure, kept distinct from "no matching record".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A mutation referenced a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate key, or a guarded flag was already set.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store call failed (connection, timeout, constraint, ...).
    #[error("store failure: {0}")]
    Failure(String),
}

/// One write inside a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert a participant row. Conflict if (meeting, user) exists.
    CreateParticipant(Participant),
    /// Insert a question; its id is reported in the [`CommitReceipt`].
    CreateQuestion(NewQuestion),
    /// Remove a question. NotFound if absent.
    DeleteQuestion(QuestionId),
    /// Pending -> answered. Conflict if it was already answered.
    MarkQuestionAnswered(QuestionId),
    /// Add `delta` to a question's votes.
    AdjustQuestionVotes { question_id: QuestionId, delta: i32 },
    /// Add one to a participant's speak count.
    IncrementSpeakNum {
        meeting_id: MeetingId,
        user_id: UserId,
    },
    /// Insert a reaction row. Conflict if (document, page) exists.
    CreateReaction(Reaction),
    /// Add `delta` to a page's reaction count.
    AdjustReactionCount {
        document_id: DocumentId,
        page: Page,
        delta: i32,
    },
    /// false -> true on `suggestion_ok`. Conflict if already true.
    MarkReactionSuggested { document_id: DocumentId, page: Page },
    /// Overwrite the given document fields; `None` leaves a field alone.
    UpdateDocument {
        document_id: DocumentId,
        url: Option<String>,
        script: Option<String>,
    },
    /// Set the terminal flag. Succeeds without effect if the meeting is absent.
    MarkMeetingDone(MeetingId),
}

impl Mutation {
    /// Bounded label for metrics and fault injection.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateParticipant(_) => "create_participant",
            Mutation::CreateQuestion(_) => "create_question",
            Mutation::DeleteQuestion(_) => "delete_question",
            Mutation::MarkQuestionAnswered(_) => "mark_question_answered",
            Mutation::AdjustQuestionVotes { .. } => "adjust_question_votes",
            Mutation::IncrementSpeakNum { .. } => "increment_speak_num",
            Mutation::CreateReaction(_) => "create_reaction",
            Mutation::AdjustReactionCount { .. } => "adjust_reaction_count",
            Mutation::MarkReactionSuggested { .. } => "mark_reaction_suggested",
            Mutation::UpdateDocument { .. } => "update_document",
            Mutation::MarkMeetingDone(_) => "mark_meeting_done",
        }
    }
}

/// Ordered writes that must land together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    mutations: Vec<Mutation>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation (builder style).
    #[must_use]
    pub fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Append a mutation.
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    #[must_use]
    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Ids of `CreateQuestion` mutations, in change-set order.
    pub created_questions: Vec<QuestionId>,
}

impl CommitReceipt {
    /// Id of the first question created by the change set.
    pub fn first_question(&self) -> Result<QuestionId, StoreError> {
        self.created_questions
            .first()
            .copied()
            .ok_or_else(|| StoreError::Failure("commit created no question".to_string()))
    }
}

/// Durable record storage for the session core.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError>;

    /// Insert a user. Conflict on duplicate id.
    async fn create_user(&self, user: User) -> Result<User, StoreError>;

    async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Option<Meeting>, StoreError>;

    /// Atomically create a meeting, one ranked participant per presenter
    /// (ranks `0..n-1` in slice order) and an empty document for each.
    ///
    /// NotFound if a presenter user does not exist, Conflict if a presenter
    /// is listed twice. Nothing is written on failure.
    async fn create_meeting(
        &self,
        meeting: NewMeeting,
        presenters: &[UserId],
    ) -> Result<CreatedMeeting, StoreError>;

    async fn get_participant(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, StoreError>;

    /// The presenter holding `rank` in the meeting.
    async fn find_participant_by_order(
        &self,
        meeting_id: MeetingId,
        rank: u32,
    ) -> Result<Option<Participant>, StoreError>;

    /// All participants of a meeting, presenters and audience, by user id.
    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StoreError>;

    async fn get_document(&self, document_id: DocumentId)
        -> Result<Option<Document>, StoreError>;

    /// The document a user presents in a meeting.
    async fn find_document(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Document>, StoreError>;

    async fn get_question(&self, question_id: QuestionId)
        -> Result<Option<Question>, StoreError>;

    /// Oldest pending question of the given kind on a document, any page.
    async fn find_pending_question(
        &self,
        document_id: DocumentId,
        kind: QuestionKind,
    ) -> Result<Option<Question>, StoreError>;

    /// The user's pending voice question on (document, page), if any.
    async fn find_raised_hand(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Question>, StoreError>;

    async fn get_reaction(
        &self,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Reaction>, StoreError>;

    /// Reactions on a document that have not produced a moderator
    /// question yet, by ascending page.
    async fn list_unsuggested_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StoreError>;

    /// Apply every mutation or none of them.
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;

    /// Cheap liveness check for readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}
