//! Domain records and operation outcomes.
//!
//! Records mirror the store rows one-to-one. Outcome types are what the
//! orchestrator hands back to a transport, so they derive `Serialize`.

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{DocumentId, MeetingId, Page, ParticipantOrder, QuestionId, UserId};
use serde::Serialize;

/// Author id stamped on questions synthesized from reaction pressure.
pub const MODERATOR_USER_ID: &str = "Moderator";

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: UserId,
    pub user_name: String,
    /// Opaque credential owned by the signup/login collaborator.
    pub credential: SecretString,
}

/// A scheduled meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meeting {
    pub meeting_id: MeetingId,
    pub meeting_name: String,
    pub start_time: DateTime<Utc>,
    /// Terminal flag, flips false -> true once.
    pub done: bool,
}

/// Input for creating a meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub meeting_name: String,
    pub start_time: DateTime<Utc>,
}

/// Membership of a user in a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    /// Times this participant was granted the floor. Never decreases.
    pub speak_num: i32,
    pub order: ParticipantOrder,
}

impl Participant {
    /// A fresh audience row, as created on first join.
    #[must_use]
    pub fn audience(meeting_id: MeetingId, user_id: UserId) -> Self {
        Self {
            meeting_id,
            user_id,
            speak_num: 0,
            order: ParticipantOrder::Audience,
        }
    }
}

/// A presenter's document within a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub meeting_id: MeetingId,
    pub url: Option<String>,
    pub script: Option<String>,
}

/// Voice (hand-raise) or written question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Voice,
    Written,
}

impl QuestionKind {
    #[must_use]
    pub const fn is_voice(self) -> bool {
        matches!(self, QuestionKind::Voice)
    }

    #[must_use]
    pub const fn from_is_voice(is_voice: bool) -> Self {
        if is_voice {
            QuestionKind::Voice
        } else {
            QuestionKind::Written
        }
    }
}

/// A question on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub question_id: QuestionId,
    pub user_id: UserId,
    pub body: String,
    pub document_id: DocumentId,
    pub page: Page,
    pub votes: i32,
    pub asked_at: DateTime<Utc>,
    /// `false` while pending; `true` once resolved or put on the floor.
    pub answered: bool,
    pub kind: QuestionKind,
}

impl Question {
    /// Pending and raised by hand.
    #[must_use]
    pub fn is_raised_hand(&self) -> bool {
        !self.answered && self.kind.is_voice()
    }
}

/// Input for creating a question; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub user_id: UserId,
    pub body: String,
    pub document_id: DocumentId,
    pub page: Page,
    pub votes: i32,
    pub asked_at: DateTime<Utc>,
    pub answered: bool,
    pub kind: QuestionKind,
}

/// Reaction pressure on one page of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reaction {
    pub document_id: DocumentId,
    pub page: Page,
    /// Running count. Not floored at zero.
    pub count: i32,
    /// Set once this page has produced a moderator question.
    pub suggestion_ok: bool,
}

// ----------------------------------------------------------------------------
// Operation outcomes
// ----------------------------------------------------------------------------

/// Result of creating a meeting with its presenters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedMeeting {
    pub meeting: Meeting,
    /// One document per presenter, in rotation order.
    pub documents: Vec<Document>,
}

/// One presenter in the join roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenterEntry {
    pub user_id: UserId,
    pub user_name: String,
    pub document_id: DocumentId,
}

/// Result of joining a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinResult {
    pub meeting_name: String,
    pub start_time: DateTime<Utc>,
    /// Presenters ordered by rank, audience excluded.
    pub presenters: Vec<PresenterEntry>,
}

/// Where the selector found (or made) the next question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    /// Oldest pending raised hand on the document.
    VoiceQueue,
    /// Oldest pending written question on the document.
    WrittenQueue,
    /// Synthesized from a page whose reactions crossed the threshold.
    Moderator,
    /// Audience member drawn from the least-heard candidates.
    RandomPick,
}

impl SelectionSource {
    /// Label for metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SelectionSource::VoiceQueue => "voice",
            SelectionSource::WrittenQueue => "written",
            SelectionSource::Moderator => "moderator",
            SelectionSource::RandomPick => "random",
        }
    }
}

/// Decision returned by the question selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub source: SelectionSource,
    /// Who takes the floor; `None` for written and moderator questions.
    pub questioner_id: Option<UserId>,
    pub question_id: QuestionId,
}

impl Selection {
    /// A participant who was already waiting with a raised hand was chosen.
    #[must_use]
    pub fn picked_existing_questioner(&self) -> bool {
        self.source == SelectionSource::VoiceQueue
    }

    /// The question was generated from reaction pressure.
    #[must_use]
    pub fn suggestion_generated(&self) -> bool {
        self.source == SelectionSource::Moderator
    }
}

/// Result of a presenter rotation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenterRotation {
    /// No presenter ranks after the current one.
    pub meeting_ended: bool,
    /// Next presenter and their rank, absent when the meeting ended.
    pub next: Option<(UserId, u32)>,
}

/// Result of a vote on a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub meeting_id: MeetingId,
    pub question_id: QuestionId,
    pub votes: i32,
}

/// Result of a reaction on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionOutcome {
    pub meeting_id: MeetingId,
    pub count: i32,
}

/// Result of submitting a written question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedQuestion {
    pub meeting_id: MeetingId,
    pub question_id: QuestionId,
}

/// Presenter-provided material for a document. Unset fields are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentContent {
    pub url: String,
    pub script: String,
}

/// Body and page of a question, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionSummary {
    pub body: String,
    pub page: Page,
}
