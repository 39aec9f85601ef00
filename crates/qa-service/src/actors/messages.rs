//! Message types for actor communication.
//!
//! Requests carry a `tokio::sync::oneshot` sender for the reply. Every reply
//! that can fail is a `Result<_, QaError>` so the caller sees exactly the
//! error the service function produced.

use super::meeting::MeetingActorHandle;
use crate::errors::QaError;
use crate::models::{JoinResult, ReactionOutcome, Selection, SubmittedQuestion, VoteOutcome};
use chrono::{DateTime, Utc};
use common::types::{DocumentId, MeetingId, Page, QuestionId, UserId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `SessionControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Handle to the meeting's actor, spawning it if the meeting exists in
    /// the store but has no live actor yet.
    GetOrSpawn {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<MeetingActorHandle, QaError>>,
    },

    /// Stop a meeting's actor. Not an error if none is live.
    RetireMeeting {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<(), QaError>>,
    },

    /// Snapshot for health checks.
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting meetings and cancel the hierarchy.
    Shutdown {
        /// Upper bound on waiting for meeting actors to finish.
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), QaError>>,
    },
}

/// Messages sent to `MeetingActor`. Each is handled to completion before the
/// next one is read.
#[derive(Debug)]
pub enum MeetingMessage {
    Join {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<JoinResult, QaError>>,
    },

    HandsUp {
        user_id: UserId,
        document_id: DocumentId,
        page: Page,
        respond_to: oneshot::Sender<Result<(), QaError>>,
    },

    HandsDown {
        user_id: UserId,
        document_id: DocumentId,
        page: Page,
        respond_to: oneshot::Sender<Result<(), QaError>>,
    },

    SubmitQuestion {
        user_id: UserId,
        document_id: DocumentId,
        page: Page,
        body: String,
        respond_to: oneshot::Sender<Result<SubmittedQuestion, QaError>>,
    },

    /// Put the next question on the floor for a presenter's document.
    SelectNext {
        document_id: DocumentId,
        presenter_id: UserId,
        respond_to: oneshot::Sender<Result<Selection, QaError>>,
    },

    VoteQuestion {
        question_id: QuestionId,
        upvote: bool,
        respond_to: oneshot::Sender<Result<VoteOutcome, QaError>>,
    },

    ApplyReaction {
        document_id: DocumentId,
        page: Page,
        positive: bool,
        respond_to: oneshot::Sender<Result<ReactionOutcome, QaError>>,
    },

    RegisterDocument {
        document_id: DocumentId,
        url: String,
        script: String,
        respond_to: oneshot::Sender<Result<(), QaError>>,
    },

    /// Set the terminal flag. The actor keeps serving until retired.
    MarkDone {
        respond_to: oneshot::Sender<Result<(), QaError>>,
    },

    GetState {
        respond_to: oneshot::Sender<MeetingState>,
    },
}

impl MeetingMessage {
    /// Answer a message the actor will no longer handle with
    /// `QaError::Draining`. `GetState` has no error channel; its sender is
    /// dropped.
    pub(crate) fn reject_draining(self) {
        match self {
            MeetingMessage::Join { respond_to, .. } => {
                let _ = respond_to.send(Err(QaError::Draining));
            }
            MeetingMessage::HandsUp { respond_to, .. }
            | MeetingMessage::HandsDown { respond_to, .. }
            | MeetingMessage::RegisterDocument { respond_to, .. }
            | MeetingMessage::MarkDone { respond_to } => {
                let _ = respond_to.send(Err(QaError::Draining));
            }
            MeetingMessage::SubmitQuestion { respond_to, .. } => {
                let _ = respond_to.send(Err(QaError::Draining));
            }
            MeetingMessage::SelectNext { respond_to, .. } => {
                let _ = respond_to.send(Err(QaError::Draining));
            }
            MeetingMessage::VoteQuestion { respond_to, .. } => {
                let _ = respond_to.send(Err(QaError::Draining));
            }
            MeetingMessage::ApplyReaction { respond_to, .. } => {
                let _ = respond_to.send(Err(QaError::Draining));
            }
            MeetingMessage::GetState { .. } => {}
        }
    }
}

/// Status of the `SessionControllerActor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Live meeting actors.
    pub meeting_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Snapshot of one meeting actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingState {
    pub meeting_id: MeetingId,
    pub spawned_at: DateTime<Utc>,
    pub messages_processed: u64,
    /// Selections this actor has made since it was spawned.
    pub selections: u64,
    /// A `MarkDone` has been handled.
    pub done: bool,
}
