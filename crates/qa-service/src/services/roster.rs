//! Meeting lifecycle and membership: create, join, raised hands, written
//! questions and the terminal flag.

use super::{require_document, require_meeting};
use crate::errors::QaError;
use crate::models::{
    CreatedMeeting, JoinResult, NewMeeting, NewQuestion, Participant, PresenterEntry,
    QuestionKind, SubmittedQuestion,
};
use crate::store::{ChangeSet, EntityStore, Mutation};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use common::types::{DocumentId, MeetingId, Page, UserId};
use tracing::instrument;

/// Accepted start-time layout, e.g. `2024/05/01 13:30:00`.
pub const START_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Parse a wall-clock start time in the meeting zone.
///
/// # Errors
///
/// `QaError::InvalidArgument` if the string does not match
/// [`START_TIME_FORMAT`] or names a time that does not exist in `zone`.
pub fn parse_start_time(raw: &str, zone: FixedOffset) -> Result<DateTime<Utc>, QaError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), START_TIME_FORMAT).map_err(|e| {
        QaError::InvalidArgument(format!("start time '{raw}' is not YYYY/MM/DD HH:MM:SS: {e}"))
    })?;
    zone.from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| QaError::InvalidArgument(format!("start time '{raw}' is ambiguous")))
}

/// Create a meeting with its ranked presenters and their empty documents.
///
/// Presenters are ranked `0..n-1` in slice order.
///
/// # Errors
///
/// - `QaError::InvalidArgument` - unparsable start time
/// - `QaError::NotFound` - a presenter is not a registered user
/// - `QaError::Conflict` - a presenter is listed twice
#[instrument(skip_all, name = "qa.service.create_meeting", fields(presenters = presenters.len()))]
pub async fn create_meeting(
    store: &dyn EntityStore,
    meeting_name: &str,
    start_time: &str,
    presenters: &[UserId],
    zone: FixedOffset,
) -> Result<CreatedMeeting, QaError> {
    let start_time = parse_start_time(start_time, zone)?;

    let created = store
        .create_meeting(
            NewMeeting {
                meeting_name: meeting_name.to_string(),
                start_time,
            },
            presenters,
        )
        .await?;

    tracing::info!(
        target: "qa.service.roster",
        meeting_id = %created.meeting.meeting_id,
        presenters = created.documents.len(),
        "Meeting created"
    );

    Ok(created)
}

/// Join a meeting and get its presenter roster.
///
/// Idempotent: an audience row is created only on first join. The roster is
/// built before anything is written, so a failed join leaves no row behind.
///
/// # Errors
///
/// - `QaError::NotFound` - unknown user or meeting, or the meeting has no
///   presenters
#[instrument(skip_all, name = "qa.service.join", fields(meeting_id = %meeting_id))]
pub async fn join(
    store: &dyn EntityStore,
    user_id: &UserId,
    meeting_id: MeetingId,
) -> Result<JoinResult, QaError> {
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| QaError::NotFound(format!("user {user_id}")))?;
    let meeting = require_meeting(store, meeting_id).await?;

    let mut ranked: Vec<(u32, Participant)> = store
        .list_participants(meeting_id)
        .await?
        .into_iter()
        .filter_map(|p| p.order.rank().map(|rank| (rank, p)))
        .collect();
    if ranked.is_empty() {
        return Err(QaError::NotFound(format!(
            "presenters for meeting {meeting_id}"
        )));
    }
    ranked.sort_by_key(|(rank, _)| *rank);

    let mut presenters = Vec::with_capacity(ranked.len());
    for (_, presenter) in ranked {
        let user = store
            .get_user(&presenter.user_id)
            .await?
            .ok_or_else(|| QaError::NotFound(format!("user {}", presenter.user_id)))?;
        let document = store
            .find_document(meeting_id, &presenter.user_id)
            .await?
            .ok_or_else(|| {
                QaError::NotFound(format!(
                    "document of {} in meeting {meeting_id}",
                    presenter.user_id
                ))
            })?;
        presenters.push(PresenterEntry {
            user_id: presenter.user_id,
            user_name: user.user_name,
            document_id: document.document_id,
        });
    }

    if store.get_participant(meeting_id, user_id).await?.is_none() {
        store
            .commit(ChangeSet::new().with(Mutation::CreateParticipant(Participant::audience(
                meeting_id,
                user_id.clone(),
            ))))
            .await?;
        tracing::debug!(
            target: "qa.service.roster",
            meeting_id = %meeting_id,
            "Audience member joined"
        );
    }

    Ok(JoinResult {
        meeting_name: meeting.meeting_name,
        start_time: meeting.start_time,
        presenters,
    })
}

/// Raise a hand on a document page. Returns the owning meeting.
///
/// # Errors
///
/// - `QaError::NotFound` - unknown document or user
/// - `QaError::Conflict` - the hand is already up for this page
#[instrument(
    skip_all,
    name = "qa.service.hands_up",
    fields(document_id = %document_id, page = %page)
)]
pub async fn hands_up(
    store: &dyn EntityStore,
    user_id: &UserId,
    document_id: DocumentId,
    page: Page,
) -> Result<MeetingId, QaError> {
    let document = require_document(store, document_id).await?;
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| QaError::NotFound(format!("user {user_id}")))?;

    if store
        .find_raised_hand(user_id, document_id, page)
        .await?
        .is_some()
    {
        return Err(QaError::Conflict(format!(
            "hand already raised on document {document_id} page {page}"
        )));
    }

    store
        .commit(ChangeSet::new().with(Mutation::CreateQuestion(NewQuestion {
            user_id: user_id.clone(),
            body: String::new(),
            document_id,
            page,
            votes: 0,
            asked_at: Utc::now(),
            answered: false,
            kind: QuestionKind::Voice,
        })))
        .await?;

    Ok(document.meeting_id)
}

/// Lower a raised hand. Returns the owning meeting.
///
/// # Errors
///
/// `QaError::NotFound` - unknown document, or no pending raised hand for
/// (user, document, page)
#[instrument(
    skip_all,
    name = "qa.service.hands_down",
    fields(document_id = %document_id, page = %page)
)]
pub async fn hands_down(
    store: &dyn EntityStore,
    user_id: &UserId,
    document_id: DocumentId,
    page: Page,
) -> Result<MeetingId, QaError> {
    let document = require_document(store, document_id).await?;
    let hand = store
        .find_raised_hand(user_id, document_id, page)
        .await?
        .ok_or_else(|| {
            QaError::NotFound(format!(
                "raised hand on document {document_id} page {page}"
            ))
        })?;

    store
        .commit(ChangeSet::new().with(Mutation::DeleteQuestion(hand.question_id)))
        .await?;

    Ok(document.meeting_id)
}

/// Queue a written question.
///
/// # Errors
///
/// - `QaError::InvalidArgument` - empty body
/// - `QaError::NotFound` - unknown document or user
#[instrument(
    skip_all,
    name = "qa.service.submit_question",
    fields(document_id = %document_id, page = %page)
)]
pub async fn submit_question(
    store: &dyn EntityStore,
    user_id: &UserId,
    document_id: DocumentId,
    page: Page,
    body: &str,
) -> Result<SubmittedQuestion, QaError> {
    if body.trim().is_empty() {
        return Err(QaError::InvalidArgument(
            "question body must not be empty".to_string(),
        ));
    }
    let document = require_document(store, document_id).await?;
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| QaError::NotFound(format!("user {user_id}")))?;

    let receipt = store
        .commit(ChangeSet::new().with(Mutation::CreateQuestion(NewQuestion {
            user_id: user_id.clone(),
            body: body.to_string(),
            document_id,
            page,
            votes: 0,
            asked_at: Utc::now(),
            answered: false,
            kind: QuestionKind::Written,
        })))
        .await?;

    Ok(SubmittedQuestion {
        meeting_id: document.meeting_id,
        question_id: receipt.first_question()?,
    })
}

/// Set the terminal flag. Unknown meetings are ignored.
#[instrument(skip_all, name = "qa.service.mark_meeting_done", fields(meeting_id = %meeting_id))]
pub async fn mark_meeting_done(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
) -> Result<(), QaError> {
    store
        .commit(ChangeSet::new().with(Mutation::MarkMeetingDone(meeting_id)))
        .await?;
    tracing::info!(target: "qa.service.roster", meeting_id = %meeting_id, "Meeting marked done");
    Ok(())
}
