//! Presenter rotation.

use crate::errors::QaError;
use crate::models::PresenterRotation;
use crate::store::EntityStore;
use common::types::{MeetingId, UserId};
use tracing::instrument;

/// Find who presents after `current`.
///
/// No side effects. Passing the last ranked presenter ends the meeting
/// (`meeting_ended = true`, no successor).
///
/// # Errors
///
/// - `QaError::NotFound` - `current` has no participant row in the meeting
/// - `QaError::InvalidState` - `current` is an audience member
/// - `QaError::Persistence` - store call failed
#[instrument(skip_all, name = "qa.service.next_presenter", fields(meeting_id = %meeting_id))]
pub async fn next_presenter(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
    current: &UserId,
) -> Result<PresenterRotation, QaError> {
    let participant = store
        .get_participant(meeting_id, current)
        .await?
        .ok_or_else(|| {
            QaError::NotFound(format!("participant {current} in meeting {meeting_id}"))
        })?;

    let rank = participant.order.rank().ok_or_else(|| {
        QaError::InvalidState(format!("{current} is not a presenter in meeting {meeting_id}"))
    })?;

    let next = match rank.checked_add(1) {
        Some(next_rank) => store.find_participant_by_order(meeting_id, next_rank).await?,
        None => None,
    };

    let Some(next) = next else {
        tracing::debug!(
            target: "qa.service.rotation",
            meeting_id = %meeting_id,
            last_rank = rank,
            "Presenter rotation complete"
        );
        return Ok(PresenterRotation {
            meeting_ended: true,
            next: None,
        });
    };

    let next_rank = next.order.rank().unwrap_or(rank.saturating_add(1));
    tracing::debug!(
        target: "qa.service.rotation",
        meeting_id = %meeting_id,
        next_rank,
        "Next presenter resolved"
    );

    Ok(PresenterRotation {
        meeting_ended: false,
        next: Some((next.user_id, next_rank)),
    })
}
