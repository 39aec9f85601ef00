//! Session rules.
//!
//! Free async functions over `&dyn EntityStore`. Each one reads what it
//! needs, decides, then writes through a single [`ChangeSet`] so a failure
//! leaves no partial state. None of them serialize on their own: callers run
//! them inside the owning meeting's actor.
//!
//! [`ChangeSet`]: crate::store::ChangeSet

pub mod documents;
pub mod ledger;
pub mod rotation;
pub mod roster;
pub mod selector;
pub mod tally;

use crate::errors::QaError;
use crate::models::{Document, Meeting};
use crate::store::EntityStore;
use common::types::{DocumentId, MeetingId};

/// Load a document or fail with `NotFound`.
pub(crate) async fn require_document(
    store: &dyn EntityStore,
    document_id: DocumentId,
) -> Result<Document, QaError> {
    store
        .get_document(document_id)
        .await?
        .ok_or_else(|| QaError::NotFound(format!("document {document_id}")))
}

/// Load a meeting or fail with `NotFound`.
pub(crate) async fn require_meeting(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
) -> Result<Meeting, QaError> {
    store
        .get_meeting(meeting_id)
        .await?
        .ok_or_else(|| QaError::NotFound(format!("meeting {meeting_id}")))
}
