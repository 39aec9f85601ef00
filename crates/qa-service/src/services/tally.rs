//! Reaction tally.
//!
//! Counts are not floored at zero: a page goes negative
//! when decrements outnumber increments.

use super::require_document;
use crate::errors::QaError;
use crate::models::{Reaction, ReactionOutcome};
use crate::store::{ChangeSet, EntityStore, Mutation};
use common::types::{DocumentId, Page};
use tracing::instrument;

/// Apply a +1 / -1 reaction to a page.
///
/// Only a positive reaction may create the row (count 1). Returns the owning
/// meeting and the count after the update.
///
/// # Errors
///
/// - `QaError::NotFound` - unknown document, or a negative reaction on a
///   page nobody has reacted to yet
/// - `QaError::Persistence` - store call failed
#[instrument(
    skip_all,
    name = "qa.service.apply_reaction",
    fields(document_id = %document_id, page = %page, positive = positive)
)]
pub async fn apply_reaction(
    store: &dyn EntityStore,
    document_id: DocumentId,
    page: Page,
    positive: bool,
) -> Result<ReactionOutcome, QaError> {
    let document = require_document(store, document_id).await?;
    let existing = store.get_reaction(document_id, page).await?;

    let count = match existing {
        None if positive => {
            store
                .commit(ChangeSet::new().with(Mutation::CreateReaction(Reaction {
                    document_id,
                    page,
                    count: 1,
                    suggestion_ok: false,
                })))
                .await?;
            1
        }
        None => {
            return Err(QaError::NotFound(format!(
                "reaction on document {document_id} page {page}"
            )));
        }
        Some(reaction) => {
            let delta = if positive { 1 } else { -1 };
            store
                .commit(ChangeSet::new().with(Mutation::AdjustReactionCount {
                    document_id,
                    page,
                    delta,
                }))
                .await?;
            reaction.count.saturating_add(delta)
        }
    };

    tracing::debug!(
        target: "qa.service.tally",
        document_id = %document_id,
        page = %page,
        count,
        "Reaction applied"
    );

    Ok(ReactionOutcome {
        meeting_id: document.meeting_id,
        count,
    })
}

/// Reaction count a page needs before it is put on the floor, given how
/// many audience candidates are present.
#[must_use]
pub fn suggestion_threshold(candidates: usize) -> i32 {
    i32::try_from(candidates / 2).unwrap_or(i32::MAX)
}

/// Highest count wins; equal counts go to the lowest page.
#[must_use]
pub fn top_reaction(reactions: &[Reaction]) -> Option<&Reaction> {
    reactions.iter().reduce(|best, r| {
        if r.count > best.count || (r.count == best.count && r.page < best.page) {
            r
        } else {
            best
        }
    })
}
