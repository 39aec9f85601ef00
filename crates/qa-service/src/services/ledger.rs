//! Question votes.

use super::require_document;
use crate::errors::QaError;
use crate::models::VoteOutcome;
use crate::store::{ChangeSet, EntityStore, Mutation};
use common::types::QuestionId;
use tracing::instrument;

/// Apply +1 (`upvote`) or -1 to a question's votes.
///
/// The count is not floored at zero.
///
/// # Errors
///
/// - `QaError::NotFound` - unknown question
/// - `QaError::Persistence` - store call failed
#[instrument(
    skip_all,
    name = "qa.service.vote_question",
    fields(question_id = %question_id, upvote = upvote)
)]
pub async fn vote_question(
    store: &dyn EntityStore,
    question_id: QuestionId,
    upvote: bool,
) -> Result<VoteOutcome, QaError> {
    let question = store
        .get_question(question_id)
        .await?
        .ok_or_else(|| QaError::NotFound(format!("question {question_id}")))?;
    let document = require_document(store, question.document_id).await?;

    let delta = if upvote { 1 } else { -1 };
    store
        .commit(ChangeSet::new().with(Mutation::AdjustQuestionVotes { question_id, delta }))
        .await?;

    Ok(VoteOutcome {
        meeting_id: document.meeting_id,
        question_id,
        votes: question.votes.saturating_add(delta),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{NewQuestion, QuestionKind};
    use crate::services::test_support::seed;
    use chrono::Utc;
    use common::types::{DocumentId, Page, UserId};

    async fn ask(store: &dyn EntityStore, document_id: DocumentId) -> QuestionId {
        let receipt = store
            .commit(ChangeSet::new().with(Mutation::CreateQuestion(NewQuestion {
                user_id: UserId::from("aud"),
                body: "What about latency?".to_string(),
                document_id,
                page: Page(2),
                votes: 0,
                asked_at: Utc::now(),
                answered: false,
                kind: QuestionKind::Written,
            })))
            .await
            .unwrap();
        receipt.first_question().unwrap()
    }

    #[tokio::test]
    async fn test_up_then_down_restores_count() {
        let seeded = seed(&["p0"], &["aud"]).await;
        let question_id = ask(&seeded.store, seeded.documents[0]).await;

        let up = vote_question(&seeded.store, question_id, true).await.unwrap();
        assert_eq!(up.votes, 1);
        assert_eq!(up.meeting_id, seeded.meeting_id);

        let down = vote_question(&seeded.store, question_id, false)
            .await
            .unwrap();
        assert_eq!(down.votes, 0);
        assert_eq!(
            seeded
                .store
                .get_question(question_id)
                .await
                .unwrap()
                .unwrap()
                .votes,
            0
        );
    }

    #[tokio::test]
    async fn test_downvote_below_zero_is_kept() {
        let seeded = seed(&["p0"], &["aud"]).await;
        let question_id = ask(&seeded.store, seeded.documents[0]).await;

        let outcome = vote_question(&seeded.store, question_id, false)
            .await
            .unwrap();
        assert_eq!(outcome.votes, -1);
    }

    #[tokio::test]
    async fn test_unknown_question_is_not_found() {
        let seeded = seed(&["p0"], &[]).await;
        let err = vote_question(&seeded.store, QuestionId(77), true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
