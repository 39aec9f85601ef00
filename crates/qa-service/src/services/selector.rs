//! Question selector.
//!
//! Decides what goes on the floor next for a presenter's document. First
//! match wins:
//!
//! 1. oldest pending raised hand on the document
//! 2. oldest pending written question on the document
//! 3. a moderator question, when the most-reacted unsuggested page has at
//!    least `candidates / 2` reactions
//! 4. a live question from an audience member drawn uniformly from the
//!    (up to) three candidates with the lowest speak counts
//!
//! Every branch commits its writes as one change set.

use super::{require_document, require_meeting, tally};
use crate::errors::QaError;
use crate::models::{
    NewQuestion, Participant, Question, QuestionKind, Selection, SelectionSource,
    MODERATOR_USER_ID,
};
use crate::observability::metrics;
use crate::store::{ChangeSet, EntityStore, Mutation};
use chrono::Utc;
use common::types::{DocumentId, MeetingId, Page, UserId};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::instrument;

/// Size of the least-heard pool the random pick draws from.
pub const FAIRNESS_POOL_SIZE: usize = 3;

/// Pick the next question for `document_id`.
///
/// `presenter_id` is excluded from the candidate pool. `rng` drives the
/// random pick only.
///
/// # Errors
///
/// - `QaError::NotFound` - meeting or document absent, or the document
///   belongs to another meeting
/// - `QaError::NoParticipants` - nothing pending and nobody to ask
/// - `QaError::Persistence` - store call failed; nothing was written
#[instrument(
    skip_all,
    name = "qa.service.select_next",
    fields(meeting_id = %meeting_id, document_id = %document_id)
)]
pub async fn select_next<R>(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
    document_id: DocumentId,
    presenter_id: &UserId,
    rng: &mut R,
) -> Result<Selection, QaError>
where
    R: Rng + ?Sized,
{
    require_meeting(store, meeting_id).await?;
    let document = require_document(store, document_id).await?;
    if document.meeting_id != meeting_id {
        return Err(QaError::NotFound(format!(
            "document {document_id} in meeting {meeting_id}"
        )));
    }

    for (kind, source) in [
        (QuestionKind::Voice, SelectionSource::VoiceQueue),
        (QuestionKind::Written, SelectionSource::WrittenQueue),
    ] {
        if let Some(question) = store.find_pending_question(document_id, kind).await? {
            let selection = take_pending(store, meeting_id, question, source).await?;
            return Ok(finish(selection));
        }
    }

    let candidates = audience_candidates(store, meeting_id, presenter_id).await?;

    if !candidates.is_empty() {
        let suggested = suggest_from_reactions(store, document_id, candidates.len()).await?;
        if let Some(selection) = suggested {
            return Ok(finish(selection));
        }
    }

    let selection = random_pick(store, meeting_id, document_id, candidates, rng).await?;
    Ok(finish(selection))
}

fn finish(selection: Selection) -> Selection {
    metrics::record_question_selected(selection.source.as_str());
    tracing::info!(
        target: "qa.service.selector",
        source = selection.source.as_str(),
        question_id = %selection.question_id,
        "Question selected"
    );
    selection
}

/// Audience members of the meeting other than the presenter.
async fn audience_candidates(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
    presenter_id: &UserId,
) -> Result<Vec<Participant>, QaError> {
    Ok(store
        .list_participants(meeting_id)
        .await?
        .into_iter()
        .filter(|p| !p.order.is_presenter() && &p.user_id != presenter_id)
        .collect())
}

/// Mark a pending question answered and credit its asker. Only a voice
/// question puts its asker on the floor; a written one is read out.
async fn take_pending(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
    question: Question,
    source: SelectionSource,
) -> Result<Selection, QaError> {
    let mut changes =
        ChangeSet::new().with(Mutation::MarkQuestionAnswered(question.question_id));

    if store
        .get_participant(meeting_id, &question.user_id)
        .await?
        .is_some()
    {
        changes.push(Mutation::IncrementSpeakNum {
            meeting_id,
            user_id: question.user_id.clone(),
        });
    } else {
        tracing::warn!(
            target: "qa.service.selector",
            meeting_id = %meeting_id,
            question_id = %question.question_id,
            "Asker has no participant row, speak count not credited"
        );
    }

    store.commit(changes).await?;

    let questioner_id = match source {
        SelectionSource::VoiceQueue => Some(question.user_id),
        _ => None,
    };
    Ok(Selection {
        source,
        questioner_id,
        question_id: question.question_id,
    })
}

/// Turn the most-reacted page into a moderator question if it crossed the
/// threshold. Each page converts at most once.
async fn suggest_from_reactions(
    store: &dyn EntityStore,
    document_id: DocumentId,
    candidate_count: usize,
) -> Result<Option<Selection>, QaError> {
    let reactions = store.list_unsuggested_reactions(document_id).await?;
    let Some(top) = tally::top_reaction(&reactions) else {
        return Ok(None);
    };

    let threshold = tally::suggestion_threshold(candidate_count);
    if top.count < threshold {
        tracing::debug!(
            target: "qa.service.selector",
            document_id = %document_id,
            page = %top.page,
            count = top.count,
            threshold,
            "Reaction pressure below threshold"
        );
        return Ok(None);
    }

    let receipt = store
        .commit(
            ChangeSet::new()
                .with(Mutation::MarkReactionSuggested {
                    document_id,
                    page: top.page,
                })
                .with(Mutation::CreateQuestion(NewQuestion {
                    user_id: UserId::from(MODERATOR_USER_ID),
                    body: moderator_body(top.page),
                    document_id,
                    page: top.page,
                    votes: top.count,
                    asked_at: Utc::now(),
                    answered: true,
                    kind: QuestionKind::Written,
                })),
        )
        .await?;

    Ok(Some(Selection {
        source: SelectionSource::Moderator,
        questioner_id: None,
        question_id: receipt.first_question()?,
    }))
}

fn moderator_body(page: Page) -> String {
    format!("Detailed explanation requested for page {page}.")
}

/// Give the floor to one of the least-heard candidates.
async fn random_pick<R>(
    store: &dyn EntityStore,
    meeting_id: MeetingId,
    document_id: DocumentId,
    mut candidates: Vec<Participant>,
    rng: &mut R,
) -> Result<Selection, QaError>
where
    R: Rng + ?Sized,
{
    // Stable sort keeps store order (user id) among equal speak counts.
    candidates.sort_by_key(|p| p.speak_num);
    let pool: Vec<&Participant> = candidates.iter().take(FAIRNESS_POOL_SIZE).collect();
    let chosen = pool
        .choose(rng)
        .ok_or(QaError::NoParticipants { meeting_id })?;

    let receipt = store
        .commit(
            ChangeSet::new()
                .with(Mutation::CreateQuestion(NewQuestion {
                    user_id: chosen.user_id.clone(),
                    body: String::new(),
                    document_id,
                    page: Page::GENERAL,
                    votes: 0,
                    asked_at: Utc::now(),
                    answered: true,
                    kind: QuestionKind::Voice,
                }))
                .with(Mutation::IncrementSpeakNum {
                    meeting_id,
                    user_id: chosen.user_id.clone(),
                }),
        )
        .await?;

    Ok(Selection {
        source: SelectionSource::RandomPick,
        questioner_id: Some(chosen.user_id.clone()),
        question_id: receipt.first_question()?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Reaction;
    use crate::services::test_support::{seed, Seeded};
    use common::types::QuestionId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    async fn raise(seeded: &Seeded, user: &str, kind: QuestionKind) -> QuestionId {
        seeded
            .store
            .commit(ChangeSet::new().with(Mutation::CreateQuestion(NewQuestion {
                user_id: UserId::from(user),
                body: String::new(),
                document_id: seeded.documents[0],
                page: Page(1),
                votes: 0,
                asked_at: Utc::now(),
                answered: false,
                kind,
            })))
            .await
            .unwrap()
            .first_question()
            .unwrap()
    }

    async fn speak_num(seeded: &Seeded, user: &str) -> i32 {
        seeded
            .store
            .get_participant(seeded.meeting_id, &UserId::from(user))
            .await
            .unwrap()
            .unwrap()
            .speak_num
    }

    async fn select(seeded: &Seeded) -> Result<Selection, QaError> {
        select_next(
            &seeded.store,
            seeded.meeting_id,
            seeded.documents[0],
            &UserId::from("p0"),
            &mut rng(),
        )
        .await
    }

    #[tokio::test]
    async fn test_voice_queue_drains_before_written() {
        let seeded = seed(&["p0"], &["a", "b"]).await;
        let written = raise(&seeded, "a", QuestionKind::Written).await;
        let voice = raise(&seeded, "b", QuestionKind::Voice).await;

        let first = select(&seeded).await.unwrap();
        assert_eq!(first.source, SelectionSource::VoiceQueue);
        assert_eq!(first.question_id, voice);
        assert!(first.picked_existing_questioner());
        assert_eq!(first.questioner_id, Some(UserId::from("b")));
        assert_eq!(speak_num(&seeded, "b").await, 1);

        let second = select(&seeded).await.unwrap();
        assert_eq!(second.source, SelectionSource::WrittenQueue);
        assert_eq!(second.question_id, written);
        assert!(!second.picked_existing_questioner());
        assert!(!second.suggestion_generated());
        assert_eq!(second.questioner_id, None);
        assert_eq!(speak_num(&seeded, "a").await, 1);
    }

    #[tokio::test]
    async fn test_same_question_is_never_selected_twice() {
        let seeded = seed(&["p0"], &["a"]).await;
        let voice = raise(&seeded, "a", QuestionKind::Voice).await;

        let first = select(&seeded).await.unwrap();
        assert_eq!(first.question_id, voice);
        assert_eq!(speak_num(&seeded, "a").await, 1);

        let second = select(&seeded).await.unwrap();
        assert_ne!(second.question_id, voice);
        assert_eq!(second.source, SelectionSource::RandomPick);
    }

    #[tokio::test]
    async fn test_reaction_threshold_generates_one_moderator_question() {
        let seeded = seed(&["p0"], &["a", "b", "c", "d"]).await;
        let doc = seeded.documents[0];
        for _ in 0..2 {
            tally::apply_reaction(&seeded.store, doc, Page(3), true)
                .await
                .unwrap();
        }

        let first = select(&seeded).await.unwrap();
        assert!(first.suggestion_generated());
        assert!(first.questioner_id.is_none());
        let question = seeded
            .store
            .get_question(first.question_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(question.user_id.as_str(), MODERATOR_USER_ID);
        assert_eq!(question.votes, 2);
        assert_eq!(question.page, Page(3));
        assert!(question.answered);
        assert!(
            seeded
                .store
                .get_reaction(doc, Page(3))
                .await
                .unwrap()
                .unwrap()
                .suggestion_ok
        );

        let second = select(&seeded).await.unwrap();
        assert_eq!(second.source, SelectionSource::RandomPick);
    }

    #[tokio::test]
    async fn test_reaction_below_threshold_falls_through() {
        let seeded = seed(&["p0"], &["a", "b", "c", "d"]).await;
        tally::apply_reaction(&seeded.store, seeded.documents[0], Page(3), true)
            .await
            .unwrap();

        let selection = select(&seeded).await.unwrap();
        assert_eq!(selection.source, SelectionSource::RandomPick);
    }

    #[tokio::test]
    async fn test_random_pick_only_uses_least_heard_pool() {
        let seeded = seed(&["p0"], &["a", "b", "c", "d", "e"]).await;
        // Make d and e the most-heard.
        for user in ["d", "e"] {
            seeded
                .store
                .commit(
                    ChangeSet::new()
                        .with(Mutation::IncrementSpeakNum {
                            meeting_id: seeded.meeting_id,
                            user_id: UserId::from(user),
                        })
                        .with(Mutation::IncrementSpeakNum {
                            meeting_id: seeded.meeting_id,
                            user_id: UserId::from(user),
                        }),
                )
                .await
                .unwrap();
        }

        let mut rng = rng();
        let selection = select_next(
            &seeded.store,
            seeded.meeting_id,
            seeded.documents[0],
            &UserId::from("p0"),
            &mut rng,
        )
        .await
        .unwrap();

        let chosen = selection.questioner_id.clone().unwrap();
        assert!(["a", "b", "c"].contains(&chosen.as_str()));
        assert!(!selection.picked_existing_questioner());
        assert_eq!(speak_num(&seeded, chosen.as_str()).await, 1);

        let question = seeded
            .store
            .get_question(selection.question_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(question.page, Page::GENERAL);
        assert!(question.answered);
        assert_eq!(question.kind, QuestionKind::Voice);
    }

    #[tokio::test]
    async fn test_random_pick_spreads_the_floor() {
        let seeded = seed(&["p0"], &["a", "b", "c", "d", "e", "f"]).await;
        let mut rng = rng();
        let mut chosen = HashSet::new();

        for _ in 0..6 {
            let selection = select_next(
                &seeded.store,
                seeded.meeting_id,
                seeded.documents[0],
                &UserId::from("p0"),
                &mut rng,
            )
            .await
            .unwrap();
            chosen.insert(selection.questioner_id.unwrap());
        }

        // While three or more members are unheard the pool holds only
        // unheard members, so the first four picks are distinct.
        assert!(chosen.len() >= 4);
    }

    #[tokio::test]
    async fn test_presenter_is_never_a_candidate() {
        let seeded = seed(&["p0", "p1"], &[]).await;

        let err = select(&seeded).await.unwrap_err();
        assert!(matches!(err, QaError::NoParticipants { .. }));
    }

    #[tokio::test]
    async fn test_reactions_without_audience_report_no_participants() {
        let seeded = seed(&["p0"], &[]).await;
        seeded
            .store
            .commit(ChangeSet::new().with(Mutation::CreateReaction(Reaction {
                document_id: seeded.documents[0],
                page: Page(1),
                count: 10,
                suggestion_ok: false,
            })))
            .await
            .unwrap();

        let err = select(&seeded).await.unwrap_err();
        assert!(matches!(err, QaError::NoParticipants { .. }));
        assert!(
            !seeded
                .store
                .get_reaction(seeded.documents[0], Page(1))
                .await
                .unwrap()
                .unwrap()
                .suggestion_ok
        );
    }

    #[tokio::test]
    async fn test_document_from_other_meeting_is_not_found() {
        let seeded = seed(&["p0"], &["a"]).await;

        let err = select_next(
            &seeded.store,
            MeetingId(seeded.meeting_id.get() + 1),
            seeded.documents[0],
            &UserId::from("p0"),
            &mut rng(),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }
}
