//! `SessionOrchestrator` - the façade a transport talks to.
//!
//! Mutating calls are routed to the owning meeting's actor, so everything
//! that touches one meeting runs one request at a time. The owning meeting of
//! a document or question never changes, so it is resolved straight from the
//! store before routing. A request refused by an actor that was retired
//! while it waited is replayed once on the successor. Read-only lookups and
//! meeting creation also go straight to the store, bounded by the same
//! deadline the actors use.

use crate::actors::{MeetingActorHandle, SessionControllerActorHandle};
use crate::errors::QaError;
use crate::models::{
    CreatedMeeting, DocumentContent, JoinResult, PresenterRotation, QuestionSummary,
    ReactionOutcome, Selection, SubmittedQuestion, VoteOutcome,
};
use crate::observability::metrics;
use crate::services::{documents, roster, rotation};
use crate::store::EntityStore;
use chrono::FixedOffset;
use common::types::{DocumentId, MeetingId, Page, QuestionId, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Entry point for every session operation.
#[derive(Clone)]
pub struct SessionOrchestrator {
    store: Arc<dyn EntityStore>,
    controller: SessionControllerActorHandle,
    meeting_zone: FixedOffset,
    store_deadline: Duration,
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        controller: SessionControllerActorHandle,
        meeting_zone: FixedOffset,
        store_deadline: Duration,
    ) -> Self {
        Self {
            store,
            controller,
            meeting_zone,
            store_deadline,
        }
    }

    #[must_use]
    pub fn controller(&self) -> &SessionControllerActorHandle {
        &self.controller
    }

    /// Record `qa_operation_duration_seconds` around an operation.
    async fn observe<T, F>(operation: &'static str, fut: F) -> Result<T, QaError>
    where
        F: Future<Output = Result<T, QaError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_operation(operation, status, start.elapsed());
        if let Err(e) = &result {
            debug!(
                target: "qa.orchestrator",
                operation,
                error_code = e.error_code(),
                error = %e,
                "Operation failed"
            );
        }
        result
    }

    /// Apply the store deadline to a call that bypasses the actors.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, QaError>
    where
        F: Future<Output = Result<T, QaError>>,
    {
        tokio::time::timeout(self.store_deadline, fut)
            .await
            .map_err(|_| {
                QaError::Persistence(format!(
                    "store call exceeded its {}ms deadline",
                    self.store_deadline.as_millis()
                ))
            })?
    }

    async fn meeting_of_document(&self, document_id: DocumentId) -> Result<MeetingId, QaError> {
        self.bounded(async {
            let document = self
                .store
                .get_document(document_id)
                .await?
                .ok_or_else(|| QaError::NotFound(format!("document {document_id}")))?;
            Ok::<_, QaError>(document.meeting_id)
        })
        .await
    }

    async fn meeting_of_question(&self, question_id: QuestionId) -> Result<MeetingId, QaError> {
        let document_id = self
            .bounded(async {
                let question = self
                    .store
                    .get_question(question_id)
                    .await?
                    .ok_or_else(|| QaError::NotFound(format!("question {question_id}")))?;
                Ok::<_, QaError>(question.document_id)
            })
            .await?;
        self.meeting_of_document(document_id).await
    }

    /// Run `op` against the meeting's actor.
    ///
    /// A cancelled actor answers `Draining` without handling the request.
    /// Unless the whole instance is shutting down that only means the actor
    /// was retired, so the request goes once more to its successor.
    async fn on_actor<T, F, Fut>(&self, meeting_id: MeetingId, op: F) -> Result<T, QaError>
    where
        F: Fn(MeetingActorHandle) -> Fut,
        Fut: Future<Output = Result<T, QaError>>,
    {
        let actor = self.controller.get_or_spawn(meeting_id).await?;
        match op(actor.clone()).await {
            Err(QaError::Draining) if actor.is_cancelled() && !self.controller.is_cancelled() => {
                debug!(
                    target: "qa.orchestrator",
                    meeting_id = %meeting_id,
                    "Meeting actor retired mid-request, replaying on its successor"
                );
                let successor = self.controller.get_or_spawn(meeting_id).await?;
                op(successor).await
            }
            result => result,
        }
    }

    /// Create a meeting. `start_time` is `YYYY/MM/DD HH:MM:SS` in the
    /// configured meeting zone; presenters are ranked in slice order.
    #[instrument(skip_all, name = "qa.orchestrator.create_meeting")]
    pub async fn create_meeting(
        &self,
        meeting_name: &str,
        start_time: &str,
        presenters: &[UserId],
    ) -> Result<CreatedMeeting, QaError> {
        Self::observe(
            "create_meeting",
            self.bounded(roster::create_meeting(
                self.store.as_ref(),
                meeting_name,
                start_time,
                presenters,
                self.meeting_zone,
            )),
        )
        .await
    }

    #[instrument(skip_all, name = "qa.orchestrator.join", fields(meeting_id = %meeting_id))]
    pub async fn join(
        &self,
        user_id: &UserId,
        meeting_id: MeetingId,
    ) -> Result<JoinResult, QaError> {
        Self::observe(
            "join",
            self.on_actor(meeting_id, |actor| {
                let user_id = user_id.clone();
                async move { actor.join(user_id).await }
            }),
        )
        .await
    }

    /// Raise a hand. Returns the owning meeting.
    #[instrument(skip_all, name = "qa.orchestrator.hands_up", fields(document_id = %document_id))]
    pub async fn hands_up(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<MeetingId, QaError> {
        Self::observe("hands_up", async {
            let meeting_id = self.meeting_of_document(document_id).await?;
            self.on_actor(meeting_id, |actor| {
                let user_id = user_id.clone();
                async move { actor.hands_up(user_id, document_id, page).await }
            })
            .await?;
            Ok::<_, QaError>(meeting_id)
        })
        .await
    }

    /// Lower a raised hand. Returns the owning meeting.
    #[instrument(skip_all, name = "qa.orchestrator.hands_down", fields(document_id = %document_id))]
    pub async fn hands_down(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<MeetingId, QaError> {
        Self::observe("hands_down", async {
            let meeting_id = self.meeting_of_document(document_id).await?;
            self.on_actor(meeting_id, |actor| {
                let user_id = user_id.clone();
                async move { actor.hands_down(user_id, document_id, page).await }
            })
            .await?;
            Ok::<_, QaError>(meeting_id)
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "qa.orchestrator.submit_question",
        fields(document_id = %document_id)
    )]
    pub async fn submit_question(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
        body: &str,
    ) -> Result<SubmittedQuestion, QaError> {
        Self::observe("submit_question", async {
            let meeting_id = self.meeting_of_document(document_id).await?;
            self.on_actor(meeting_id, |actor| {
                let user_id = user_id.clone();
                let body = body.to_string();
                async move {
                    actor
                        .submit_question(user_id, document_id, page, body)
                        .await
                }
            })
            .await
        })
        .await
    }

    /// Put the next question on the floor for `presenter_id`'s document.
    #[instrument(
        skip_all,
        name = "qa.orchestrator.select_next",
        fields(meeting_id = %meeting_id, document_id = %document_id)
    )]
    pub async fn select_next(
        &self,
        meeting_id: MeetingId,
        document_id: DocumentId,
        presenter_id: &UserId,
    ) -> Result<Selection, QaError> {
        Self::observe(
            "select_next",
            self.on_actor(meeting_id, |actor| {
                let presenter_id = presenter_id.clone();
                async move { actor.select_next(document_id, presenter_id).await }
            }),
        )
        .await
    }

    #[instrument(
        skip_all,
        name = "qa.orchestrator.vote_question",
        fields(question_id = %question_id)
    )]
    pub async fn vote_question(
        &self,
        question_id: QuestionId,
        upvote: bool,
    ) -> Result<VoteOutcome, QaError> {
        Self::observe("vote_question", async {
            let meeting_id = self.meeting_of_question(question_id).await?;
            self.on_actor(meeting_id, |actor| async move {
                actor.vote_question(question_id, upvote).await
            })
            .await
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "qa.orchestrator.apply_reaction",
        fields(document_id = %document_id)
    )]
    pub async fn apply_reaction(
        &self,
        document_id: DocumentId,
        page: Page,
        positive: bool,
    ) -> Result<ReactionOutcome, QaError> {
        Self::observe("apply_reaction", async {
            let meeting_id = self.meeting_of_document(document_id).await?;
            self.on_actor(meeting_id, |actor| async move {
                actor.apply_reaction(document_id, page, positive).await
            })
            .await
        })
        .await
    }

    /// Who presents after `current`.
    ///
    /// # Errors
    ///
    /// `QaError::InvalidState` if `current` is not a presenter of the
    /// meeting.
    #[instrument(
        skip_all,
        name = "qa.orchestrator.next_presenter",
        fields(meeting_id = %meeting_id)
    )]
    pub async fn next_presenter(
        &self,
        meeting_id: MeetingId,
        current: &UserId,
    ) -> Result<PresenterRotation, QaError> {
        Self::observe(
            "next_presenter",
            self.bounded(async {
                rotation::next_presenter(self.store.as_ref(), meeting_id, current)
                    .await
                    .map_err(|e| match e {
                        QaError::NotFound(what) => {
                            QaError::InvalidState(format!("{what} is not a presenter"))
                        }
                        other => other,
                    })
            }),
        )
        .await
    }

    /// Set the meeting's terminal flag and retire its actor. Unknown
    /// meetings are ignored.
    #[instrument(
        skip_all,
        name = "qa.orchestrator.mark_meeting_done",
        fields(meeting_id = %meeting_id)
    )]
    pub async fn mark_meeting_done(&self, meeting_id: MeetingId) -> Result<(), QaError> {
        Self::observe("mark_meeting_done", async {
            match self
                .on_actor(meeting_id, |actor| async move { actor.mark_done().await })
                .await
            {
                Ok(()) => {}
                Err(QaError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
            self.controller.retire_meeting(meeting_id).await
        })
        .await
    }

    /// Set a document's URL and script; empty strings keep the old value.
    #[instrument(
        skip_all,
        name = "qa.orchestrator.register_document",
        fields(document_id = %document_id)
    )]
    pub async fn register_document(
        &self,
        document_id: DocumentId,
        url: &str,
        script: &str,
    ) -> Result<MeetingId, QaError> {
        Self::observe("register_document", async {
            let meeting_id = self.meeting_of_document(document_id).await?;
            self.on_actor(meeting_id, |actor| {
                let url = url.to_string();
                let script = script.to_string();
                async move { actor.register_document(document_id, url, script).await }
            })
            .await?;
            Ok::<_, QaError>(meeting_id)
        })
        .await
    }

    pub async fn document_content(
        &self,
        document_id: DocumentId,
    ) -> Result<DocumentContent, QaError> {
        Self::observe(
            "document_content",
            self.bounded(documents::document_content(self.store.as_ref(), document_id)),
        )
        .await
    }

    pub async fn user_name(&self, user_id: &UserId) -> Result<String, QaError> {
        Self::observe(
            "user_name",
            self.bounded(documents::user_name(self.store.as_ref(), user_id)),
        )
        .await
    }

    pub async fn question_summary(
        &self,
        question_id: QuestionId,
    ) -> Result<QuestionSummary, QaError> {
        Self::observe(
            "question_summary",
            self.bounded(documents::question_summary(self.store.as_ref(), question_id)),
        )
        .await
    }

    pub async fn document_for(
        &self,
        user_id: &UserId,
        meeting_id: MeetingId,
    ) -> Result<DocumentId, QaError> {
        Self::observe(
            "document_for",
            self.bounded(documents::document_for(self.store.as_ref(), user_id, meeting_id)),
        )
        .await
    }

    pub async fn presenter_of(&self, document_id: DocumentId) -> Result<UserId, QaError> {
        Self::observe(
            "presenter_of",
            self.bounded(documents::presenter_of(self.store.as_ref(), document_id)),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, ActorSettings};
    use crate::models::SelectionSource;
    use crate::services::test_support::{add_user, seed};

    async fn orchestrator(
        presenters: &[&str],
        audience: &[&str],
    ) -> (SessionOrchestrator, MeetingId, Vec<DocumentId>) {
        let seeded = seed(presenters, audience).await;
        add_user(&seeded.store, "late").await;
        let meeting_id = seeded.meeting_id;
        let documents = seeded.documents.clone();
        let store: Arc<dyn EntityStore> = Arc::new(seeded.store);
        let controller = SessionControllerActorHandle::new(
            Arc::clone(&store),
            ActorSettings {
                store_deadline: Duration::from_secs(5),
                max_meetings: 10,
                selection_seed: Some(11),
            },
            ActorMetrics::new(),
        );
        let zone = FixedOffset::east_opt(9 * 3600).unwrap();
        (
            SessionOrchestrator::new(store, controller, zone, Duration::from_secs(5)),
            meeting_id,
            documents,
        )
    }

    #[tokio::test]
    async fn test_hand_round_trip_resolves_meeting() {
        let (qa, meeting_id, docs) = orchestrator(&["p0"], &["a1"]).await;
        let a1 = UserId::from("a1");

        assert_eq!(qa.hands_up(&a1, docs[0], Page(3)).await.unwrap(), meeting_id);
        assert_eq!(qa.hands_down(&a1, docs[0], Page(3)).await.unwrap(), meeting_id);

        let err = qa.hands_down(&a1, docs[0], Page(3)).await.unwrap_err();
        assert!(err.is_not_found());

        qa.controller().cancel();
    }

    #[tokio::test]
    async fn test_next_presenter_outside_roster_is_invalid_state() {
        let (qa, meeting_id, _docs) = orchestrator(&["p0", "p1"], &[]).await;

        let rotation = qa.next_presenter(meeting_id, &UserId::from("p0")).await.unwrap();
        assert_eq!(rotation.next, Some((UserId::from("p1"), 1)));

        let err = qa
            .next_presenter(meeting_id, &UserId::from("stranger"))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::InvalidState(_)));

        qa.controller().cancel();
    }

    #[tokio::test]
    async fn test_mark_done_retires_actor_and_ignores_unknown_meeting() {
        let (qa, meeting_id, _docs) = orchestrator(&["p0"], &[]).await;

        qa.join(&UserId::from("late"), meeting_id).await.unwrap();
        assert_eq!(qa.controller().get_status().await.unwrap().meeting_count, 1);

        qa.mark_meeting_done(meeting_id).await.unwrap();
        assert_eq!(qa.controller().get_status().await.unwrap().meeting_count, 0);

        qa.mark_meeting_done(MeetingId(404)).await.unwrap();

        qa.controller().cancel();
    }

    #[tokio::test]
    async fn test_select_next_routes_through_actor() {
        let (qa, meeting_id, docs) = orchestrator(&["p0"], &["a1", "a2"]).await;
        let p0 = UserId::from("p0");

        let submitted = qa
            .submit_question(&UserId::from("a2"), docs[0], Page(4), "Sample size?")
            .await
            .unwrap();
        let selection = qa.select_next(meeting_id, docs[0], &p0).await.unwrap();
        assert_eq!(selection.source, SelectionSource::WrittenQueue);
        assert_eq!(selection.question_id, submitted.question_id);

        let vote = qa.vote_question(submitted.question_id, true).await.unwrap();
        assert_eq!(vote.votes, 1);
        assert_eq!(vote.meeting_id, meeting_id);

        qa.controller().cancel();
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found_before_routing() {
        let (qa, _meeting_id, _docs) = orchestrator(&["p0"], &[]).await;

        let err = qa
            .apply_reaction(DocumentId(999), Page(1), true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(qa.controller().get_status().await.unwrap().meeting_count, 0);

        qa.controller().cancel();
    }
}
