//! `MeetingActor` - the single writer for one meeting.
//!
//! Each `MeetingActor`:
//! - Owns an mpsc mailbox and handles one message at a time, so two
//!   selections on the same meeting can never see the same pending question
//! - Runs every request under the configured store deadline
//! - Owns the RNG used by the random pick
//!
//! Meetings do not share anything except the store, so different meetings
//! proceed in parallel.

use super::messages::{MeetingMessage, MeetingState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::QaError;
use crate::models::{JoinResult, ReactionOutcome, Selection, SubmittedQuestion, VoteOutcome};
use crate::services::{documents, ledger, roster, selector, tally};
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use common::types::{DocumentId, MeetingId, Page, QuestionId, UserId};
use rand::rngs::StdRng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the meeting mailbox.
const MEETING_CHANNEL_BUFFER: usize = 500;

/// Handle to a `MeetingActor`.
#[derive(Debug, Clone)]
pub struct MeetingActorHandle {
    sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    meeting_id: MeetingId,
}

impl MeetingActorHandle {
    #[must_use]
    pub fn meeting_id(&self) -> MeetingId {
        self.meeting_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, QaError>>) -> MeetingMessage,
    ) -> Result<T, QaError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| self.channel_error("channel send", &e))?;

        rx.await
            .map_err(|e| self.channel_error("response receive", &e))?
    }

    /// A closed channel on a cancelled actor means it is draining. On a live
    /// one it is a bug.
    fn channel_error(&self, stage: &str, err: &dyn std::fmt::Display) -> QaError {
        if self.cancel_token.is_cancelled() {
            QaError::Draining
        } else {
            QaError::Internal(format!("{stage} failed: {err}"))
        }
    }

    /// Join as audience (idempotent) and fetch the presenter roster.
    pub async fn join(&self, user_id: UserId) -> Result<JoinResult, QaError> {
        self.request(|respond_to| MeetingMessage::Join {
            user_id,
            respond_to,
        })
        .await
    }

    pub async fn hands_up(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<(), QaError> {
        self.request(|respond_to| MeetingMessage::HandsUp {
            user_id,
            document_id,
            page,
            respond_to,
        })
        .await
    }

    pub async fn hands_down(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<(), QaError> {
        self.request(|respond_to| MeetingMessage::HandsDown {
            user_id,
            document_id,
            page,
            respond_to,
        })
        .await
    }

    pub async fn submit_question(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page: Page,
        body: String,
    ) -> Result<SubmittedQuestion, QaError> {
        self.request(|respond_to| MeetingMessage::SubmitQuestion {
            user_id,
            document_id,
            page,
            body,
            respond_to,
        })
        .await
    }

    /// Pick the next question for `presenter_id`'s document.
    pub async fn select_next(
        &self,
        document_id: DocumentId,
        presenter_id: UserId,
    ) -> Result<Selection, QaError> {
        self.request(|respond_to| MeetingMessage::SelectNext {
            document_id,
            presenter_id,
            respond_to,
        })
        .await
    }

    pub async fn vote_question(
        &self,
        question_id: QuestionId,
        upvote: bool,
    ) -> Result<VoteOutcome, QaError> {
        self.request(|respond_to| MeetingMessage::VoteQuestion {
            question_id,
            upvote,
            respond_to,
        })
        .await
    }

    pub async fn apply_reaction(
        &self,
        document_id: DocumentId,
        page: Page,
        positive: bool,
    ) -> Result<ReactionOutcome, QaError> {
        self.request(|respond_to| MeetingMessage::ApplyReaction {
            document_id,
            page,
            positive,
            respond_to,
        })
        .await
    }

    pub async fn register_document(
        &self,
        document_id: DocumentId,
        url: String,
        script: String,
    ) -> Result<(), QaError> {
        self.request(|respond_to| MeetingMessage::RegisterDocument {
            document_id,
            url,
            script,
            respond_to,
        })
        .await
    }

    pub async fn mark_done(&self) -> Result<(), QaError> {
        self.request(|respond_to| MeetingMessage::MarkDone { respond_to })
            .await
    }

    pub async fn get_state(&self) -> Result<MeetingState, QaError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| self.channel_error("channel send", &e))?;

        rx.await
            .map_err(|e| self.channel_error("response receive", &e))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Run `operation` under `deadline`. Expiry is a persistence failure: the
/// only thing a meeting operation waits on is the store.
async fn within_deadline<T, F>(
    meeting_id: MeetingId,
    deadline: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, QaError>
where
    F: Future<Output = Result<T, QaError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                target: "qa.actor.meeting",
                meeting_id = %meeting_id,
                operation,
                deadline = ?deadline,
                "Meeting operation missed its deadline"
            );
            Err(QaError::Persistence(format!(
                "{operation} exceeded its {}ms deadline",
                deadline.as_millis()
            )))
        }
    }
}

/// The `MeetingActor` implementation.
pub struct MeetingActor {
    meeting_id: MeetingId,
    receiver: mpsc::Receiver<MeetingMessage>,
    /// Child of the controller's token.
    cancel_token: CancellationToken,
    store: Arc<dyn EntityStore>,
    /// Drives the random pick; seeded per meeting when configured.
    rng: StdRng,
    deadline: Duration,
    spawned_at: DateTime<Utc>,
    selections: u64,
    done: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl MeetingActor {
    /// Spawn a new meeting actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        meeting_id: MeetingId,
        store: Arc<dyn EntityStore>,
        rng: StdRng,
        deadline: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (MeetingActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MEETING_CHANNEL_BUFFER);

        let actor = Self {
            meeting_id,
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            rng,
            deadline,
            spawned_at: Utc::now(),
            selections: 0,
            done: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Meeting, meeting_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingActorHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "qa.actor.meeting", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        info!(
            target: "qa.actor.meeting",
            meeting_id = %self.meeting_id,
            "MeetingActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "qa.actor.meeting",
                        meeting_id = %self.meeting_id,
                        "MeetingActor received cancellation signal"
                    );
                    self.drain_mailbox();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "qa.actor.meeting",
                                meeting_id = %self.meeting_id,
                                "MeetingActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "qa.actor.meeting",
            meeting_id = %self.meeting_id,
            selections = self.selections,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "MeetingActor stopped"
        );
    }

    /// Close the mailbox and answer whatever is still queued with
    /// `QaError::Draining`.
    fn drain_mailbox(&mut self) {
        self.receiver.close();
        let mut rejected: u64 = 0;
        while let Ok(message) = self.receiver.try_recv() {
            message.reject_draining();
            rejected += 1;
        }
        if rejected > 0 {
            debug!(
                target: "qa.actor.meeting",
                meeting_id = %self.meeting_id,
                rejected,
                "Rejected queued messages after cancellation"
            );
        }
    }

    async fn handle_message(&mut self, message: MeetingMessage) {
        let meeting_id = self.meeting_id;
        let deadline = self.deadline;
        let store = Arc::clone(&self.store);
        let store = store.as_ref();

        match message {
            MeetingMessage::Join {
                user_id,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "join",
                    roster::join(store, &user_id, meeting_id),
                )
                .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::HandsUp {
                user_id,
                document_id,
                page,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "hands_up",
                    roster::hands_up(store, &user_id, document_id, page),
                )
                .await
                .map(|_| ());
                let _ = respond_to.send(result);
            }

            MeetingMessage::HandsDown {
                user_id,
                document_id,
                page,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "hands_down",
                    roster::hands_down(store, &user_id, document_id, page),
                )
                .await
                .map(|_| ());
                let _ = respond_to.send(result);
            }

            MeetingMessage::SubmitQuestion {
                user_id,
                document_id,
                page,
                body,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "submit_question",
                    roster::submit_question(store, &user_id, document_id, page, &body),
                )
                .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::SelectNext {
                document_id,
                presenter_id,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "select_next",
                    selector::select_next(
                        store,
                        meeting_id,
                        document_id,
                        &presenter_id,
                        &mut self.rng,
                    ),
                )
                .await;
                if result.is_ok() {
                    self.selections += 1;
                }
                let _ = respond_to.send(result);
            }

            MeetingMessage::VoteQuestion {
                question_id,
                upvote,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "vote_question",
                    ledger::vote_question(store, question_id, upvote),
                )
                .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::ApplyReaction {
                document_id,
                page,
                positive,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "apply_reaction",
                    tally::apply_reaction(store, document_id, page, positive),
                )
                .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::RegisterDocument {
                document_id,
                url,
                script,
                respond_to,
            } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "register_document",
                    documents::register_document(store, document_id, &url, &script),
                )
                .await
                .map(|_| ());
                let _ = respond_to.send(result);
            }

            MeetingMessage::MarkDone { respond_to } => {
                let result = within_deadline(
                    meeting_id,
                    deadline,
                    "mark_meeting_done",
                    roster::mark_meeting_done(store, meeting_id),
                )
                .await;
                if result.is_ok() {
                    self.done = true;
                }
                let _ = respond_to.send(result);
            }

            MeetingMessage::GetState { respond_to } => {
                debug!(
                    target: "qa.actor.meeting",
                    meeting_id = %meeting_id,
                    "State requested"
                );
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    fn get_state(&self) -> MeetingState {
        MeetingState {
            meeting_id: self.meeting_id,
            spawned_at: self.spawned_at,
            messages_processed: self.mailbox.messages_processed(),
            selections: self.selections,
            done: self.done,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::SelectionSource;
    use crate::services::test_support::{seed, Seeded};
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn spawn_actor(seeded: Seeded) -> (MeetingActorHandle, JoinHandle<()>, Arc<dyn EntityStore>) {
        let store: Arc<dyn EntityStore> = Arc::new(seeded.store);
        let (handle, task) = MeetingActor::spawn(
            seeded.meeting_id,
            Arc::clone(&store),
            StdRng::seed_from_u64(7),
            Duration::from_secs(5),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        (handle, task, store)
    }

    #[tokio::test]
    async fn test_join_through_actor() {
        let seeded = seed(&["p0", "p1"], &[]).await;
        crate::services::test_support::add_user(&seeded.store, "newcomer").await;
        let (handle, _task, store) = spawn_actor(seeded);

        let result = handle.join(UserId::from("newcomer")).await.unwrap();
        assert_eq!(result.presenters.len(), 2);
        assert_eq!(result.presenters[0].user_id, UserId::from("p0"));

        let participant = store
            .get_participant(handle.meeting_id(), &UserId::from("newcomer"))
            .await
            .unwrap()
            .unwrap();
        assert!(!participant.order.is_presenter());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_selections_never_share_a_question() {
        let seeded = seed(&["p0"], &["a1", "a2", "a3", "a4", "a5"]).await;
        let doc = seeded.documents[0];
        let (handle, _task, _store) = spawn_actor(seeded);

        for user in ["a1", "a2", "a3"] {
            handle
                .hands_up(UserId::from(user), doc, Page(1))
                .await
                .unwrap();
        }

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let handle = handle.clone();
            set.spawn(async move { handle.select_next(doc, UserId::from("p0")).await });
        }

        let mut ids = HashSet::new();
        let mut voice = 0;
        while let Some(joined) = set.join_next().await {
            let selection = joined.unwrap().unwrap();
            assert!(ids.insert(selection.question_id), "question handed out twice");
            if selection.source == SelectionSource::VoiceQueue {
                voice += 1;
            }
        }
        assert_eq!(ids.len(), 8);
        assert_eq!(voice, 3);

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.selections, 8);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_errors_come_back_typed() {
        let seeded = seed(&["p0"], &[]).await;
        let (handle, _task, _store) = spawn_actor(seeded);

        let err = handle
            .hands_down(UserId::from("p0"), DocumentId(999), Page(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = handle
            .select_next(DocumentId(999), UserId::from("p0"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.selections, 0);
        assert_eq!(state.messages_processed, 2);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_mark_done_sets_flag() {
        let seeded = seed(&["p0"], &[]).await;
        let (handle, _task, store) = spawn_actor(seeded);

        handle.mark_done().await.unwrap();

        assert!(handle.get_state().await.unwrap().done);
        let meeting = store.get_meeting(handle.meeting_id()).await.unwrap().unwrap();
        assert!(meeting.done);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let seeded = seed(&["p0"], &[]).await;
        let (handle, task, _store) = spawn_actor(seeded);

        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop after cancel")
            .unwrap();

        let err = handle.join(UserId::from("p0")).await.unwrap_err();
        assert!(matches!(err, QaError::Draining));
        let err = handle.get_state().await.unwrap_err();
        assert!(matches!(err, QaError::Draining));
    }

    #[tokio::test]
    async fn test_queued_messages_are_answered_after_cancel() {
        let seeded = seed(&["p0"], &["a1", "a2", "a3"]).await;
        let doc = seeded.documents[0];
        let (handle, task, store) = spawn_actor(seeded);

        // Queued before the actor is first polled. Each one is either handled
        // or refused; none may lose its reply.
        let mut replies = Vec::new();
        for user in ["a1", "a2", "a3"] {
            let (tx, rx) = oneshot::channel();
            handle
                .sender
                .send(MeetingMessage::HandsUp {
                    user_id: UserId::from(user),
                    document_id: doc,
                    page: Page(1),
                    respond_to: tx,
                })
                .await
                .unwrap();
            replies.push(rx);
        }
        handle.cancel();
        task.await.unwrap();

        let mut handled = 0;
        for rx in replies {
            match rx.await.expect("every queued message gets a reply") {
                Ok(()) => handled += 1,
                Err(QaError::Draining) => {}
                Err(other) => panic!("unexpected reply: {other:?}"),
            }
        }

        let mut raised = 0;
        for user in ["a1", "a2", "a3"] {
            if store
                .find_raised_hand(&UserId::from(user), doc, Page(1))
                .await
                .unwrap()
                .is_some()
            {
                raised += 1;
            }
        }
        assert_eq!(raised, handled);
    }
}
