//! `SessionControllerActor` - singleton supervisor for meeting actors.
//!
//! - Spawns a `MeetingActor` the first time a meeting is touched, after
//!   checking the meeting exists in the store
//! - Caps live meetings at `max_meetings`
//! - Owns the root `CancellationToken`; meeting actors get child tokens
//! - Detects meeting actors that exited or panicked (via `JoinHandle`)
//!
//! # Retirement
//!
//! A retired actor is cancelled and parked until its task ends. The next
//! `GetOrSpawn` for the same meeting waits for it (aborting it after
//! `RETIRE_WAIT`) before spawning a successor, so two actors never write the
//! same meeting at once.
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller stops spawning (`Draining`), cancels every
//! meeting actor and waits for each one up to the shutdown deadline.

use super::meeting::{MeetingActor, MeetingActorHandle};
use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::QaError;
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use common::types::MeetingId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long a retired meeting actor gets to finish before it is aborted.
const RETIRE_WAIT: Duration = Duration::from_secs(5);

/// Default wait for meeting actors when the root token is cancelled
/// without an explicit shutdown request.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Knobs the controller hands down to every meeting actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorSettings {
    /// Deadline for one meeting operation, store calls included.
    pub store_deadline: Duration,
    /// Live meeting actors allowed at once.
    pub max_meetings: usize,
    /// Base seed for per-meeting RNGs; `None` seeds from OS entropy.
    pub selection_seed: Option<u64>,
}

impl ActorSettings {
    fn rng_for(&self, meeting_id: MeetingId) -> StdRng {
        match self.selection_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ meeting_id.get().unsigned_abs()),
            None => StdRng::from_entropy(),
        }
    }
}

/// Handle to the `SessionControllerActor`.
#[derive(Clone)]
pub struct SessionControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl SessionControllerActorHandle {
    /// Spawn the controller and return a handle to it.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        settings: ActorSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionControllerActor::new(
            receiver,
            cancel_token.clone(),
            store,
            settings,
            Arc::clone(&metrics),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, QaError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| QaError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| QaError::Internal(format!("response receive failed: {e}")))
    }

    /// Handle to the meeting's actor, spawning one if needed.
    ///
    /// # Errors
    ///
    /// - `QaError::NotFound` - the meeting does not exist
    /// - `QaError::CapacityExceeded` - `max_meetings` actors are live
    /// - `QaError::Draining` - shutdown has started
    pub async fn get_or_spawn(
        &self,
        meeting_id: MeetingId,
    ) -> Result<MeetingActorHandle, QaError> {
        self.request(|respond_to| ControllerMessage::GetOrSpawn {
            meeting_id,
            respond_to,
        })
        .await?
    }

    /// Stop the meeting's actor if one is live.
    pub async fn retire_meeting(&self, meeting_id: MeetingId) -> Result<(), QaError> {
        self.request(|respond_to| ControllerMessage::RetireMeeting {
            meeting_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, QaError> {
        self.request(|respond_to| ControllerMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting meetings and cancel the hierarchy. Meeting actors are
    /// awaited up to `deadline` in the background.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), QaError> {
        self.request(|respond_to| ControllerMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedMeeting {
    handle: MeetingActorHandle,
    task_handle: JoinHandle<()>,
    spawned_at: DateTime<Utc>,
}

/// The `SessionControllerActor` implementation.
pub struct SessionControllerActor {
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Root token.
    cancel_token: CancellationToken,
    store: Arc<dyn EntityStore>,
    settings: ActorSettings,
    meetings: HashMap<MeetingId, ManagedMeeting>,
    /// Cancelled actors whose task has not been collected yet.
    retiring: HashMap<MeetingId, JoinHandle<()>>,
    accepting_new: bool,
    shutdown_deadline: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionControllerActor {
    fn new(
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        store: Arc<dyn EntityStore>,
        settings: ActorSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            receiver,
            cancel_token,
            store,
            settings,
            meetings: HashMap::new(),
            retiring: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Controller, "controller"),
        }
    }

    #[instrument(skip_all, name = "qa.actor.controller")]
    async fn run(mut self) {
        info!(
            target: "qa.actor.controller",
            max_meetings = self.settings.max_meetings,
            "SessionControllerActor started"
        );

        loop {
            self.check_meeting_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "qa.actor.controller",
                        "SessionControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
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
                                target: "qa.actor.controller",
                                "SessionControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "qa.actor.controller",
            messages_processed = self.mailbox.messages_processed(),
            "SessionControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::GetOrSpawn {
                meeting_id,
                respond_to,
            } => {
                let result = self.get_or_spawn(meeting_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::RetireMeeting {
                meeting_id,
                respond_to,
            } => {
                self.retire_meeting(meeting_id);
                let _ = respond_to.send(Ok(()));
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    async fn get_or_spawn(
        &mut self,
        meeting_id: MeetingId,
    ) -> Result<MeetingActorHandle, QaError> {
        if let Some(managed) = self.meetings.get(&meeting_id) {
            if !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }

        if !self.accepting_new {
            return Err(QaError::Draining);
        }

        // A finished actor is replaced below; reap it first so it does not
        // count against capacity.
        if let Some(stale) = self.meetings.remove(&meeting_id) {
            self.reap(meeting_id, stale).await;
        }
        self.await_retired(meeting_id).await;

        if self.meetings.len() >= self.settings.max_meetings {
            warn!(
                target: "qa.actor.controller",
                meeting_id = %meeting_id,
                live = self.meetings.len(),
                "Meeting capacity reached"
            );
            return Err(QaError::CapacityExceeded);
        }

        let exists = tokio::time::timeout(
            self.settings.store_deadline,
            self.store.get_meeting(meeting_id),
        )
        .await
        .map_err(|_| QaError::Persistence("meeting lookup exceeded its deadline".to_string()))??;
        if exists.is_none() {
            return Err(QaError::NotFound(format!("meeting {meeting_id}")));
        }

        let (handle, task_handle) = MeetingActor::spawn(
            meeting_id,
            Arc::clone(&self.store),
            self.settings.rng_for(meeting_id),
            self.settings.store_deadline,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.meetings.insert(
            meeting_id,
            ManagedMeeting {
                handle: handle.clone(),
                task_handle,
                spawned_at: Utc::now(),
            },
        );
        self.metrics.meeting_spawned();

        info!(
            target: "qa.actor.controller",
            meeting_id = %meeting_id,
            total_meetings = self.meetings.len(),
            "Meeting actor spawned"
        );

        Ok(handle)
    }

    /// Cancel a meeting actor and park its task until it is collected by
    /// the health sweep or by the next spawn for the same meeting.
    fn retire_meeting(&mut self, meeting_id: MeetingId) {
        let Some(managed) = self.meetings.remove(&meeting_id) else {
            debug!(
                target: "qa.actor.controller",
                meeting_id = %meeting_id,
                "No live actor to retire"
            );
            return;
        };

        managed.handle.cancel();
        self.metrics.meeting_retired();
        self.retiring.insert(meeting_id, managed.task_handle);

        let lifetime = Utc::now() - managed.spawned_at;
        info!(
            target: "qa.actor.controller",
            meeting_id = %meeting_id,
            lifetime_secs = lifetime.num_seconds(),
            total_meetings = self.meetings.len(),
            "Meeting actor retired"
        );
    }

    /// Wait for the retired actor of `meeting_id`, if any, to stop.
    async fn await_retired(&mut self, meeting_id: MeetingId) {
        let Some(mut task_handle) = self.retiring.remove(&meeting_id) else {
            return;
        };

        debug!(
            target: "qa.actor.controller",
            meeting_id = %meeting_id,
            "Waiting for retired meeting actor before respawn"
        );
        match tokio::time::timeout(RETIRE_WAIT, &mut task_handle).await {
            Ok(result) => record_exit(&self.metrics, meeting_id, result),
            Err(_) => {
                // Commits are all-or-nothing; an aborted actor leaves no
                // partial write.
                warn!(
                    target: "qa.actor.controller",
                    meeting_id = %meeting_id,
                    wait = ?RETIRE_WAIT,
                    "Retired meeting actor did not stop in time, aborting"
                );
                task_handle.abort();
                record_exit(&self.metrics, meeting_id, task_handle.await);
            }
        }
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            meeting_count: self.meetings.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), QaError> {
        info!(
            target: "qa.actor.controller",
            meeting_count = self.meetings.len(),
            deadline = ?deadline,
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "qa.actor.controller",
            meeting_count = self.meetings.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.meetings.values() {
            managed.handle.cancel();
        }

        let until = Instant::now() + self.shutdown_deadline;
        let mut pending: Vec<(MeetingId, JoinHandle<()>)> = Vec::new();
        for (meeting_id, managed) in self.meetings.drain() {
            self.metrics.meeting_retired();
            pending.push((meeting_id, managed.task_handle));
        }
        pending.extend(self.retiring.drain());

        for (meeting_id, task_handle) in pending {
            match tokio::time::timeout_at(until, task_handle).await {
                Ok(result) => record_exit(&self.metrics, meeting_id, result),
                Err(_) => {
                    warn!(
                        target: "qa.actor.controller",
                        meeting_id = %meeting_id,
                        "Meeting actor shutdown timed out"
                    );
                }
            }
        }

        info!(target: "qa.actor.controller", "Graceful shutdown complete");
    }

    /// Drop meeting actors whose task has ended on its own and collect
    /// retired ones that have stopped.
    async fn check_meeting_health(&mut self) {
        let finished: Vec<MeetingId> = self
            .meetings
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(meeting_id, _)| *meeting_id)
            .collect();

        for meeting_id in finished {
            if let Some(managed) = self.meetings.remove(&meeting_id) {
                warn!(
                    target: "qa.actor.controller",
                    meeting_id = %meeting_id,
                    "Meeting actor task finished unexpectedly"
                );
                self.reap(meeting_id, managed).await;
            }
        }

        let stopped: Vec<MeetingId> = self
            .retiring
            .iter()
            .filter(|(_, task_handle)| task_handle.is_finished())
            .map(|(meeting_id, _)| *meeting_id)
            .collect();

        for meeting_id in stopped {
            if let Some(task_handle) = self.retiring.remove(&meeting_id) {
                record_exit(&self.metrics, meeting_id, task_handle.await);
            }
        }
    }

    /// Collect a finished actor's exit status.
    async fn reap(&self, meeting_id: MeetingId, managed: ManagedMeeting) {
        record_exit(&self.metrics, meeting_id, managed.task_handle.await);
        self.metrics.meeting_retired();
    }
}

/// Log how a meeting actor's task ended. Panics are counted.
fn record_exit(metrics: &ActorMetrics, meeting_id: MeetingId, result: Result<(), JoinError>) {
    match result {
        Ok(()) => {
            info!(
                target: "qa.actor.controller",
                meeting_id = %meeting_id,
                "Meeting actor exited cleanly"
            );
        }
        Err(join_error) if join_error.is_panic() => {
            error!(
                target: "qa.actor.controller",
                meeting_id = %meeting_id,
                error = ?join_error,
                "Meeting actor panicked"
            );
            metrics.record_panic(ActorType::Meeting);
        }
        Err(join_error) => {
            warn!(
                target: "qa.actor.controller",
                meeting_id = %meeting_id,
                error = ?join_error,
                "Meeting actor task was aborted"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::test_support::seed;
    use common::types::UserId;

    fn settings(max_meetings: usize) -> ActorSettings {
        ActorSettings {
            store_deadline: Duration::from_secs(5),
            max_meetings,
            selection_seed: Some(7),
        }
    }

    async fn controller_with_meeting(
        max_meetings: usize,
    ) -> (SessionControllerActorHandle, MeetingId, Arc<dyn EntityStore>) {
        let seeded = seed(&["p0"], &["a1"]).await;
        let meeting_id = seeded.meeting_id;
        let store: Arc<dyn EntityStore> = Arc::new(seeded.store);
        let handle = SessionControllerActorHandle::new(
            Arc::clone(&store),
            settings(max_meetings),
            ActorMetrics::new(),
        );
        (handle, meeting_id, store)
    }

    #[tokio::test]
    async fn test_get_or_spawn_reuses_live_actor() {
        let (controller, meeting_id, _store) = controller_with_meeting(10).await;

        let first = controller.get_or_spawn(meeting_id).await.unwrap();
        first.join(UserId::from("a1")).await.unwrap();
        let second = controller.get_or_spawn(meeting_id).await.unwrap();

        // Same actor: the second handle sees the first handle's message.
        let state = second.get_state().await.unwrap();
        assert_eq!(state.messages_processed, 1);

        let status = controller.get_status().await.unwrap();
        assert_eq!(status.meeting_count, 1);
        assert_eq!(controller.metrics().meeting_count(), 1);

        controller.cancel();
    }

    #[tokio::test]
    async fn test_unknown_meeting_is_not_spawned() {
        let (controller, _meeting_id, _store) = controller_with_meeting(10).await;

        let err = controller.get_or_spawn(MeetingId(404)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(controller.get_status().await.unwrap().meeting_count, 0);

        controller.cancel();
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let (controller, meeting_id, _store) = controller_with_meeting(0).await;

        let err = controller.get_or_spawn(meeting_id).await.unwrap_err();
        assert!(matches!(err, QaError::CapacityExceeded));

        controller.cancel();
    }

    #[tokio::test]
    async fn test_retire_stops_actor_and_allows_respawn() {
        let (controller, meeting_id, _store) = controller_with_meeting(10).await;

        let handle = controller.get_or_spawn(meeting_id).await.unwrap();
        controller.retire_meeting(meeting_id).await.unwrap();
        assert!(handle.is_cancelled());
        assert_eq!(controller.get_status().await.unwrap().meeting_count, 0);

        // Retiring twice is fine.
        controller.retire_meeting(meeting_id).await.unwrap();

        let respawned = controller.get_or_spawn(meeting_id).await.unwrap();
        assert!(!respawned.is_cancelled());
        assert_eq!(respawned.get_state().await.unwrap().messages_processed, 0);

        // The successor only exists once the retired actor has stopped.
        let err = handle.join(UserId::from("a1")).await.unwrap_err();
        assert!(matches!(err, QaError::Draining));

        controller.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains() {
        let (controller, meeting_id, _store) = controller_with_meeting(10).await;

        let handle = controller.get_or_spawn(meeting_id).await.unwrap();
        controller.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(controller.is_cancelled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_cancelled());

        // The controller loop has exited, so further requests fail.
        assert!(controller.get_or_spawn(meeting_id).await.is_err());
    }

    #[tokio::test]
    async fn test_child_tokens_follow_root() {
        let (controller, _meeting_id, _store) = controller_with_meeting(10).await;

        let child = controller.child_token();
        assert!(!child.is_cancelled());

        controller.cancel();
        assert!(controller.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_seeded_rng_differs_per_meeting() {
        use rand::Rng;

        let settings = settings(1);
        let a: u64 = settings.rng_for(MeetingId(1)).gen();
        let a_again: u64 = settings.rng_for(MeetingId(1)).gen();
        let b: u64 = settings.rng_for(MeetingId(2)).gen();
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }
}
