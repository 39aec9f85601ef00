//! Pre-configured meetings and service wiring for Q&A tests.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(InMemoryStore::new());
//! let meeting = TestMeeting::new()
//!     .with_presenters(&["alice", "bob"])
//!     .with_audience(&["carol", "dave"])
//!     .seed(store.as_ref())
//!     .await;
//!
//! let orchestrator = test_orchestrator(store);
//! let doc = meeting.document_of("alice");
//! ```

use chrono::{FixedOffset, Utc};
use common::secret::SecretString;
use common::types::{DocumentId, MeetingId, UserId};
use qa_service::actors::{ActorMetrics, ActorSettings, SessionControllerActorHandle};
use qa_service::models::{NewMeeting, Participant, User};
use qa_service::orchestrator::SessionOrchestrator;
use qa_service::store::{ChangeSet, EntityStore, Mutation};
use std::sync::Arc;
use std::time::Duration;

/// Seed used by [`test_settings`] so random picks replay.
pub const TEST_SELECTION_SEED: u64 = 7;

/// Store deadline used by [`test_settings`].
pub const TEST_STORE_DEADLINE: Duration = Duration::from_secs(2);

/// Meeting zone used by [`test_orchestrator`] (+09:00).
pub fn test_zone() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("+09:00 is a valid offset")
}

/// A registered user with a throwaway credential.
pub fn test_user(id: &str) -> User {
    User {
        user_id: UserId::from(id),
        user_name: format!("{id} name"),
        credential: SecretString::from("test-credential"),
    }
}

/// Actor settings with a fixed seed and a short deadline.
pub fn test_settings() -> ActorSettings {
    ActorSettings {
        store_deadline: TEST_STORE_DEADLINE,
        max_meetings: 64,
        selection_seed: Some(TEST_SELECTION_SEED),
    }
}

/// Orchestrator over `store` with [`test_settings`].
pub fn test_orchestrator(store: Arc<dyn EntityStore>) -> SessionOrchestrator {
    orchestrator_with(store, test_settings())
}

/// Orchestrator over `store` with custom actor settings.
pub fn orchestrator_with(
    store: Arc<dyn EntityStore>,
    settings: ActorSettings,
) -> SessionOrchestrator {
    let deadline = settings.store_deadline;
    let controller =
        SessionControllerActorHandle::new(Arc::clone(&store), settings, ActorMetrics::new());
    SessionOrchestrator::new(store, controller, test_zone(), deadline)
}

/// Builder for a meeting with presenters and joined audience.
#[derive(Debug, Clone)]
pub struct TestMeeting {
    name: String,
    presenters: Vec<String>,
    audience: Vec<String>,
}

impl Default for TestMeeting {
    fn default() -> Self {
        Self::new()
    }
}

impl TestMeeting {
    /// One presenter (`alice`), no audience.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "Weekly Sync".to_string(),
            presenters: vec!["alice".to_string()],
            audience: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Presenters in rank order.
    #[must_use]
    pub fn with_presenters(mut self, ids: &[&str]) -> Self {
        self.presenters = ids.iter().map(|id| (*id).to_string()).collect();
        self
    }

    /// Audience members, joined before the test starts.
    #[must_use]
    pub fn with_audience(mut self, ids: &[&str]) -> Self {
        self.audience = ids.iter().map(|id| (*id).to_string()).collect();
        self
    }

    /// Create users, the meeting and audience rows in `store`.
    pub async fn seed(self, store: &dyn EntityStore) -> SeededMeeting {
        for id in self.presenters.iter().chain(&self.audience) {
            if store.get_user(&UserId::from(id.as_str())).await.unwrap().is_none() {
                store.create_user(test_user(id)).await.unwrap();
            }
        }

        let presenter_ids: Vec<UserId> = self
            .presenters
            .iter()
            .map(|id| UserId::from(id.as_str()))
            .collect();
        let created = store
            .create_meeting(
                NewMeeting {
                    meeting_name: self.name,
                    start_time: Utc::now(),
                },
                &presenter_ids,
            )
            .await
            .expect("Failed to create test meeting");
        let meeting_id = created.meeting.meeting_id;

        let mut changes = ChangeSet::new();
        for id in &self.audience {
            changes.push(Mutation::CreateParticipant(Participant::audience(
                meeting_id,
                UserId::from(id.as_str()),
            )));
        }
        if !changes.is_empty() {
            store.commit(changes).await.expect("Failed to seed audience");
        }

        SeededMeeting {
            meeting_id,
            presenters: presenter_ids
                .into_iter()
                .zip(created.documents.iter().map(|d| d.document_id))
                .collect(),
            audience: self.audience.iter().map(|id| UserId::from(id.as_str())).collect(),
        }
    }
}

/// Ids produced by [`TestMeeting::seed`].
#[derive(Debug, Clone)]
pub struct SeededMeeting {
    pub meeting_id: MeetingId,
    /// Presenter and their document, in rank order.
    pub presenters: Vec<(UserId, DocumentId)>,
    pub audience: Vec<UserId>,
}

impl SeededMeeting {
    /// Document presented by `user`. Panics if `user` is not a presenter.
    pub fn document_of(&self, user: &str) -> DocumentId {
        self.presenters
            .iter()
            .find(|(id, _)| id.as_str() == user)
            .map(|(_, doc)| *doc)
            .unwrap_or_else(|| panic!("{user} is not a presenter of the test meeting"))
    }

    /// Presenter holding the first rank.
    pub fn first_presenter(&self) -> (UserId, DocumentId) {
        self.presenters
            .first()
            .cloned()
            .expect("test meeting has no presenters")
    }
}
