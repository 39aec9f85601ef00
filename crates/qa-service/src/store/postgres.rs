//! Postgres `EntityStore`.
//!
//! Every change set runs in one transaction. Guarded transitions
//! (answered, suggestion flag) are conditional `UPDATE ... WHERE` statements
//! whose affected-row count decides between success, `Conflict` and
//! `NotFound`. All queries are parameterized.

use super::{ChangeSet, CommitReceipt, EntityStore, Mutation, StoreError};
use crate::models::{
    CreatedMeeting, Document, Meeting, NewMeeting, Participant, Question, QuestionKind, Reaction,
    User,
};
use crate::observability::metrics;
use common::config::DatabaseConfig;
use common::secret::{ExposeSecret, SecretString};
use common::types::{DocumentId, MeetingId, Page, ParticipantOrder, QuestionId, UserId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Connection acquire timeout for the pool.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a store call and record its latency under `operation`.
async fn timed<T, F>(operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let start = Instant::now();
    let result = call.await;
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_store_operation(operation, status, start.elapsed());
    result
}

/// Classify a driver error. Unique violations are conflicts and foreign-key
/// violations point at a missing parent row.
fn classify(err: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(format!("{what} already exists"));
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::NotFound(format!("{what} references a missing row"));
        }
    }
    StoreError::Failure(err.to_string())
}

fn failure(err: sqlx::Error) -> StoreError {
    StoreError::Failure(err.to_string())
}

fn map_user(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        user_id: UserId(row.try_get("user_id").map_err(failure)?),
        user_name: row.try_get("user_name").map_err(failure)?,
        credential: SecretString::from(row.try_get::<String, _>("credential").map_err(failure)?),
    })
}

fn map_meeting(row: &PgRow) -> Result<Meeting, StoreError> {
    Ok(Meeting {
        meeting_id: MeetingId(row.try_get("meeting_id").map_err(failure)?),
        meeting_name: row.try_get("meeting_name").map_err(failure)?,
        start_time: row.try_get("start_time").map_err(failure)?,
        done: row.try_get("done").map_err(failure)?,
    })
}

fn map_participant(row: &PgRow) -> Result<Participant, StoreError> {
    Ok(Participant {
        meeting_id: MeetingId(row.try_get("meeting_id").map_err(failure)?),
        user_id: UserId(row.try_get("user_id").map_err(failure)?),
        speak_num: row.try_get("speak_num").map_err(failure)?,
        order: ParticipantOrder::from_stored(row.try_get("participant_order").map_err(failure)?),
    })
}

fn map_document(row: &PgRow) -> Result<Document, StoreError> {
    Ok(Document {
        document_id: DocumentId(row.try_get("document_id").map_err(failure)?),
        user_id: UserId(row.try_get("user_id").map_err(failure)?),
        meeting_id: MeetingId(row.try_get("meeting_id").map_err(failure)?),
        url: row.try_get("url").map_err(failure)?,
        script: row.try_get("script").map_err(failure)?,
    })
}

fn map_question(row: &PgRow) -> Result<Question, StoreError> {
    Ok(Question {
        question_id: QuestionId(row.try_get("question_id").map_err(failure)?),
        user_id: UserId(row.try_get("user_id").map_err(failure)?),
        body: row.try_get("body").map_err(failure)?,
        document_id: DocumentId(row.try_get("document_id").map_err(failure)?),
        page: Page(row.try_get("page").map_err(failure)?),
        votes: row.try_get("votes").map_err(failure)?,
        asked_at: row.try_get("asked_at").map_err(failure)?,
        answered: row.try_get("answered").map_err(failure)?,
        kind: QuestionKind::from_is_voice(row.try_get("is_voice").map_err(failure)?),
    })
}

fn map_reaction(row: &PgRow) -> Result<Reaction, StoreError> {
    Ok(Reaction {
        document_id: DocumentId(row.try_get("document_id").map_err(failure)?),
        page: Page(row.try_get("page").map_err(failure)?),
        count: row.try_get("count").map_err(failure)?,
        suggestion_ok: row.try_get("suggestion_ok").map_err(failure)?,
    })
}

const QUESTION_COLUMNS: &str =
    "question_id, user_id, body, document_id, page, votes, asked_at, answered, is_voice";

/// `EntityStore` over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(config.url.expose_secret())
            .await
            .map_err(failure)?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Failure(e.to_string()))
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn question_exists(
    conn: &mut PgConnection,
    question_id: QuestionId,
) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 FROM questions WHERE question_id = $1")
        .bind(question_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(failure)?;
    Ok(row.is_some())
}

async fn reaction_exists(
    conn: &mut PgConnection,
    document_id: DocumentId,
    page: Page,
) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 FROM reactions WHERE document_id = $1 AND page = $2")
        .bind(document_id.get())
        .bind(page.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(failure)?;
    Ok(row.is_some())
}

/// Apply one mutation inside the commit transaction.
async fn apply(
    conn: &mut PgConnection,
    mutation: Mutation,
    receipt: &mut CommitReceipt,
) -> Result<(), StoreError> {
    match mutation {
        Mutation::CreateParticipant(participant) => {
            sqlx::query(
                r#"
                INSERT INTO participants (meeting_id, user_id, speak_num, participant_order)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(participant.meeting_id.get())
            .bind(participant.user_id.as_str())
            .bind(participant.speak_num)
            .bind(participant.order.to_stored())
            .execute(&mut *conn)
            .await
            .map_err(|e| classify(e, "participant"))?;
        }

        Mutation::CreateQuestion(new) => {
            let row = sqlx::query(
                r#"
                INSERT INTO questions
                    (user_id, body, document_id, page, votes, asked_at, answered, is_voice)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING question_id
                "#,
            )
            .bind(new.user_id.as_str())
            .bind(&new.body)
            .bind(new.document_id.get())
            .bind(new.page.0)
            .bind(new.votes)
            .bind(new.asked_at)
            .bind(new.answered)
            .bind(new.kind.is_voice())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| classify(e, "question"))?;
            receipt
                .created_questions
                .push(QuestionId(row.try_get("question_id").map_err(failure)?));
        }

        Mutation::DeleteQuestion(question_id) => {
            let result = sqlx::query("DELETE FROM questions WHERE question_id = $1")
                .bind(question_id.get())
                .execute(&mut *conn)
                .await
                .map_err(failure)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("question {question_id}")));
            }
        }

        Mutation::MarkQuestionAnswered(question_id) => {
            let result = sqlx::query(
                "UPDATE questions SET answered = TRUE WHERE question_id = $1 AND answered = FALSE",
            )
            .bind(question_id.get())
            .execute(&mut *conn)
            .await
            .map_err(failure)?;
            if result.rows_affected() == 0 {
                let present = question_exists(conn, question_id).await?;
                return Err(if present {
                    StoreError::Conflict(format!("question {question_id} already answered"))
                } else {
                    StoreError::NotFound(format!("question {question_id}"))
                });
            }
        }

        Mutation::AdjustQuestionVotes { question_id, delta } => {
            let result =
                sqlx::query("UPDATE questions SET votes = votes + $2 WHERE question_id = $1")
                    .bind(question_id.get())
                    .bind(delta)
                    .execute(&mut *conn)
                    .await
                    .map_err(failure)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("question {question_id}")));
            }
        }

        Mutation::IncrementSpeakNum {
            meeting_id,
            user_id,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE participants SET speak_num = speak_num + 1
                WHERE meeting_id = $1 AND user_id = $2
                "#,
            )
            .bind(meeting_id.get())
            .bind(user_id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(failure)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "participant {user_id} in meeting {meeting_id}"
                )));
            }
        }

        Mutation::CreateReaction(reaction) => {
            sqlx::query(
                r#"
                INSERT INTO reactions (document_id, page, count, suggestion_ok)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(reaction.document_id.get())
            .bind(reaction.page.0)
            .bind(reaction.count)
            .bind(reaction.suggestion_ok)
            .execute(&mut *conn)
            .await
            .map_err(|e| classify(e, "reaction"))?;
        }

        Mutation::AdjustReactionCount {
            document_id,
            page,
            delta,
        } => {
            let result = sqlx::query(
                "UPDATE reactions SET count = count + $3 WHERE document_id = $1 AND page = $2",
            )
            .bind(document_id.get())
            .bind(page.0)
            .bind(delta)
            .execute(&mut *conn)
            .await
            .map_err(failure)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "reaction on document {document_id} page {page}"
                )));
            }
        }

        Mutation::MarkReactionSuggested { document_id, page } => {
            let result = sqlx::query(
                r#"
                UPDATE reactions SET suggestion_ok = TRUE
                WHERE document_id = $1 AND page = $2 AND suggestion_ok = FALSE
                "#,
            )
            .bind(document_id.get())
            .bind(page.0)
            .execute(&mut *conn)
            .await
            .map_err(failure)?;
            if result.rows_affected() == 0 {
                let present = reaction_exists(conn, document_id, page).await?;
                return Err(if present {
                    StoreError::Conflict(format!(
                        "reaction on document {document_id} page {page} already suggested"
                    ))
                } else {
                    StoreError::NotFound(format!("reaction on document {document_id} page {page}"))
                });
            }
        }

        Mutation::UpdateDocument {
            document_id,
            url,
            script,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE documents
                SET url = COALESCE($2, url), script = COALESCE($3, script)
                WHERE document_id = $1
                "#,
            )
            .bind(document_id.get())
            .bind(url)
            .bind(script)
            .execute(&mut *conn)
            .await
            .map_err(failure)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("document {document_id}")));
            }
        }

        Mutation::MarkMeetingDone(meeting_id) => {
            sqlx::query("UPDATE meetings SET done = TRUE WHERE meeting_id = $1")
                .bind(meeting_id.get())
                .execute(&mut *conn)
                .await
                .map_err(failure)?;
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl EntityStore for PgStore {
    #[instrument(skip_all, name = "qa.store.get_user")]
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        timed("get_user", async {
            let row = sqlx::query(
                "SELECT user_id, user_name, credential FROM users WHERE user_id = $1",
            )
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_user).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.create_user")]
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        timed("create_user", async {
            sqlx::query("INSERT INTO users (user_id, user_name, credential) VALUES ($1, $2, $3)")
                .bind(user.user_id.as_str())
                .bind(&user.user_name)
                .bind(user.credential.expose_secret())
                .execute(&self.pool)
                .await
                .map_err(|e| classify(e, "user"))?;
            Ok::<_, StoreError>(user)
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.get_meeting", fields(meeting_id = %meeting_id))]
    async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Option<Meeting>, StoreError> {
        timed("get_meeting", async {
            let row = sqlx::query(
                "SELECT meeting_id, meeting_name, start_time, done \
                 FROM meetings WHERE meeting_id = $1",
            )
            .bind(meeting_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_meeting).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.create_meeting", fields(presenters = presenters.len()))]
    async fn create_meeting(
        &self,
        meeting: NewMeeting,
        presenters: &[UserId],
    ) -> Result<CreatedMeeting, StoreError> {
        timed("create_meeting", async {
            let mut seen = HashSet::new();
            for presenter in presenters {
                if !seen.insert(presenter) {
                    return Err(StoreError::Conflict(format!(
                        "presenter {presenter} listed twice"
                    )));
                }
            }

            let mut tx = self.pool.begin().await.map_err(failure)?;

            let row = sqlx::query(
                r#"
                INSERT INTO meetings (meeting_name, start_time)
                VALUES ($1, $2)
                RETURNING meeting_id, meeting_name, start_time, done
                "#,
            )
            .bind(&meeting.meeting_name)
            .bind(meeting.start_time)
            .fetch_one(&mut *tx)
            .await
            .map_err(failure)?;
            let created = map_meeting(&row)?;
            let meeting_id = created.meeting_id;

            let mut documents = Vec::with_capacity(presenters.len());
            for (rank, presenter) in (0u32..).zip(presenters) {
                sqlx::query(
                    r#"
                    INSERT INTO participants (meeting_id, user_id, speak_num, participant_order)
                    VALUES ($1, $2, 0, $3)
                    "#,
                )
                .bind(meeting_id.get())
                .bind(presenter.as_str())
                .bind(ParticipantOrder::Ranked(rank).to_stored())
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, &format!("presenter {presenter}")))?;

                let row = sqlx::query(
                    r#"
                    INSERT INTO documents (user_id, meeting_id)
                    VALUES ($1, $2)
                    RETURNING document_id, user_id, meeting_id, url, script
                    "#,
                )
                .bind(presenter.as_str())
                .bind(meeting_id.get())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| classify(e, &format!("document for {presenter}")))?;
                documents.push(map_document(&row)?);
            }

            tx.commit().await.map_err(failure)?;

            debug!(
                target: "qa.store.postgres",
                meeting_id = %meeting_id,
                presenters = documents.len(),
                "Meeting created"
            );

            Ok(CreatedMeeting {
                meeting: created,
                documents,
            })
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.get_participant", fields(meeting_id = %meeting_id))]
    async fn get_participant(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, StoreError> {
        timed("get_participant", async {
            let row = sqlx::query(
                r#"
                SELECT meeting_id, user_id, speak_num, participant_order
                FROM participants WHERE meeting_id = $1 AND user_id = $2
                "#,
            )
            .bind(meeting_id.get())
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_participant).transpose()
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "qa.store.find_participant_by_order",
        fields(meeting_id = %meeting_id)
    )]
    async fn find_participant_by_order(
        &self,
        meeting_id: MeetingId,
        rank: u32,
    ) -> Result<Option<Participant>, StoreError> {
        timed("find_participant_by_order", async {
            let row = sqlx::query(
                r#"
                SELECT meeting_id, user_id, speak_num, participant_order
                FROM participants WHERE meeting_id = $1 AND participant_order = $2
                "#,
            )
            .bind(meeting_id.get())
            .bind(ParticipantOrder::Ranked(rank).to_stored())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_participant).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.list_participants", fields(meeting_id = %meeting_id))]
    async fn list_participants(
        &self,
        meeting_id: MeetingId,
    ) -> Result<Vec<Participant>, StoreError> {
        timed("list_participants", async {
            let rows = sqlx::query(
                r#"
                SELECT meeting_id, user_id, speak_num, participant_order
                FROM participants WHERE meeting_id = $1
                ORDER BY user_id
                "#,
            )
            .bind(meeting_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(failure)?;
            rows.iter().map(map_participant).collect()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.get_document", fields(document_id = %document_id))]
    async fn get_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        timed("get_document", async {
            let row = sqlx::query(
                r#"
                SELECT document_id, user_id, meeting_id, url, script
                FROM documents WHERE document_id = $1
                "#,
            )
            .bind(document_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_document).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.find_document", fields(meeting_id = %meeting_id))]
    async fn find_document(
        &self,
        meeting_id: MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Document>, StoreError> {
        timed("find_document", async {
            let row = sqlx::query(
                r#"
                SELECT document_id, user_id, meeting_id, url, script
                FROM documents WHERE meeting_id = $1 AND user_id = $2
                "#,
            )
            .bind(meeting_id.get())
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_document).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.get_question", fields(question_id = %question_id))]
    async fn get_question(
        &self,
        question_id: QuestionId,
    ) -> Result<Option<Question>, StoreError> {
        timed("get_question", async {
            let row = sqlx::query(&format!(
                "SELECT {QUESTION_COLUMNS} FROM questions WHERE question_id = $1"
            ))
            .bind(question_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_question).transpose()
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "qa.store.find_pending_question",
        fields(document_id = %document_id)
    )]
    async fn find_pending_question(
        &self,
        document_id: DocumentId,
        kind: QuestionKind,
    ) -> Result<Option<Question>, StoreError> {
        timed("find_pending_question", async {
            let row = sqlx::query(&format!(
                r#"
                SELECT {QUESTION_COLUMNS} FROM questions
                WHERE document_id = $1 AND answered = FALSE AND is_voice = $2
                ORDER BY question_id
                LIMIT 1
                "#
            ))
            .bind(document_id.get())
            .bind(kind.is_voice())
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_question).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.find_raised_hand", fields(document_id = %document_id))]
    async fn find_raised_hand(
        &self,
        user_id: &UserId,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Question>, StoreError> {
        timed("find_raised_hand", async {
            let row = sqlx::query(&format!(
                r#"
                SELECT {QUESTION_COLUMNS} FROM questions
                WHERE user_id = $1 AND document_id = $2 AND page = $3
                  AND answered = FALSE AND is_voice = TRUE
                ORDER BY question_id
                LIMIT 1
                "#
            ))
            .bind(user_id.as_str())
            .bind(document_id.get())
            .bind(page.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_question).transpose()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.get_reaction", fields(document_id = %document_id))]
    async fn get_reaction(
        &self,
        document_id: DocumentId,
        page: Page,
    ) -> Result<Option<Reaction>, StoreError> {
        timed("get_reaction", async {
            let row = sqlx::query(
                r#"
                SELECT document_id, page, count, suggestion_ok
                FROM reactions WHERE document_id = $1 AND page = $2
                "#,
            )
            .bind(document_id.get())
            .bind(page.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(failure)?;
            row.as_ref().map(map_reaction).transpose()
        })
        .await
    }

    #[instrument(
        skip_all,
        name = "qa.store.list_unsuggested_reactions",
        fields(document_id = %document_id)
    )]
    async fn list_unsuggested_reactions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Reaction>, StoreError> {
        timed("list_unsuggested_reactions", async {
            let rows = sqlx::query(
                r#"
                SELECT document_id, page, count, suggestion_ok
                FROM reactions WHERE document_id = $1 AND suggestion_ok = FALSE
                ORDER BY page
                "#,
            )
            .bind(document_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(failure)?;
            rows.iter().map(map_reaction).collect()
        })
        .await
    }

    #[instrument(skip_all, name = "qa.store.commit", fields(mutations = changes.len()))]
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        timed("commit", async {
            let mut tx = self.pool.begin().await.map_err(failure)?;
            let mut receipt = CommitReceipt::default();

            for mutation in changes.into_mutations() {
                let kind = mutation.kind();
                if let Err(e) = apply(&mut *tx, mutation, &mut receipt).await {
                    debug!(
                        target: "qa.store.postgres",
                        mutation = kind,
                        error = %e,
                        "Rolling back change set"
                    );
                    tx.rollback().await.map_err(failure)?;
                    return Err(e);
                }
            }

            tx.commit().await.map_err(failure)?;
            Ok(receipt)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        timed("ping", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(failure)?;
            Ok::<_, StoreError>(())
        })
        .await
    }
}
