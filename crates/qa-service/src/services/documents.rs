//! Presenter documents and read-only lookups.

use super::require_document;
use crate::errors::QaError;
use crate::models::{DocumentContent, QuestionSummary};
use crate::store::{ChangeSet, EntityStore, Mutation};
use common::types::{DocumentId, MeetingId, QuestionId, UserId};
use tracing::instrument;

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Set a document's URL and script. An empty string leaves that field as it
/// was. Returns the owning meeting.
///
/// # Errors
///
/// `QaError::NotFound` - unknown document
#[instrument(skip_all, name = "qa.service.register_document", fields(document_id = %document_id))]
pub async fn register_document(
    store: &dyn EntityStore,
    document_id: DocumentId,
    url: &str,
    script: &str,
) -> Result<MeetingId, QaError> {
    let document = require_document(store, document_id).await?;

    let url = non_empty(url);
    let script = non_empty(script);
    if url.is_none() && script.is_none() {
        return Ok(document.meeting_id);
    }

    store
        .commit(ChangeSet::new().with(Mutation::UpdateDocument {
            document_id,
            url,
            script,
        }))
        .await?;

    Ok(document.meeting_id)
}

/// URL and script of a document; unset fields come back empty.
pub async fn document_content(
    store: &dyn EntityStore,
    document_id: DocumentId,
) -> Result<DocumentContent, QaError> {
    let document = require_document(store, document_id).await?;
    Ok(DocumentContent {
        url: document.url.unwrap_or_default(),
        script: document.script.unwrap_or_default(),
    })
}

/// Display name of a user.
pub async fn user_name(store: &dyn EntityStore, user_id: &UserId) -> Result<String, QaError> {
    store
        .get_user(user_id)
        .await?
        .map(|user| user.user_name)
        .ok_or_else(|| QaError::NotFound(format!("user {user_id}")))
}

/// Body and page of a question.
pub async fn question_summary(
    store: &dyn EntityStore,
    question_id: QuestionId,
) -> Result<QuestionSummary, QaError> {
    store
        .get_question(question_id)
        .await?
        .map(|q| QuestionSummary {
            body: q.body,
            page: q.page,
        })
        .ok_or_else(|| QaError::NotFound(format!("question {question_id}")))
}

/// The document `user_id` presents in `meeting_id`.
pub async fn document_for(
    store: &dyn EntityStore,
    user_id: &UserId,
    meeting_id: MeetingId,
) -> Result<DocumentId, QaError> {
    store
        .find_document(meeting_id, user_id)
        .await?
        .map(|d| d.document_id)
        .ok_or_else(|| QaError::NotFound(format!("document of {user_id} in meeting {meeting_id}")))
}

/// Who presents a document.
pub async fn presenter_of(
    store: &dyn EntityStore,
    document_id: DocumentId,
) -> Result<UserId, QaError> {
    Ok(require_document(store, document_id).await?.user_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::test_support::seed;
    use common::types::Page;

    #[tokio::test]
    async fn test_register_document_keeps_fields_given_empty_strings() {
        let seeded = seed(&["p0"], &[]).await;
        let doc = seeded.documents[0];

        let meeting = register_document(&seeded.store, doc, "https://slides.example/p0", "")
            .await
            .unwrap();
        assert_eq!(meeting, seeded.meeting_id);

        register_document(&seeded.store, doc, "", "Intro, results, next steps")
            .await
            .unwrap();

        let content = document_content(&seeded.store, doc).await.unwrap();
        assert_eq!(content.url, "https://slides.example/p0");
        assert_eq!(content.script, "Intro, results, next steps");
    }

    #[tokio::test]
    async fn test_unset_document_content_is_empty() {
        let seeded = seed(&["p0"], &[]).await;

        let content = document_content(&seeded.store, seeded.documents[0])
            .await
            .unwrap();
        assert!(content.url.is_empty());
        assert!(content.script.is_empty());
    }

    #[tokio::test]
    async fn test_lookups() {
        let seeded = seed(&["p0", "p1"], &[]).await;
        let p1 = UserId::from("p1");

        assert_eq!(user_name(&seeded.store, &p1).await.unwrap(), "p1 name");
        let doc = document_for(&seeded.store, &p1, seeded.meeting_id)
            .await
            .unwrap();
        assert_eq!(doc, seeded.documents[1]);
        assert_eq!(presenter_of(&seeded.store, doc).await.unwrap(), p1);

        let submitted = crate::services::roster::submit_question(
            &seeded.store,
            &UserId::from("p0"),
            doc,
            Page(7),
            "How was this measured?",
        )
        .await
        .unwrap();
        let summary = question_summary(&seeded.store, submitted.question_id)
            .await
            .unwrap();
        assert_eq!(summary.body, "How was this measured?");
        assert_eq!(summary.page, Page(7));
    }

    #[tokio::test]
    async fn test_lookups_report_not_found() {
        let seeded = seed(&["p0"], &[]).await;

        assert!(user_name(&seeded.store, &UserId::from("ghost"))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(register_document(&seeded.store, DocumentId(404), "u", "s")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(question_summary(&seeded.store, QuestionId(404))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(
            document_for(&seeded.store, &UserId::from("p0"), MeetingId(404))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
