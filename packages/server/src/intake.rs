//! Submission intake: persist the upload and hand it to the compile stage.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tracing::info;
use uuid::Uuid;

use common::entity::submission;
use common::messages::CompileJob;
use common::store;
use mq::StageRouter;

use crate::ServerError;

/// An accepted upload. Filename assignment and upload validation belong to
/// the intake subsystem; this is what it hands over.
#[derive(Clone, Debug)]
pub struct NewSubmission {
    /// The student's original upload name.
    pub original_name: String,
    pub student_id: String,
    pub homework: String,
    pub kind: String,
    /// Upload batch this submission arrived in.
    pub upload_id: String,
    /// The submitted program.
    pub source: String,
    pub on_time: bool,
}

/// Persist a submission and publish its compile job. Returns the
/// server-assigned filename every derived record is keyed by.
pub async fn submit(
    db: &DatabaseConnection,
    router: &StageRouter,
    new: NewSubmission,
) -> Result<String, ServerError> {
    let filename = Uuid::new_v4().to_string();

    submission::ActiveModel {
        filename: Set(filename.clone()),
        original_name: Set(new.original_name),
        student_id: Set(new.student_id),
        homework: Set(new.homework.clone()),
        kind: Set(new.kind.clone()),
        upload_id: Set(new.upload_id),
        source: Set(new.source),
        uploaded_at: Set(Utc::now()),
        on_time: Set(new.on_time),
    }
    .insert(db)
    .await?;

    router.publish_compile(&CompileJob::new(&filename)).await?;

    info!(
        filename = %filename,
        homework = %new.homework,
        kind = %new.kind,
        "Submission accepted"
    );
    Ok(filename)
}

/// Remove every record of a withdrawn upload batch. Regrading the batch
/// means resubmitting; aggregates are regenerated from scratch.
pub async fn withdraw_batch(
    db: &DatabaseConnection,
    upload_id: &str,
) -> Result<u64, ServerError> {
    let removed = store::delete_batch(db, upload_id).await?;
    info!(upload_id, removed, "Upload batch withdrawn");
    Ok(removed)
}
