//! Compile stage: turns an uploaded source into a runnable binary, or a
//! terminal CE aggregate.
//!
//! On success the execute job is published only after the compile record is
//! persisted, which is what orders compile before execute for one
//! submission. On failure the tier-0 aggregate is written immediately; no
//! test ever runs.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tokio::process::Command;
use tracing::{info, warn};

use common::Verdict;
use common::entity::compile_record::{self, CompileState};
use common::entity::{aggregate_result, submission};
use common::messages::{CompileJob, ExecuteJob};
use common::store;

use crate::barrier::{NO_SIMILARITY, NO_SUCCESSFUL_RUN_RATIO};
use crate::error::WorkerError;
use crate::stages::StageContext;

pub struct CompileOutput {
    pub success: bool,
    pub stderr: String,
}

/// Compile one C++ source with the system toolchain.
pub(crate) async fn compile_cpp(
    source_path: &Path,
    out_path: &Path,
) -> std::io::Result<CompileOutput> {
    let output = Command::new("g++")
        .arg("-O2")
        .arg("-std=c++17")
        .arg(source_path)
        .arg("-o")
        .arg(out_path)
        .output()
        .await?;

    Ok(CompileOutput {
        success: output.status.success(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Replace the server-side source path in diagnostics with the student's
/// original filename.
pub fn redact_source_path(diagnostics: &str, source_path: &str, original_name: &str) -> String {
    diagnostics.replace(source_path, original_name)
}

pub async fn handle_compile_job(
    ctx: Arc<StageContext>,
    job: CompileJob,
) -> Result<(), WorkerError> {
    let sub = store::find_submission(&ctx.db, &job.filename)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("submission {}", job.filename)))?;

    // Redelivered message after a finished compile: nothing to do.
    if let Some(existing) = store::find_compile_record(&ctx.db, &sub.filename).await? {
        info!(
            filename = %sub.filename,
            state = ?existing.state,
            "Compile record already exists, skipping"
        );
        return Ok(());
    }

    info!(
        filename = %sub.filename,
        homework = %sub.homework,
        kind = %sub.kind,
        source_size = sub.source.len(),
        "Compiling submission"
    );

    let uploads = ctx.workdir.join("uploads");
    let compiled = ctx.workdir.join("compiled");
    tokio::fs::create_dir_all(&uploads).await?;
    tokio::fs::create_dir_all(&compiled).await?;

    let source_path = uploads.join(format!("{}.cpp", sub.filename));
    tokio::fs::write(&source_path, &sub.source).await?;
    let out_path = compiled.join(&sub.filename);

    let output = compile_cpp(&source_path, &out_path).await?;
    if let Err(e) = tokio::fs::remove_file(&source_path).await {
        warn!(path = %source_path.display(), error = %e, "Failed to remove staged source");
    }

    if output.success {
        compile_record::ActiveModel {
            filename: Set(sub.filename.clone()),
            state: Set(CompileState::Success),
            message: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&ctx.db)
        .await?;

        ctx.router
            .publish_execute(&ExecuteJob::new(&sub.filename))
            .await?;
        info!(filename = %sub.filename, "Compile succeeded");
    } else {
        let diagnostics = redact_source_path(
            &output.stderr,
            &source_path.to_string_lossy(),
            &sub.original_name,
        );
        compile_record::ActiveModel {
            filename: Set(sub.filename.clone()),
            state: Set(CompileState::CompileError),
            message: Set(Some(diagnostics)),
            created_at: Set(Utc::now()),
        }
        .insert(&ctx.db)
        .await?;

        persist_ce_aggregate(&ctx, &sub).await?;
        info!(filename = %sub.filename, "Compile failed, tier-0 aggregate written");
    }

    Ok(())
}

/// Compile failure is terminal for the submission: the aggregate is written
/// now, with zero execution results.
async fn persist_ce_aggregate(
    ctx: &StageContext,
    sub: &submission::Model,
) -> Result<(), WorkerError> {
    aggregate_result::ActiveModel {
        filename: Set(sub.filename.clone()),
        homework: Set(sub.homework.clone()),
        kind: Set(sub.kind.clone()),
        upload_id: Set(sub.upload_id.clone()),
        avg_cpu_time: Set(NO_SUCCESSFUL_RUN_RATIO),
        min_similarity: Set(NO_SIMILARITY),
        verdicts: Set(serde_json::to_value(vec![Verdict::Ce]).unwrap_or_default()),
        tier: Set(common::CorrectnessTier::DidNotCompile.as_i16()),
        created_at: Set(Utc::now()),
    }
    .insert(&ctx.db)
    .await?;
    Ok(())
}
