//! Reference-generation mode: runs the instructor's own solution through
//! the execution engine's materialization steps (no sandbox, no student
//! binary) to produce each test case's expected stdout, generated files and
//! time budget. Any failure here is fatal for the ingestion and surfaced to
//! the caller.

use std::path::PathBuf;
use std::time::Duration;

use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use common::entity::test_case::{self, GeneratedFile};
use common::store;

use crate::config::GradingLimits;
use crate::engine::generated_file_candidates;
use crate::sandbox::{ExitKind, Isolation, RunLimits, Sandbox, SandboxError};
use crate::stages::compile::compile_cpp;

/// Reference runs get a generous fixed budget instead of a scaled one.
const REFERENCE_TIMEOUT: Duration = Duration::from_secs(300);
const REFERENCE_OUTPUT_CAP: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference solution failed to compile: {0}")]
    CompileFailed(String),

    #[error("reference run for test {test_num} failed: {detail}")]
    RunFailed { test_num: i32, detail: String },

    #[error("reference run for test {test_num} produced no timing report")]
    MissingTiming { test_num: i32 },

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ReferenceRunner {
    db: DatabaseConnection,
    workdir: PathBuf,
    limits: GradingLimits,
}

/// Removes a build/scratch directory on every exit path.
struct DirGuard(PathBuf);

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

impl ReferenceRunner {
    pub fn new(db: DatabaseConnection, workdir: PathBuf, limits: GradingLimits) -> Self {
        Self {
            db,
            workdir,
            limits,
        }
    }

    /// Compile the instructor solution and run every test case of
    /// (homework, kind), filling in the expected fields.
    pub async fn generate(
        &self,
        homework: &str,
        kind: &str,
        solution_source: &str,
    ) -> Result<(), ReferenceError> {
        let tests = store::test_cases_for(&self.db, homework, kind).await?;
        let fixtures = store::fixtures_for(&self.db, homework).await?;
        let fixture_names: Vec<String> =
            fixtures.iter().map(|f| f.filename.clone()).collect();

        let build_dir = self.workdir.join("execute").join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&build_dir).await?;
        let _guard = DirGuard(build_dir.clone());

        let source_path = build_dir.join("solution.cpp");
        let binary_path = build_dir.join("solution");
        tokio::fs::write(&source_path, solution_source).await?;

        let compile = compile_cpp(&source_path, &binary_path).await?;
        if !compile.success {
            return Err(ReferenceError::CompileFailed(compile.stderr));
        }

        info!(homework, kind, tests = tests.len(), "Generating reference outputs");
        for test in tests {
            self.generate_one(&binary_path, &test, &fixtures, &fixture_names)
                .await?;
        }
        Ok(())
    }

    async fn generate_one(
        &self,
        binary_path: &std::path::Path,
        test: &test_case::Model,
        fixtures: &[common::entity::fixture::Model],
        fixture_names: &[String],
    ) -> Result<(), ReferenceError> {
        let scratch = self.workdir.join("execute").join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&scratch).await?;
        let _guard = DirGuard(scratch.clone());

        for fixture in fixtures {
            tokio::fs::write(scratch.join(&fixture.filename), &fixture.content).await?;
        }
        tokio::fs::copy(binary_path, scratch.join("program")).await?;
        tokio::fs::write(scratch.join("in.txt"), &test.stdin).await?;

        let run_limits = RunLimits {
            wall_timeout: REFERENCE_TIMEOUT,
            stack_kib: self.limits.stack_kib,
            output_cap_bytes: REFERENCE_OUTPUT_CAP,
        };
        let run = Sandbox::unsandboxed()
            .run(&scratch, &run_limits, Isolation::None)
            .await?;

        if run.exit != ExitKind::Success {
            return Err(ReferenceError::RunFailed {
                test_num: test.test_num,
                detail: format!("{:?}: {}", run.exit, run.stderr.trim()),
            });
        }
        let timing = run.timing.ok_or(ReferenceError::MissingTiming {
            test_num: test.test_num,
        })?;

        let mut generated = Vec::new();
        for name in generated_file_candidates(&scratch, fixture_names).await? {
            let content = tokio::fs::read_to_string(scratch.join(&name)).await?;
            generated.push(GeneratedFile {
                filename: name,
                content,
            });
        }

        let mut active = test.clone().into_active_model();
        active.expected_stdout = Set(Some(run.stdout));
        active.generated_files = Set(serde_json::to_value(&generated).unwrap_or_default());
        active.ref_cpu_ms = Set(timing.user_ms + timing.sys_ms);
        active.ref_real_ms = Set(timing.real_ms);
        active.ref_user_ms = Set(timing.user_ms);
        active.ref_sys_ms = Set(timing.sys_ms);
        active.update(&self.db).await?;

        info!(
            test_num = test.test_num,
            cpu_ms = timing.user_ms + timing.sys_ms,
            generated_files = generated.len(),
            "Reference output captured"
        );
        Ok(())
    }
}
