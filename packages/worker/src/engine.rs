//! Sandboxed execution engine: grades one (submission, test case) pair.
//!
//! Each run gets a uniquely named scratch directory populated with the
//! homework fixtures, the compiled binary and the test's stdin, runs under
//! the sandbox command template, and is scored with the verdict classifier,
//! the diff engine and the similarity scorer. The scratch directory is
//! removed unconditionally, error paths included.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use common::Verdict;
use common::entity::execution_result::{self, CapturedFile};
use common::entity::{fixture, submission, test_case};

use crate::config::GradingLimits;
use crate::diff::{self, DiffSpan};
use crate::sandbox::{Isolation, RunLimits, Sandbox};
use crate::similarity;
use crate::verdict;

/// Timing sentinel when the report was unavailable.
const NO_TIMING: f64 = -1.0;

/// Per-item diff summary persisted with the result. `diff` is -1 when no
/// comparison was possible (missing file, terminal run).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemDiff {
    pub item: String,
    pub diff: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spans: Option<Vec<DiffSpan>>,
}

/// What the engine hands to the completion barrier for one finished test.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    pub test_num: i32,
    pub verdict: Verdict,
    /// user+sys milliseconds; -1 when the timing report was unavailable.
    pub student_cpu_ms: f64,
    pub reference_cpu_ms: f64,
    /// 0-100, or -1 when no comparison applied.
    pub similarity: f64,
}

/// Removes the scratch directory when the run is done, panics and error
/// paths included.
struct ScratchGuard {
    path: PathBuf,
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

pub struct ExecutionEngine {
    db: DatabaseConnection,
    sandbox: Sandbox,
    limits: GradingLimits,
    workdir: PathBuf,
}

impl ExecutionEngine {
    pub fn new(
        db: DatabaseConnection,
        sandbox: Sandbox,
        limits: GradingLimits,
        workdir: PathBuf,
    ) -> Self {
        Self {
            db,
            sandbox,
            limits,
            workdir,
        }
    }

    pub fn compiled_path(&self, filename: &str) -> PathBuf {
        self.workdir.join("compiled").join(filename)
    }

    fn scratch_root(&self) -> PathBuf {
        self.workdir.join("execute")
    }

    /// Grade one (submission, test case) pair. Infrastructure failures are
    /// absorbed into an RE-equivalent result for this one test so sibling
    /// tests and the completion barrier are unaffected.
    pub async fn run_test(
        &self,
        sub: &submission::Model,
        test: &test_case::Model,
        fixtures: &[fixture::Model],
    ) -> TestOutcome {
        match self.try_run_test(sub, test, fixtures).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    filename = %sub.filename,
                    test_num = test.test_num,
                    error = %e,
                    "Infrastructure failure, recording RE-equivalent result"
                );
                self.record_sentinel(sub, test, Verdict::Re).await
            }
        }
    }

    /// Persist a synthetic skipped result for a test pruned by the
    /// dependency scheduler, keeping the barrier's expected count honest.
    pub async fn record_skipped(
        &self,
        sub: &submission::Model,
        test: &test_case::Model,
    ) -> TestOutcome {
        self.record_sentinel(sub, test, Verdict::Sk).await
    }

    async fn try_run_test(
        &self,
        sub: &submission::Model,
        test: &test_case::Model,
        fixtures: &[fixture::Model],
    ) -> Result<TestOutcome> {
        let scratch = self.scratch_root().join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&scratch)
            .await
            .with_context(|| format!("creating scratch dir {}", scratch.display()))?;
        let _guard = ScratchGuard {
            path: scratch.clone(),
        };

        // Binary fixtures go down as stored bytes, text fixtures were
        // validated as UTF-8 at ingestion; both are plain writes here.
        for fixture in fixtures {
            tokio::fs::write(scratch.join(&fixture.filename), &fixture.content)
                .await
                .with_context(|| format!("writing fixture {}", fixture.filename))?;
        }
        tokio::fs::copy(self.compiled_path(&sub.filename), scratch.join("program"))
            .await
            .context("copying compiled binary")?;
        tokio::fs::write(scratch.join("in.txt"), &test.stdin)
            .await
            .context("writing stdin file")?;

        let run_limits = RunLimits {
            wall_timeout: self.limits.wall_timeout_for(test.ref_real_ms),
            stack_kib: self.limits.stack_kib,
            output_cap_bytes: self.limits.output_cap(),
        };
        debug!(
            filename = %sub.filename,
            test_num = test.test_num,
            timeout_secs = run_limits.wall_timeout.as_secs(),
            "Starting sandboxed run"
        );
        let run = self
            .sandbox
            .run(&scratch, &run_limits, Isolation::Sandboxed)
            .await?;

        let expected_stdout = test.expected_stdout.clone().unwrap_or_default();
        let raw_verdict = verdict::classify(run.exit, &run.stdout, &expected_stdout);
        // Partial output from a failed run is not evidence of correctness.
        let stdout = if raw_verdict.is_terminal() {
            String::new()
        } else {
            run.stdout.clone()
        };

        let mut diffs = Vec::new();
        let stdout_diff =
            diff::diff_normalized_off_thread(expected_stdout.clone(), stdout.clone()).await;
        diffs.push(ItemDiff {
            item: "stdout".to_string(),
            diff: stdout_diff.edit_count as i64,
            spans: Some(stdout_diff.spans),
        });

        let mut captured = Vec::new();
        let mut file_similarities = Vec::new();
        for expected_file in test.expected_files() {
            if raw_verdict.is_terminal() {
                // Not read at all; recorded as missing.
                captured.push(CapturedFile {
                    filename: expected_file.filename.clone(),
                    content: None,
                });
                diffs.push(ItemDiff {
                    item: expected_file.filename,
                    diff: -1,
                    spans: None,
                });
                continue;
            }
            match tokio::fs::read_to_string(scratch.join(&expected_file.filename)).await {
                Ok(content) => {
                    let file_diff = diff::diff_normalized_off_thread(
                        expected_file.content.clone(),
                        content.clone(),
                    )
                    .await;
                    diffs.push(ItemDiff {
                        item: expected_file.filename.clone(),
                        diff: file_diff.edit_count as i64,
                        spans: Some(file_diff.spans),
                    });
                    file_similarities.push(similarity::score(&content, &expected_file.content));
                    captured.push(CapturedFile {
                        filename: expected_file.filename,
                        content: Some(content),
                    });
                }
                Err(_) => {
                    // Missing after a completed run: maximal dissimilarity.
                    file_similarities.push(0.0);
                    captured.push(CapturedFile {
                        filename: expected_file.filename.clone(),
                        content: None,
                    });
                    diffs.push(ItemDiff {
                        item: expected_file.filename,
                        diff: -1,
                        spans: None,
                    });
                }
            }
        }

        let test_similarity = if raw_verdict.is_terminal() {
            -1.0
        } else {
            let mut min = similarity::score(&stdout, &expected_stdout);
            for s in file_similarities {
                if s < min {
                    min = s;
                }
            }
            min
        };

        let (real_ms, user_ms, sys_ms) = run
            .timing
            .map(|t| (t.real_ms, t.user_ms, t.sys_ms))
            .unwrap_or((NO_TIMING, NO_TIMING, NO_TIMING));
        let cpu_ms = if run.timing.is_some() {
            user_ms + sys_ms
        } else {
            NO_TIMING
        };
        let relative_time = if run.timing.is_some() && test.ref_cpu_ms > 0.0 {
            cpu_ms / test.ref_cpu_ms
        } else {
            NO_TIMING
        };

        self.persist(
            sub,
            test,
            raw_verdict,
            cpu_ms,
            relative_time,
            real_ms,
            user_ms,
            sys_ms,
            &stdout,
            &run.stderr,
            &captured,
            &diffs,
            test_similarity,
        )
        .await?;

        Ok(TestOutcome {
            test_num: test.test_num,
            verdict: raw_verdict,
            student_cpu_ms: cpu_ms,
            reference_cpu_ms: test.ref_cpu_ms,
            similarity: test_similarity,
        })
    }

    /// Persist a result carrying only sentinels (RE-equivalent
    /// infrastructure failure, or a scheduler skip). A storage failure here
    /// is logged and the outcome still returned, so the barrier count never
    /// comes up short.
    async fn record_sentinel(
        &self,
        sub: &submission::Model,
        test: &test_case::Model,
        verdict: Verdict,
    ) -> TestOutcome {
        let diffs: Vec<ItemDiff> = std::iter::once("stdout".to_string())
            .chain(test.expected_files().into_iter().map(|f| f.filename))
            .map(|item| ItemDiff {
                item,
                diff: -1,
                spans: None,
            })
            .collect();
        let captured: Vec<CapturedFile> = test
            .expected_files()
            .into_iter()
            .map(|f| CapturedFile {
                filename: f.filename,
                content: None,
            })
            .collect();

        if let Err(e) = self
            .persist(
                sub, test, verdict, NO_TIMING, NO_TIMING, NO_TIMING, NO_TIMING, NO_TIMING, "", "",
                &captured, &diffs, -1.0,
            )
            .await
        {
            warn!(
                filename = %sub.filename,
                test_num = test.test_num,
                error = %e,
                "Failed to persist sentinel result"
            );
        }

        TestOutcome {
            test_num: test.test_num,
            verdict,
            student_cpu_ms: NO_TIMING,
            reference_cpu_ms: test.ref_cpu_ms,
            similarity: -1.0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        sub: &submission::Model,
        test: &test_case::Model,
        verdict: Verdict,
        cpu_ms: f64,
        relative_time: f64,
        real_ms: f64,
        user_ms: f64,
        sys_ms: f64,
        stdout: &str,
        stderr: &str,
        captured: &[CapturedFile],
        diffs: &[ItemDiff],
        similarity: f64,
    ) -> Result<()> {
        let model = execution_result::ActiveModel {
            filename: Set(sub.filename.clone()),
            homework: Set(sub.homework.clone()),
            kind: Set(sub.kind.clone()),
            test_num: Set(test.test_num),
            verdict: Set(verdict),
            cpu_ms: Set(cpu_ms),
            relative_time: Set(relative_time),
            real_ms: Set(real_ms),
            user_ms: Set(user_ms),
            sys_ms: Set(sys_ms),
            stdout: Set(stdout.to_string()),
            stderr: Set(stderr.to_string()),
            output_files: Set(serde_json::to_value(captured).unwrap_or_default()),
            diff_results: Set(serde_json::to_value(diffs).unwrap_or_default()),
            similarity: Set(similarity),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        model
            .insert(&self.db)
            .await
            .context("persisting execution result")?;
        Ok(())
    }
}

/// Scan a scratch directory for files the program generated: everything
/// that is not a fixture, the binary, the stdin file or the timing report,
/// restricted to the extensions reference material may declare.
pub async fn generated_file_candidates(
    dir: &Path,
    fixture_names: &[String],
) -> std::io::Result<Vec<String>> {
    const CAPTURED_EXTENSIONS: &[&str] = &["txt", "cnt", "adj"];

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "program" || name == "in.txt" || name == "time.txt" {
            continue;
        }
        if fixture_names.iter().any(|f| f == &name) {
            continue;
        }
        let captured = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| CAPTURED_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if captured {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_file_candidates_filters_infrastructure() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "program",
            "in.txt",
            "time.txt",
            "out.txt",
            "graph.adj",
            "count.cnt",
            "pairs.bin",
            "notes.log",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let names = generated_file_candidates(dir.path(), &["pairs.bin".to_string()])
            .await
            .unwrap();
        assert_eq!(names, vec!["count.cnt", "graph.adj", "out.txt"]);
    }

    #[test]
    fn test_item_diff_serde_omits_missing_spans() {
        let json = serde_json::to_value(ItemDiff {
            item: "stdout".into(),
            diff: -1,
            spans: None,
        })
        .unwrap();
        assert!(json.get("spans").is_none());
    }
}
