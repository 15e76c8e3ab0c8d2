use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Verdict;

/// A file captured from the scratch directory after a run. `content` is
/// None when the submission never produced the file. Stored as a JSON
/// array in the `output_files` column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFile {
    pub filename: String,
    pub content: Option<String>,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "execution_result")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub filename: String,
    pub homework: String,
    pub kind: String,
    pub test_num: i32,

    pub verdict: Verdict,

    /// Student timings in milliseconds; -1 when the timing report could not
    /// be parsed.
    pub cpu_ms: f64,
    /// cpu_ms over the reference solution's cpu time.
    pub relative_time: f64,
    pub real_ms: f64,
    pub user_ms: f64,
    pub sys_ms: f64,

    #[sea_orm(column_type = "Text")]
    pub stdout: String,
    #[sea_orm(column_type = "Text")]
    pub stderr: String,

    /// JSON array of CapturedFile objects.
    #[sea_orm(column_type = "JsonBinary")]
    pub output_files: serde_json::Value,
    /// JSON array of per-item diff summaries ({item, diff, spans}).
    #[sea_orm(column_type = "JsonBinary")]
    pub diff_results: serde_json::Value,

    /// Minimum cosine similarity across stdout and generated files, 0-100;
    /// -1 when the run was terminal and no comparison applies.
    pub similarity: f64,

    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn captured_files(&self) -> Vec<CapturedFile> {
        serde_json::from_value(self.output_files.clone()).unwrap_or_default()
    }
}

impl ActiveModelBehavior for ActiveModel {}
