use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One file the reference solution wrote during its run. Submissions are
/// expected to produce the same files. Stored as a JSON array in the
/// `generated_files` column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub filename: String,
    pub content: String,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "test_case")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub homework: String,
    pub kind: String,
    /// Ordered, unique within (homework, kind).
    pub test_num: i32,
    pub description: String,

    /// Input fed to the program on stdin.
    #[sea_orm(column_type = "Text")]
    pub stdin: String,
    /// Filled in by the reference run; NULL until ingestion completes.
    #[sea_orm(column_type = "Text", nullable)]
    pub expected_stdout: Option<String>,
    /// JSON array of {filename, content} objects from the reference run.
    #[sea_orm(column_type = "JsonBinary")]
    pub generated_files: serde_json::Value,

    /// Reference solution timings in milliseconds (user+sys, wall, user,
    /// sys). The wall time sizes the student timeout; the CPU time is the
    /// denominator of the per-test time ratio.
    pub ref_cpu_ms: f64,
    pub ref_real_ms: f64,
    pub ref_user_ms: f64,
    pub ref_sys_ms: f64,

    /// JSON array of test numbers this test declares as prerequisites.
    #[sea_orm(column_type = "JsonBinary")]
    pub predecessors: serde_json::Value,
    /// JSON array of test numbers that declare this test as a prerequisite
    /// (inverse edges, derived at ingestion).
    #[sea_orm(column_type = "JsonBinary")]
    pub dependents: serde_json::Value,
}

impl Model {
    pub fn expected_files(&self) -> Vec<GeneratedFile> {
        serde_json::from_value(self.generated_files.clone()).unwrap_or_default()
    }

    pub fn predecessor_nums(&self) -> Vec<i32> {
        serde_json::from_value(self.predecessors.clone()).unwrap_or_default()
    }

    pub fn dependent_nums(&self) -> Vec<i32> {
        serde_json::from_value(self.dependents.clone()).unwrap_or_default()
    }
}

impl ActiveModelBehavior for ActiveModel {}
