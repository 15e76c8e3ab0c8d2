use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Verdict;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "aggregate_result")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub filename: String,

    pub homework: String,
    pub kind: String,
    pub upload_id: String,

    /// Average student/reference CPU-time ratio; -999 when no test produced
    /// a positive student time (and for compile failures).
    pub avg_cpu_time: f64,
    /// Minimum similarity across tests; -1 when no entry applies.
    pub min_similarity: f64,

    /// JSON array of verdict strings ordered by test number.
    #[sea_orm(column_type = "JsonBinary")]
    pub verdicts: serde_json::Value,

    /// 1 all pass, 2 mixed, 3 all fail, 0 did not compile.
    pub tier: i16,

    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn verdict_list(&self) -> Vec<Verdict> {
        serde_json::from_value(self.verdicts.clone()).unwrap_or_default()
    }
}

impl ActiveModelBehavior for ActiveModel {}
