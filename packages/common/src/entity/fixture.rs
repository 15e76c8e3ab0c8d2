use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-homework dependency file copied into every scratch directory before
/// a run. `*.bin` fixtures are raw bytes; everything else is UTF-8 text.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fixture")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub homework: String,
    pub filename: String,

    #[sea_orm(column_type = "Blob")]
    pub content: Vec<u8>,
}

impl Model {
    pub fn is_binary(&self) -> bool {
        self.filename.ends_with(".bin")
    }
}

impl ActiveModelBehavior for ActiveModel {}
