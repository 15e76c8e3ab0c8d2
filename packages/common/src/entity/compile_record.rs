use sea_orm::entity::prelude::*;
use sea_orm::prelude::StringLen;
use serde::{Deserialize, Serialize};

/// Outcome of the compile stage for one submission.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum CompileState {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "compile_error")]
    CompileError,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "compile_record")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub filename: String,

    pub state: CompileState,

    /// Compiler diagnostics with the server-side source path replaced by
    /// the student's original filename. None on success.
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
