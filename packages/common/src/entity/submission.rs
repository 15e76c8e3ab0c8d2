use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    /// Server-assigned unique name; every derived record keys off it.
    #[sea_orm(primary_key, auto_increment = false)]
    pub filename: String,

    /// The student's original upload name, used when redacting compiler
    /// diagnostics.
    pub original_name: String,
    pub student_id: String,
    pub homework: String,
    /// Assignment track ("DEMO") or challenge track ("QUIZ").
    pub kind: String,
    /// Upload batch this submission arrived in.
    pub upload_id: String,

    /// The submitted program.
    #[sea_orm(column_type = "Text")]
    pub source: String,

    pub uploaded_at: DateTimeUtc,
    pub on_time: bool,
}

impl ActiveModelBehavior for ActiveModel {}
