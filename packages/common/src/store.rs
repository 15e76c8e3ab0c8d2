//! Query helpers shared by the pipeline and the boundary crate.
//!
//! Inserts stay at the call sites as plain ActiveModels; this module only
//! centralizes connection setup and the lookups both sides need.

use std::time::Duration;

use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder,
};

use crate::entity::{
    aggregate_result, compile_record, execution_result, fixture, submission, test_case,
};

pub async fn init_db(db_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(max_connections)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    db.get_schema_registry("common::entity::*").sync(&db).await?;

    Ok(db)
}

pub async fn find_submission(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<Option<submission::Model>, DbErr> {
    submission::Entity::find_by_id(filename).one(db).await
}

pub async fn find_compile_record(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<Option<compile_record::Model>, DbErr> {
    compile_record::Entity::find_by_id(filename).one(db).await
}

/// Every test case of one (homework, kind), ordered by test number.
pub async fn test_cases_for(
    db: &DatabaseConnection,
    homework: &str,
    kind: &str,
) -> Result<Vec<test_case::Model>, DbErr> {
    test_case::Entity::find()
        .filter(test_case::Column::Homework.eq(homework))
        .filter(test_case::Column::Kind.eq(kind))
        .order_by_asc(test_case::Column::TestNum)
        .all(db)
        .await
}

pub async fn fixtures_for(
    db: &DatabaseConnection,
    homework: &str,
) -> Result<Vec<fixture::Model>, DbErr> {
    fixture::Entity::find()
        .filter(fixture::Column::Homework.eq(homework))
        .all(db)
        .await
}

pub async fn find_aggregate(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<Option<aggregate_result::Model>, DbErr> {
    aggregate_result::Entity::find_by_id(filename).one(db).await
}

/// Per-test results for one submission, ordered by test number.
pub async fn execution_results_for(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<Vec<execution_result::Model>, DbErr> {
    execution_result::Entity::find()
        .filter(execution_result::Column::Filename.eq(filename))
        .order_by_asc(execution_result::Column::TestNum)
        .all(db)
        .await
}

pub async fn find_execution_result(
    db: &DatabaseConnection,
    filename: &str,
    test_num: i32,
) -> Result<Option<execution_result::Model>, DbErr> {
    execution_result::Entity::find()
        .filter(execution_result::Column::Filename.eq(filename))
        .filter(execution_result::Column::TestNum.eq(test_num))
        .one(db)
        .await
}

/// Remove every record derived from a withdrawn upload batch, then the
/// submissions themselves. Aggregates for the batch can be regenerated by
/// resubmitting.
pub async fn delete_batch(db: &DatabaseConnection, upload_id: &str) -> Result<u64, DbErr> {
    let submissions = submission::Entity::find()
        .filter(submission::Column::UploadId.eq(upload_id))
        .all(db)
        .await?;

    aggregate_result::Entity::delete_many()
        .filter(aggregate_result::Column::UploadId.eq(upload_id))
        .exec(db)
        .await?;

    let mut removed = 0u64;
    for sub in &submissions {
        execution_result::Entity::delete_many()
            .filter(execution_result::Column::Filename.eq(&sub.filename))
            .exec(db)
            .await?;
        compile_record::Entity::delete_many()
            .filter(compile_record::Column::Filename.eq(&sub.filename))
            .exec(db)
            .await?;
        removed += 1;
    }

    submission::Entity::delete_many()
        .filter(submission::Column::UploadId.eq(upload_id))
        .exec(db)
        .await?;

    Ok(removed)
}
