//! Execute stage: grades one compiled submission across its test cases.
//!
//! The dependency scheduler decides what is runnable, the dispatcher caps
//! how much of it runs at once, and every finished (or pruned) test feeds
//! the completion barrier. The barrier fires the aggregate on the last
//! expected result, wherever it lands.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use common::entity::compile_record::CompileState;
use common::entity::{aggregate_result, submission, test_case};
use common::messages::ExecuteJob;
use common::store;

use crate::barrier::Aggregate;
use crate::engine::TestOutcome;
use crate::error::WorkerError;
use crate::scheduler::DependencyScheduler;
use crate::stages::StageContext;

pub async fn handle_execute_job(
    ctx: Arc<StageContext>,
    job: ExecuteJob,
) -> Result<(), WorkerError> {
    let sub = store::find_submission(&ctx.db, &job.filename)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("submission {}", job.filename)))?;

    // Redelivery guards: a submission with an aggregate or any results has
    // already been (or is being) graded.
    if store::find_aggregate(&ctx.db, &sub.filename).await?.is_some() {
        info!(filename = %sub.filename, "Aggregate already exists, skipping");
        return Ok(());
    }
    if !store::execution_results_for(&ctx.db, &sub.filename)
        .await?
        .is_empty()
    {
        info!(filename = %sub.filename, "Execution results already exist, skipping");
        return Ok(());
    }

    let compile = store::find_compile_record(&ctx.db, &sub.filename)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("compile record for {}", sub.filename)))?;
    if compile.state != CompileState::Success {
        return Err(WorkerError::Internal(format!(
            "submission {} has no successful compile",
            sub.filename
        )));
    }

    let tests = store::test_cases_for(&ctx.db, &sub.homework, &sub.kind).await?;
    if tests.is_empty() {
        warn!(
            filename = %sub.filename,
            homework = %sub.homework,
            kind = %sub.kind,
            "No test cases for submission"
        );
        return Ok(());
    }
    let fixtures = Arc::new(store::fixtures_for(&ctx.db, &sub.homework).await?);

    let specs: Vec<(i32, Vec<i32>)> = tests
        .iter()
        .map(|t| (t.test_num, t.predecessor_nums()))
        .collect();
    let mut scheduler = DependencyScheduler::new(&specs)?;
    let expected_total = scheduler.total();

    let by_num: HashMap<i32, test_case::Model> =
        tests.into_iter().map(|t| (t.test_num, t)).collect();
    let sub = Arc::new(sub);

    info!(
        filename = %sub.filename,
        tests = expected_total,
        "Executing test cases"
    );

    let mut join_set: JoinSet<TestOutcome> = JoinSet::new();
    for test_num in scheduler.take_ready() {
        if let Some(test) = by_num.get(&test_num) {
            spawn_test(&mut join_set, &ctx, &sub, test.clone(), &fixtures);
        }
    }

    while let Some(joined) = join_set.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(filename = %sub.filename, error = %e, "Test task failed to join");
                continue;
            }
        };

        record_outcome(&ctx, &sub, &outcome, expected_total).await;

        let step = scheduler.record_result(outcome.test_num, outcome.verdict.is_accepted());
        for pruned in step.pruned {
            if let Some(test) = by_num.get(&pruned) {
                info!(
                    filename = %sub.filename,
                    test_num = pruned,
                    "Test pruned, prerequisite failed"
                );
                let skipped = ctx.engine.record_skipped(&sub, test).await;
                record_outcome(&ctx, &sub, &skipped, expected_total).await;
            }
        }
        for ready in step.newly_ready {
            if let Some(test) = by_num.get(&ready) {
                spawn_test(&mut join_set, &ctx, &sub, test.clone(), &fixtures);
            }
        }
    }

    Ok(())
}

fn spawn_test(
    join_set: &mut JoinSet<TestOutcome>,
    ctx: &Arc<StageContext>,
    sub: &Arc<submission::Model>,
    test: test_case::Model,
    fixtures: &Arc<Vec<common::entity::fixture::Model>>,
) {
    let engine = ctx.engine.clone();
    let dispatcher = ctx.dispatcher.clone();
    let sub = sub.clone();
    let fixtures = fixtures.clone();
    join_set.spawn(async move {
        dispatcher
            .run(engine.run_test(&sub, &test, &fixtures))
            .await
    });
}

/// Feed one outcome into the barrier; the append that completes the set
/// also persists the aggregate. Barrier failures are logged, not fatal for
/// sibling tests.
async fn record_outcome(
    ctx: &Arc<StageContext>,
    sub: &Arc<submission::Model>,
    outcome: &TestOutcome,
    expected_total: usize,
) {
    match ctx
        .barrier
        .record(&sub.filename, outcome, expected_total)
        .await
    {
        Ok(Some(aggregate)) => {
            if let Err(e) = persist_aggregate(ctx, sub, &aggregate).await {
                error!(filename = %sub.filename, error = %e, "Failed to persist aggregate");
            }
        }
        Ok(None) => {}
        Err(e) => {
            error!(
                filename = %sub.filename,
                test_num = outcome.test_num,
                error = %e,
                "Completion barrier append failed"
            );
        }
    }
}

async fn persist_aggregate(
    ctx: &Arc<StageContext>,
    sub: &Arc<submission::Model>,
    aggregate: &Aggregate,
) -> Result<(), WorkerError> {
    aggregate_result::ActiveModel {
        filename: Set(sub.filename.clone()),
        homework: Set(sub.homework.clone()),
        kind: Set(sub.kind.clone()),
        upload_id: Set(sub.upload_id.clone()),
        avg_cpu_time: Set(aggregate.avg_cpu_time),
        min_similarity: Set(aggregate.min_similarity),
        verdicts: Set(serde_json::to_value(&aggregate.verdicts).unwrap_or_default()),
        tier: Set(aggregate.tier.as_i16()),
        created_at: Set(Utc::now()),
    }
    .insert(&ctx.db)
    .await?;

    info!(
        filename = %sub.filename,
        tier = aggregate.tier.as_i16(),
        avg_cpu_time = aggregate.avg_cpu_time,
        min_similarity = aggregate.min_similarity,
        "Submission aggregated"
    );
    Ok(())
}
