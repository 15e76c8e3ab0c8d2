//! Pipeline scenarios over the dependency scheduler, the dispatcher and
//! the completion barrier, using the in-memory transient store. Sandboxed
//! runs are scripted: each test number maps to a fixed outcome.

use std::collections::HashMap;
use std::sync::Arc;

use common::{CorrectnessTier, Verdict};
use worker::barrier::{Aggregate, CompletionBarrier, MemoryListStore};
use worker::dispatch::Dispatcher;
use worker::engine::TestOutcome;
use worker::scheduler::DependencyScheduler;

#[derive(Clone, Copy)]
struct Scripted {
    verdict: Verdict,
    student_cpu_ms: f64,
    reference_cpu_ms: f64,
    similarity: f64,
}

fn scripted(verdict: Verdict, student: f64, reference: f64, similarity: f64) -> Scripted {
    Scripted {
        verdict,
        student_cpu_ms: student,
        reference_cpu_ms: reference,
        similarity,
    }
}

/// Drive the execute-stage control loop with scripted runs. Returns the
/// aggregate together with how many times the barrier fired and which
/// tests actually ran.
async fn run_pipeline(
    specs: &[(i32, Vec<i32>)],
    script: &HashMap<i32, Scripted>,
) -> (Option<Aggregate>, usize, Vec<i32>) {
    let barrier = Arc::new(CompletionBarrier::new(Arc::new(MemoryListStore::default())));
    let dispatcher = Dispatcher::new(2);
    let mut scheduler = DependencyScheduler::new(specs).unwrap();
    let expected_total = scheduler.total();

    let mut fired = 0usize;
    let mut aggregate = None;
    let mut executed = Vec::new();

    let mut join_set = tokio::task::JoinSet::new();
    let spawn = |join_set: &mut tokio::task::JoinSet<TestOutcome>,
                 dispatcher: &Dispatcher,
                 test_num: i32,
                 run: Scripted| {
        let dispatcher = dispatcher.clone();
        join_set.spawn(async move {
            dispatcher
                .run(async move {
                    TestOutcome {
                        test_num,
                        verdict: run.verdict,
                        student_cpu_ms: run.student_cpu_ms,
                        reference_cpu_ms: run.reference_cpu_ms,
                        similarity: run.similarity,
                    }
                })
                .await
        });
    };

    for test_num in scheduler.take_ready() {
        executed.push(test_num);
        spawn(&mut join_set, &dispatcher, test_num, script[&test_num]);
    }

    while let Some(joined) = join_set.join_next().await {
        let outcome = joined.unwrap();
        if let Some(agg) = barrier
            .record("sub", &outcome, expected_total)
            .await
            .unwrap()
        {
            fired += 1;
            aggregate = Some(agg);
        }

        let step = scheduler.record_result(outcome.test_num, outcome.verdict.is_accepted());
        for pruned in step.pruned {
            let skipped = TestOutcome {
                test_num: pruned,
                verdict: Verdict::Sk,
                student_cpu_ms: -1.0,
                reference_cpu_ms: script[&pruned].reference_cpu_ms,
                similarity: -1.0,
            };
            if let Some(agg) = barrier
                .record("sub", &skipped, expected_total)
                .await
                .unwrap()
            {
                fired += 1;
                aggregate = Some(agg);
            }
        }
        for ready in step.newly_ready {
            executed.push(ready);
            spawn(&mut join_set, &dispatcher, ready, script[&ready]);
        }
    }

    executed.sort_unstable();
    (aggregate, fired, executed)
}

#[tokio::test]
async fn test_independent_tests_mixed_outcome() {
    // Reference CPU [100, 200, 300] ms, student [120, crashed, 330]:
    // ratio (120 + 330) / (100 + 300) = 1.125, tier mixed.
    let specs = vec![(1, vec![]), (2, vec![]), (3, vec![])];
    let script = HashMap::from([
        (1, scripted(Verdict::Ac, 120.0, 100.0, 100.0)),
        (2, scripted(Verdict::Re, -1.0, 200.0, -1.0)),
        (3, scripted(Verdict::Ac, 330.0, 300.0, 100.0)),
    ]);

    let (aggregate, fired, executed) = run_pipeline(&specs, &script).await;
    let aggregate = aggregate.unwrap();

    assert_eq!(fired, 1);
    assert_eq!(executed, vec![1, 2, 3]);
    assert!((aggregate.avg_cpu_time - 1.125).abs() < 1e-9);
    assert_eq!(aggregate.tier, CorrectnessTier::Mixed);
    assert_eq!(
        aggregate.verdicts,
        vec![Verdict::Ac, Verdict::Re, Verdict::Ac]
    );
}

#[tokio::test]
async fn test_chain_prunes_after_failure() {
    // 1 -> 2 -> 3 with test 1 wrong: only test 1 runs, 2 and 3 are
    // recorded as skipped, and the barrier still fires exactly once.
    let specs = vec![(1, vec![]), (2, vec![1]), (3, vec![2])];
    let script = HashMap::from([
        (1, scripted(Verdict::Wa, 50.0, 100.0, 10.0)),
        (2, scripted(Verdict::Ac, 50.0, 100.0, 100.0)),
        (3, scripted(Verdict::Ac, 50.0, 100.0, 100.0)),
    ]);

    let (aggregate, fired, executed) = run_pipeline(&specs, &script).await;
    let aggregate = aggregate.unwrap();

    assert_eq!(fired, 1);
    assert_eq!(executed, vec![1]);
    assert_eq!(
        aggregate.verdicts,
        vec![Verdict::Wa, Verdict::Sk, Verdict::Sk]
    );
    assert_eq!(aggregate.tier, CorrectnessTier::AllFailed);
    // The failed test still ran, so its time participates.
    assert!((aggregate.avg_cpu_time - 0.5).abs() < 1e-9);
    assert!((aggregate.min_similarity - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_diamond_partial_prune() {
    // 1 -> {2, 3} -> 4: test 2 fails, so 4 is pruned but 3 still runs.
    let specs = vec![(1, vec![]), (2, vec![1]), (3, vec![1]), (4, vec![2, 3])];
    let script = HashMap::from([
        (1, scripted(Verdict::Ac, 100.0, 100.0, 100.0)),
        (2, scripted(Verdict::Re, -1.0, 100.0, -1.0)),
        (3, scripted(Verdict::Ac, 100.0, 100.0, 95.0)),
        (4, scripted(Verdict::Ac, 100.0, 100.0, 100.0)),
    ]);

    let (aggregate, fired, executed) = run_pipeline(&specs, &script).await;
    let aggregate = aggregate.unwrap();

    assert_eq!(fired, 1);
    assert_eq!(executed, vec![1, 2, 3]);
    assert_eq!(
        aggregate.verdicts,
        vec![Verdict::Ac, Verdict::Re, Verdict::Ac, Verdict::Sk]
    );
    assert_eq!(aggregate.tier, CorrectnessTier::Mixed);
    assert!((aggregate.min_similarity - 95.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_all_pass_chain_runs_in_dependency_order() {
    let specs = vec![(1, vec![]), (2, vec![1]), (3, vec![2])];
    let script = HashMap::from([
        (1, scripted(Verdict::Ac, 90.0, 100.0, 100.0)),
        (2, scripted(Verdict::Ac, 190.0, 200.0, 100.0)),
        (3, scripted(Verdict::Ac, 280.0, 300.0, 100.0)),
    ]);

    let (aggregate, fired, executed) = run_pipeline(&specs, &script).await;
    let aggregate = aggregate.unwrap();

    assert_eq!(fired, 1);
    assert_eq!(executed, vec![1, 2, 3]);
    assert_eq!(aggregate.tier, CorrectnessTier::AllPassed);
    assert!((aggregate.avg_cpu_time - (90.0 + 190.0 + 280.0) / 600.0).abs() < 1e-9);
}
