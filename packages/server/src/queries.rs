//! Read-only result browsing. Pure reads against persisted records; the
//! pipeline never blocks on these.

use sea_orm::DatabaseConnection;
use serde::Serialize;

use common::Verdict;
use common::entity::{aggregate_result, compile_record};
use common::store;
use worker::diff::DiffSpan;
use worker::engine::ItemDiff;

use crate::ServerError;

/// One row of the per-test verdict listing.
#[derive(Clone, Debug, Serialize)]
pub struct TestSummary {
    pub test_num: i32,
    pub verdict: Verdict,
    pub cpu_ms: f64,
    pub relative_time: f64,
    pub similarity: f64,
}

/// Ordered per-test summaries for one submission.
pub async fn get_verdicts(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<Vec<TestSummary>, ServerError> {
    let results = store::execution_results_for(db, filename).await?;
    Ok(results
        .into_iter()
        .map(|r| TestSummary {
            test_num: r.test_num,
            verdict: r.verdict,
            cpu_ms: r.cpu_ms,
            relative_time: r.relative_time,
            similarity: r.similarity,
        })
        .collect())
}

/// The submission-level aggregate, or Pending while results are still
/// arriving.
#[derive(Clone, Debug)]
pub enum AggregateStatus {
    Pending,
    Ready(aggregate_result::Model),
}

pub async fn get_aggregate(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<AggregateStatus, ServerError> {
    Ok(match store::find_aggregate(db, filename).await? {
        Some(model) => AggregateStatus::Ready(model),
        None => AggregateStatus::Pending,
    })
}

/// The stored edit script for one item ("stdout" or a generated filename)
/// of one test. None when the item has no recorded script (missing file,
/// terminal run).
pub async fn get_diff(
    db: &DatabaseConnection,
    filename: &str,
    test_num: i32,
    item: &str,
) -> Result<Option<Vec<DiffSpan>>, ServerError> {
    let result = store::find_execution_result(db, filename, test_num)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("execution result {filename}/{test_num}"))
        })?;
    Ok(find_item_spans(&result.diff_results, item))
}

/// Compiler diagnostics for one submission, for CE browsing.
pub async fn get_compile_record(
    db: &DatabaseConnection,
    filename: &str,
) -> Result<Option<compile_record::Model>, ServerError> {
    Ok(store::find_compile_record(db, filename).await?)
}

fn find_item_spans(diff_results: &serde_json::Value, item: &str) -> Option<Vec<DiffSpan>> {
    let diffs: Vec<ItemDiff> = serde_json::from_value(diff_results.clone()).ok()?;
    diffs
        .into_iter()
        .find(|d| d.item == item)
        .and_then(|d| d.spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_diffs() -> serde_json::Value {
        serde_json::to_value(vec![
            ItemDiff {
                item: "stdout".into(),
                diff: 2,
                spans: Some(vec![
                    DiffSpan::Equal("a\n".into()),
                    DiffSpan::Delete("b\n".into()),
                    DiffSpan::Insert("c\n".into()),
                ]),
            },
            ItemDiff {
                item: "out.txt".into(),
                diff: -1,
                spans: None,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_find_item_spans_by_name() {
        let spans = find_item_spans(&sample_diffs(), "stdout").unwrap();
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_find_item_spans_missing_item() {
        assert!(find_item_spans(&sample_diffs(), "other.txt").is_none());
    }

    #[test]
    fn test_find_item_spans_item_without_script() {
        assert!(find_item_spans(&sample_diffs(), "out.txt").is_none());
    }
}
