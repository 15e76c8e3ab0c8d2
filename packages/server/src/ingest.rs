//! Reference-material ingestion: replaces a homework's fixtures and test
//! cases, validates the dependency graph, and runs the instructor solution
//! to fill in expected outputs and time budgets.

use std::collections::{BTreeMap, BTreeSet};

use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::info;

use common::entity::{fixture, test_case};
use worker::reference::ReferenceRunner;
use worker::scheduler;

use crate::ServerError;

/// One homework dependency file. `*.bin` content is raw bytes; anything
/// else must be valid UTF-8.
#[derive(Clone, Debug)]
pub struct FixtureUpload {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct TestSpec {
    pub test_num: i32,
    pub description: String,
    pub stdin: String,
    /// Test numbers that must pass before this test runs.
    pub predecessors: Vec<i32>,
}

/// One graded track of a homework (assignment or challenge), with the
/// instructor solution whose runs define the expected outputs.
#[derive(Clone, Debug)]
pub struct ReferenceTrack {
    pub kind: String,
    pub solution_source: String,
    pub tests: Vec<TestSpec>,
}

#[derive(Clone, Debug)]
pub struct ReferenceBundle {
    pub homework: String,
    pub fixtures: Vec<FixtureUpload>,
    pub tracks: Vec<ReferenceTrack>,
}

/// Replace the homework's reference material and regenerate expected
/// outputs. Any validation or reference-run failure aborts the ingestion
/// and is surfaced to the caller.
pub async fn ingest_reference(
    db: &DatabaseConnection,
    runner: &ReferenceRunner,
    bundle: ReferenceBundle,
) -> Result<(), ServerError> {
    validate_bundle(&bundle)?;

    fixture::Entity::delete_many()
        .filter(fixture::Column::Homework.eq(&bundle.homework))
        .exec(db)
        .await?;
    test_case::Entity::delete_many()
        .filter(test_case::Column::Homework.eq(&bundle.homework))
        .exec(db)
        .await?;

    for upload in &bundle.fixtures {
        fixture::ActiveModel {
            homework: Set(bundle.homework.clone()),
            filename: Set(upload.filename.clone()),
            content: Set(upload.content.clone()),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    for track in &bundle.tracks {
        let dependents = dependents_of(&track.tests);
        for spec in &track.tests {
            test_case::ActiveModel {
                homework: Set(bundle.homework.clone()),
                kind: Set(track.kind.clone()),
                test_num: Set(spec.test_num),
                description: Set(spec.description.clone()),
                stdin: Set(spec.stdin.clone()),
                expected_stdout: Set(None),
                generated_files: Set(serde_json::Value::Array(Vec::new())),
                ref_cpu_ms: Set(0.0),
                ref_real_ms: Set(0.0),
                ref_user_ms: Set(0.0),
                ref_sys_ms: Set(0.0),
                predecessors: Set(serde_json::to_value(&spec.predecessors).unwrap_or_default()),
                dependents: Set(serde_json::to_value(
                    dependents.get(&spec.test_num).cloned().unwrap_or_default(),
                )
                .unwrap_or_default()),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }
    }

    // The reference runs fill expected stdout, generated files and timings;
    // any failure here is fatal for the whole ingestion.
    for track in &bundle.tracks {
        runner
            .generate(&bundle.homework, &track.kind, &track.solution_source)
            .await?;
    }

    info!(
        homework = %bundle.homework,
        fixtures = bundle.fixtures.len(),
        tracks = bundle.tracks.len(),
        "Reference material ingested"
    );
    Ok(())
}

/// Inverse dependency edges: for each test, the tests that declared it as
/// a predecessor.
fn dependents_of(tests: &[TestSpec]) -> BTreeMap<i32, Vec<i32>> {
    let mut dependents: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    for spec in tests {
        for &predecessor in &spec.predecessors {
            dependents.entry(predecessor).or_default().push(spec.test_num);
        }
    }
    for list in dependents.values_mut() {
        list.sort_unstable();
    }
    dependents
}

fn validate_bundle(bundle: &ReferenceBundle) -> Result<(), ServerError> {
    for upload in &bundle.fixtures {
        if !upload.filename.ends_with(".bin") && std::str::from_utf8(&upload.content).is_err() {
            return Err(ServerError::InvalidMaterial(format!(
                "text fixture {} is not valid UTF-8",
                upload.filename
            )));
        }
    }

    for track in &bundle.tracks {
        let mut seen = BTreeSet::new();
        for spec in &track.tests {
            if !seen.insert(spec.test_num) {
                return Err(ServerError::InvalidMaterial(format!(
                    "duplicate test number {} in track {}",
                    spec.test_num, track.kind
                )));
            }
        }

        // A cycle or dangling predecessor would stall the scheduler; reject
        // it here, at ingestion time.
        let specs: Vec<(i32, Vec<i32>)> = track
            .tests
            .iter()
            .map(|t| (t.test_num, t.predecessors.clone()))
            .collect();
        scheduler::validate(&specs)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(test_num: i32, predecessors: Vec<i32>) -> TestSpec {
        TestSpec {
            test_num,
            description: format!("test {test_num}"),
            stdin: String::new(),
            predecessors,
        }
    }

    fn bundle(tests: Vec<TestSpec>, fixtures: Vec<FixtureUpload>) -> ReferenceBundle {
        ReferenceBundle {
            homework: "hw1".into(),
            fixtures,
            tracks: vec![ReferenceTrack {
                kind: "DEMO".into(),
                solution_source: "int main() {}".into(),
                tests,
            }],
        }
    }

    #[test]
    fn test_dependents_are_inverse_edges() {
        let tests = vec![spec(1, vec![]), spec(2, vec![1]), spec(3, vec![1, 2])];
        let dependents = dependents_of(&tests);
        assert_eq!(dependents.get(&1), Some(&vec![2, 3]));
        assert_eq!(dependents.get(&2), Some(&vec![3]));
        assert_eq!(dependents.get(&3), None);
    }

    #[test]
    fn test_validate_rejects_duplicate_test_numbers() {
        let err = validate_bundle(&bundle(vec![spec(1, vec![]), spec(1, vec![])], vec![]))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidMaterial(_)));
    }

    #[test]
    fn test_validate_rejects_cycles() {
        let err = validate_bundle(&bundle(vec![spec(1, vec![2]), spec(2, vec![1])], vec![]))
            .unwrap_err();
        assert!(matches!(err, ServerError::Graph(_)));
    }

    #[test]
    fn test_validate_rejects_non_utf8_text_fixture() {
        let err = validate_bundle(&bundle(
            vec![spec(1, vec![])],
            vec![FixtureUpload {
                filename: "input01.txt".into(),
                content: vec![0xff, 0xfe],
            }],
        ))
        .unwrap_err();
        assert!(matches!(err, ServerError::InvalidMaterial(_)));
    }

    #[test]
    fn test_validate_allows_binary_fixture_bytes() {
        let ok = validate_bundle(&bundle(
            vec![spec(1, vec![])],
            vec![FixtureUpload {
                filename: "pairs.bin".into(),
                content: vec![0xff, 0xfe],
            }],
        ));
        assert!(ok.is_ok());
    }
}
