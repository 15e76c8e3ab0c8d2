//! Line-level edit scripts between expected and actual output.
//!
//! Myers' shortest-edit-script algorithm over lines, with a hard time
//! budget: past the budget the engine settles for a coarse
//! prefix/suffix script instead of blocking a grading run. Large inputs
//! are diffed on a blocking thread so they cannot stall concurrent
//! executions.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::text::regularize;

/// Budget after which the search gives up and the coarse script is used.
pub const DIFF_TIME_BUDGET: Duration = Duration::from_secs(10);

/// Combined input size above which the diff runs on a blocking thread.
const OFFLOAD_THRESHOLD_BYTES: usize = 64 * 1024;

/// Upper bound on backtrace state (rounds x endpoints). Two large, mostly
/// different outputs would otherwise grow the trace without limit; past
/// this the coarse script is used.
const MAX_TRACE_CELLS: usize = 8_000_000;

/// One span of the edit script. Concatenating Equal+Delete spans yields the
/// expected text; Equal+Insert spans yield the actual text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "snake_case")]
pub enum DiffSpan {
    Equal(String),
    Delete(String),
    Insert(String),
}

impl DiffSpan {
    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOutcome {
    pub spans: Vec<DiffSpan>,
    /// Number of non-equal spans.
    pub edit_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Byte-exact diff with an explicit time budget.
pub fn diff(expected: &str, actual: &str, budget: Duration) -> DiffOutcome {
    let deadline = Instant::now() + budget;
    let a: Vec<&str> = expected.split_inclusive('\n').collect();
    let b: Vec<&str> = actual.split_inclusive('\n').collect();

    match shortest_edit(&a, &b, deadline) {
        Some((d_final, trace)) => group(backtrack(&a, &b, d_final, &trace)),
        None => coarse_script(&a, &b),
    }
}

/// Diff after whitespace/case regularization, with the default budget.
pub fn diff_normalized(expected: &str, actual: &str) -> DiffOutcome {
    diff(&regularize(expected), &regularize(actual), DIFF_TIME_BUDGET)
}

/// Like [`diff_normalized`], but inputs above the offload threshold run on
/// a blocking thread.
pub async fn diff_normalized_off_thread(expected: String, actual: String) -> DiffOutcome {
    let expected = regularize(&expected);
    let actual = regularize(&actual);

    if expected.len() + actual.len() <= OFFLOAD_THRESHOLD_BYTES {
        return diff(&expected, &actual, DIFF_TIME_BUDGET);
    }

    let (off_expected, off_actual) = (expected.clone(), actual.clone());
    match tokio::task::spawn_blocking(move || diff(&off_expected, &off_actual, DIFF_TIME_BUDGET))
        .await
    {
        Ok(outcome) => outcome,
        // The blocking task was torn down; fall back to the coarse script.
        Err(_) => diff(&expected, &actual, Duration::ZERO),
    }
}

/// Forward pass of Myers' algorithm. Returns the edit distance and the
/// per-round furthest-reaching endpoints, or None when the deadline passed.
fn shortest_edit(a: &[&str], b: &[&str], deadline: Instant) -> Option<(usize, Vec<Vec<isize>>)> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    let offset = max + 1;
    let mut v = vec![0isize; (2 * max + 3) as usize];
    let mut trace = Vec::new();

    if max == 0 {
        return Some((0, vec![v]));
    }

    for d in 0..=max {
        if Instant::now() >= deadline {
            return None;
        }
        if (trace.len() + 1) * v.len() > MAX_TRACE_CELLS {
            return None;
        }
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                return Some((d as usize, trace));
            }
            k += 2;
        }
    }

    None
}

/// Walk the trace back from (n, m) to (0, 0), emitting per-line operations
/// in order.
fn backtrack<'a>(
    a: &[&'a str],
    b: &[&'a str],
    d_final: usize,
    trace: &[Vec<isize>],
) -> Vec<(Op, &'a str)> {
    let offset = (a.len() + b.len()) as isize + 1;
    let mut ops = Vec::new();
    let mut x = a.len() as isize;
    let mut y = b.len() as isize;

    let mut d = d_final as isize;
    while d > 0 {
        let v = &trace[d as usize];
        let k = x - y;
        let idx = (k + offset) as usize;
        let prev_k = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_idx = (prev_k + offset) as usize;
        let prev_x = v[prev_idx];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops.push((Op::Equal, a[(x - 1) as usize]));
            x -= 1;
            y -= 1;
        }
        if x == prev_x {
            ops.push((Op::Insert, b[prev_y as usize]));
        } else {
            ops.push((Op::Delete, a[prev_x as usize]));
        }
        x = prev_x;
        y = prev_y;
        d -= 1;
    }
    while x > 0 && y > 0 {
        ops.push((Op::Equal, a[(x - 1) as usize]));
        x -= 1;
        y -= 1;
    }

    ops.reverse();
    ops
}

/// Merge consecutive same-operation lines into spans.
fn group(ops: Vec<(Op, &str)>) -> DiffOutcome {
    let mut spans: Vec<DiffSpan> = Vec::new();
    for (op, line) in ops {
        match (op, spans.last_mut()) {
            (Op::Equal, Some(DiffSpan::Equal(text))) => text.push_str(line),
            (Op::Delete, Some(DiffSpan::Delete(text))) => text.push_str(line),
            (Op::Insert, Some(DiffSpan::Insert(text))) => text.push_str(line),
            (Op::Equal, _) => spans.push(DiffSpan::Equal(line.to_string())),
            (Op::Delete, _) => spans.push(DiffSpan::Delete(line.to_string())),
            (Op::Insert, _) => spans.push(DiffSpan::Insert(line.to_string())),
        }
    }
    let edit_count = spans.iter().filter(|s| !s.is_equal()).count();
    DiffOutcome { spans, edit_count }
}

/// Best-effort script when the budget is exhausted: common prefix and
/// suffix stay equal, the unresolved middle becomes one delete and one
/// insert. Still satisfies the reconstruction invariants.
fn coarse_script(a: &[&str], b: &[&str]) -> DiffOutcome {
    let mut prefix = 0;
    while prefix < a.len() && prefix < b.len() && a[prefix] == b[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < a.len() - prefix
        && suffix < b.len() - prefix
        && a[a.len() - 1 - suffix] == b[b.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mut spans = Vec::new();
    if prefix > 0 {
        spans.push(DiffSpan::Equal(a[..prefix].concat()));
    }
    if prefix < a.len() - suffix {
        spans.push(DiffSpan::Delete(a[prefix..a.len() - suffix].concat()));
    }
    if prefix < b.len() - suffix {
        spans.push(DiffSpan::Insert(b[prefix..b.len() - suffix].concat()));
    }
    if suffix > 0 {
        spans.push(DiffSpan::Equal(a[a.len() - suffix..].concat()));
    }

    let edit_count = spans.iter().filter(|s| !s.is_equal()).count();
    DiffOutcome { spans, edit_count }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(outcome: &DiffOutcome) -> (String, String) {
        let mut expected = String::new();
        let mut actual = String::new();
        for span in &outcome.spans {
            match span {
                DiffSpan::Equal(text) => {
                    expected.push_str(text);
                    actual.push_str(text);
                }
                DiffSpan::Delete(text) => expected.push_str(text),
                DiffSpan::Insert(text) => actual.push_str(text),
            }
        }
        (expected, actual)
    }

    fn assert_reconstructs(expected: &str, actual: &str, budget: Duration) {
        let outcome = diff(expected, actual, budget);
        let (re_expected, re_actual) = reconstruct(&outcome);
        assert_eq!(re_expected, expected);
        assert_eq!(re_actual, actual);
    }

    #[test]
    fn test_identical_inputs() {
        let outcome = diff("a\nb\nc\n", "a\nb\nc\n", DIFF_TIME_BUDGET);
        assert_eq!(outcome.edit_count, 0);
        assert_eq!(outcome.spans, vec![DiffSpan::Equal("a\nb\nc\n".into())]);
    }

    #[test]
    fn test_reconstruction_property() {
        let cases = [
            ("", ""),
            ("a\n", ""),
            ("", "b\n"),
            ("a\nb\nc\n", "a\nx\nc\n"),
            ("1\n2\n3\n", "1\n2\n3\n4\n"),
            ("x\ny\nz", "y\nz\nw"),
            ("no trailing newline", "no trailing newline at all"),
        ];
        for (expected, actual) in cases {
            assert_reconstructs(expected, actual, DIFF_TIME_BUDGET);
        }
    }

    #[test]
    fn test_single_line_replacement() {
        let outcome = diff("a\nb\nc\n", "a\nx\nc\n", DIFF_TIME_BUDGET);
        assert_eq!(outcome.edit_count, 2);
        assert!(outcome.spans.contains(&DiffSpan::Delete("b\n".into())));
        assert!(outcome.spans.contains(&DiffSpan::Insert("x\n".into())));
    }

    #[test]
    fn test_exhausted_budget_still_reconstructs() {
        assert_reconstructs("a\nb\nc\nd\n", "a\nq\nc\nd\n", Duration::ZERO);
        let outcome = diff("a\nb\nc\n", "a\nx\nc\n", Duration::ZERO);
        // Coarse script: shared prefix and suffix survive.
        assert_eq!(
            outcome.spans,
            vec![
                DiffSpan::Equal("a\n".into()),
                DiffSpan::Delete("b\n".into()),
                DiffSpan::Insert("x\n".into()),
                DiffSpan::Equal("c\n".into()),
            ]
        );
    }

    #[test]
    fn test_edit_count_counts_spans_not_lines() {
        let outcome = diff("a\nb\nc\n", "x\ny\nz\n", DIFF_TIME_BUDGET);
        let (re_expected, re_actual) = reconstruct(&outcome);
        assert_eq!(re_expected, "a\nb\nc\n");
        assert_eq!(re_actual, "x\ny\nz\n");
        assert_eq!(
            outcome.edit_count,
            outcome.spans.iter().filter(|s| !s.is_equal()).count()
        );
        assert!(outcome.edit_count >= 2);
    }

    #[test]
    fn test_normalized_diff_ignores_presentation() {
        let outcome = diff_normalized("A  B\n\n\nc\n", "a b\nc\n");
        assert_eq!(outcome.edit_count, 0);
    }

    #[tokio::test]
    async fn test_off_thread_matches_inline() {
        // Large enough to cross the offload threshold, with one edit.
        let expected = "line one\nline two\n".repeat(4000);
        let actual = format!("{expected}line three\n");
        let off = diff_normalized_off_thread(expected.clone(), actual.clone()).await;
        let inline = diff_normalized(&expected, &actual);
        assert_eq!(off.edit_count, 1);
        assert_eq!(off.edit_count, inline.edit_count);
    }

    #[test]
    fn test_large_divergent_inputs_fall_back_coarse() {
        // Mostly different large inputs trip the trace-size bound; the
        // coarse script must still reconstruct both sides.
        let expected: String = (0..20_000).map(|i| format!("a{i}\n")).collect();
        let actual: String = (0..20_000).map(|i| format!("b{i}\n")).collect();
        assert_reconstructs(&expected, &actual, DIFF_TIME_BUDGET);
    }

    #[test]
    fn test_span_serde_shape() {
        let json = serde_json::to_value(DiffSpan::Delete("x\n".into())).unwrap();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["text"], "x\n");
    }
}
