//! Maps a raw process outcome and an output comparison onto the verdict
//! taxonomy. Total: every (exit, output) combination lands on exactly one
//! verdict, and CE never originates here.

use common::Verdict;

use crate::sandbox::ExitKind;
use crate::text::{regularize, strip_whitespace};

/// Classify one finished run against the expected stdout.
///
/// Priority order: timeout, output cap, abnormal exit, then the three text
/// tiers — whitespace-stripped equality is AC, case-folded equality is PE,
/// anything else WA.
pub fn classify(exit: ExitKind, stdout: &str, expected_stdout: &str) -> Verdict {
    match exit {
        ExitKind::Timeout => Verdict::Tle,
        ExitKind::OutputCap => Verdict::Ole,
        ExitKind::Failed(_) => Verdict::Re,
        ExitKind::Success => {
            if strip_whitespace(stdout) == strip_whitespace(expected_stdout) {
                Verdict::Ac
            } else if strip_whitespace(&regularize(stdout))
                == strip_whitespace(&regularize(expected_stdout))
            {
                Verdict::Pe
            } else {
                Verdict::Wa
            }
        }
    }
}
