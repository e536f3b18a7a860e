// Test case runner: drives a bound callable through a suite and judges each
// outcome. Nothing raised by the submission escapes this module.

use crate::loader::{Callable, Invocation};
use codescore_common::types::{Expected, TestCase, TestCounts};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub passed: bool,
    pub invocation: Invocation,
}

/// Judge one invocation against what the case demands
///
/// - Raised: passes only if an exception was expected and it matches
///   (subclasses included)
/// - Returned: passes for `AnyString` with a string, or a value equal to the
///   expected one; a normal return never satisfies an expected exception
/// - Aborted: never passes
pub fn case_passes(expected: &Expected, outcome: &Invocation) -> bool {
    match (expected, outcome) {
        (Expected::Raises(kind), Invocation::Raised(raised)) => raised.matches(kind),
        (_, Invocation::Raised(_)) => false,
        (Expected::Raises(_), Invocation::Returned(_)) => false,
        (Expected::AnyString, Invocation::Returned(value)) => value.is_str(),
        (Expected::Value(expected), Invocation::Returned(value)) => value == expected,
        (_, Invocation::Aborted(_)) => false,
    }
}

/// Run every case in order, keeping each invocation
pub async fn run_detailed<C: Callable + ?Sized>(
    cases: &[TestCase],
    callable: &mut C,
) -> Vec<CaseResult> {
    let mut results = Vec::with_capacity(cases.len());
    for (idx, case) in cases.iter().enumerate() {
        let invocation = callable.invoke(&case.args).await;
        let passed = case_passes(&case.expected, &invocation);
        match &invocation {
            Invocation::Returned(value) => {
                debug!(case = idx + 1, passed, returned = %value, "Case finished")
            }
            Invocation::Raised(raised) => {
                debug!(case = idx + 1, passed, raised = %raised, "Case finished")
            }
            Invocation::Aborted(reason) => debug!(case = idx + 1, reason = %reason, "Case aborted"),
        }
        results.push(CaseResult { passed, invocation });
    }
    results
}

pub fn counts(results: &[CaseResult]) -> TestCounts {
    TestCounts {
        passed: results.iter().filter(|r| r.passed).count(),
        total: results.len(),
    }
}

/// `(passed, total)` for a suite; `total` always equals `cases.len()`
pub async fn run<C: Callable + ?Sized>(cases: &[TestCase], callable: &mut C) -> TestCounts {
    counts(&run_detailed(cases, callable).await)
}
