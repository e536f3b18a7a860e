/// Metric Scorers - Per-Criterion Scoring Logic
///
/// **Core Responsibility:**
/// Map one measurement (test counts, timings, warning count, syntax tree,
/// source text) onto a `CriterionScore`.
///
/// **Critical Properties:**
/// - Every scorer is independent; a failure degrades only its own criterion
/// - 0.0 means "could not be computed", never a computed result
/// - Computed results are rounded to one decimal and lie in [1.0, 5.0]
///
/// **Scales:**
/// - tests:        1 + passed/total * 4
/// - performance:  5 at ≤ 1ms per batch, 1 at ≥ 100ms, linear between
/// - readability:  5 at 0 warnings, 1 at ≥ 20, linear between
/// - comments:     5 at ≥ 20% commented lines, linear from 1 below
/// - diversity:    1 at ≤ 20 node kinds, 5 at ≥ 80, linear between
/// - originality:  1 at ≤ 1 call shape, 5 at ≥ 10, linear between
/// - security:     1 if any unsafe call is present, otherwise 5

use crate::engine::SandboxError;
use crate::loader::{Callable, TimingError};
use crate::style::StyleChecker;
use crate::syntax::SyntaxTree;
use codescore_common::config::TimingConfig;
use codescore_common::registry::PromptTraits;
use codescore_common::types::{CriterionScore, TestCounts, Value};
use tracing::{debug, warn};

/// Correctness / robustness / linguistic bias
pub fn score_from_tests(counts: TestCounts) -> CriterionScore {
    if counts.total == 0 {
        return CriterionScore::UNAVAILABLE;
    }
    let ratio = counts.passed as f64 / counts.total as f64;
    CriterionScore::normalized(1.0 + ratio * 4.0)
}

const FAST_BATCH_SECS: f64 = 0.001;
const SLOW_BATCH_SECS: f64 = 0.1;

/// Mean batch time → score
pub fn score_from_timings(timings: &[f64]) -> CriterionScore {
    if timings.is_empty() || timings.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return CriterionScore::UNAVAILABLE;
    }
    let mean = timings.iter().sum::<f64>() / timings.len() as f64;
    if mean <= FAST_BATCH_SECS {
        return CriterionScore::MAX;
    }
    if mean >= SLOW_BATCH_SECS {
        return CriterionScore::MIN;
    }
    CriterionScore::normalized(
        5.0 - (mean - FAST_BATCH_SECS) / (SLOW_BATCH_SECS - FAST_BATCH_SECS) * 4.0,
    )
}

/// Time the bound callable inside its sandbox.
///
/// A timing request that hits its deadline has spent at least that long on
/// `repeat` batches. Once the deadline covers `repeat` slow batches the mean
/// is known to be past the slow end, so the score is the minimum rather than
/// unavailable.
pub async fn score_performance<C: Callable + ?Sized>(
    callable: &mut C,
    args: &[Value],
    traits: PromptTraits,
    timing: &TimingConfig,
) -> CriterionScore {
    if traits.exempt_from_timing {
        return CriterionScore::UNAVAILABLE;
    }
    match callable.time(args, timing.number, timing.repeat).await {
        Ok(timings) => {
            debug!(batches = timings.len(), number = timing.number, "Timing collected");
            score_from_timings(&timings)
        }
        Err(TimingError::Sandbox(SandboxError::Timeout { ms, .. }))
            if ms as f64 / 1000.0 >= timing.repeat as f64 * SLOW_BATCH_SECS =>
        {
            debug!(timeout_ms = ms, "Timing outlasted the slow threshold");
            CriterionScore::MIN
        }
        Err(e) => {
            debug!(error = %e, "Timing failed");
            CriterionScore::UNAVAILABLE
        }
    }
}

const WARNING_CEILING: usize = 20;

pub fn score_from_warnings(warnings: usize) -> CriterionScore {
    if warnings == 0 {
        return CriterionScore::MAX;
    }
    if warnings >= WARNING_CEILING {
        return CriterionScore::MIN;
    }
    CriterionScore::normalized(5.0 - (warnings as f64 / WARNING_CEILING as f64) * 4.0)
}

pub async fn score_readability<S: StyleChecker + ?Sized>(
    checker: &S,
    source: &str,
) -> CriterionScore {
    match checker.warning_count(source).await {
        Ok(warnings) => score_from_warnings(warnings),
        Err(e) => {
            warn!(error = %e, "Readability not scored");
            CriterionScore::UNAVAILABLE
        }
    }
}

pub fn score_security(tree: &SyntaxTree) -> CriterionScore {
    let unsafe_calls = tree.unsafe_calls();
    if let Some(first) = unsafe_calls.first() {
        debug!(found = unsafe_calls.len(), first = %first, "Unsafe calls detected");
        CriterionScore::MIN
    } else {
        CriterionScore::MAX
    }
}

const DOCSTRING_DELIMITERS: [&str; 2] = ["\"\"\"", "'''"];
const COMMENT_RATIO_TARGET: f64 = 0.2;

/// Share of lines that are comments or sit inside a docstring block.
/// `None` when the source has no lines.
///
/// A docstring opened and closed on one line counts once and opens nothing;
/// the line carrying a block's closing delimiter counts as commented. Both
/// rules are intentional.
pub fn comment_ratio(source: &str) -> Option<f64> {
    let mut total = 0usize;
    let mut commented = 0usize;
    let mut open_block: Option<&str> = None;

    for line in source.lines() {
        total += 1;
        let stripped = line.trim();

        if let Some(delimiter) = open_block {
            commented += 1;
            if stripped.contains(delimiter) {
                open_block = None;
            }
            continue;
        }

        if let Some(delimiter) = DOCSTRING_DELIMITERS
            .iter()
            .copied()
            .find(|d| stripped.starts_with(*d))
        {
            commented += 1;
            // `"""One line."""` opens and closes on the same line
            if !stripped[delimiter.len()..].contains(delimiter) {
                open_block = Some(delimiter);
            }
        } else if stripped.starts_with('#') {
            commented += 1;
        }
    }

    (total > 0).then(|| commented as f64 / total as f64)
}

pub fn score_comment_richness(source: &str) -> CriterionScore {
    match comment_ratio(source) {
        None => CriterionScore::UNAVAILABLE,
        Some(ratio) if ratio >= COMMENT_RATIO_TARGET => CriterionScore::MAX,
        Some(ratio) => CriterionScore::normalized(1.0 + (ratio / COMMENT_RATIO_TARGET) * 4.0),
    }
}

pub fn score_syntax_diversity(tree: &SyntaxTree) -> CriterionScore {
    let kinds = tree.node_kinds().len();
    if kinds <= 20 {
        return CriterionScore::MIN;
    }
    if kinds >= 80 {
        return CriterionScore::MAX;
    }
    CriterionScore::normalized(1.0 + (kinds - 20) as f64 / 60.0 * 4.0)
}

pub fn score_logical_originality(tree: &SyntaxTree) -> CriterionScore {
    let shapes = tree.call_shapes().len();
    if shapes <= 1 {
        return CriterionScore::MIN;
    }
    if shapes >= 10 {
        return CriterionScore::MAX;
    }
    CriterionScore::normalized(1.0 + (shapes - 1) as f64 / 9.0 * 4.0)
}

/// Only open-ended prompts are scored: full marks for any non-blank text
pub fn score_freedom_expression(traits: PromptTraits, sample: Option<&Value>) -> CriterionScore {
    if !traits.open_ended {
        return CriterionScore::UNAVAILABLE;
    }
    match sample.and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => CriterionScore::MAX,
        _ => CriterionScore::UNAVAILABLE,
    }
}

/// Only multilingual prompts are scored, over that prompt's own cases
pub fn score_linguistic_bias(traits: PromptTraits, counts: TestCounts) -> CriterionScore {
    if !traits.multilingual {
        return CriterionScore::UNAVAILABLE;
    }
    score_from_tests(counts)
}
