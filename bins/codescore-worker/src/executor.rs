/// Score Aggregator - High-Level Orchestration
///
/// **Responsibility:**
/// Drive one (model, prompt) pair through load → run → score and produce its
/// `EvaluationRecord`.
///
/// **Per-prompt states:**
/// 1. No code        → "missing code" (present = false)
/// 2. Compile error  → "compile error: <repr>"
/// 3. Symbol missing → "function not found"
/// 4. Bound          → tests run, every criterion scored
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (sandbox's job)
/// - How a criterion maps onto [1, 5] (evaluator's job)

use crate::evaluator;
use crate::loader::{self, CompiledUnit, Invocation, Sandbox};
use crate::runner;
use crate::style::StyleChecker;
use codescore_common::config::TimingConfig;
use codescore_common::registry::TestRegistry;
use codescore_common::report::{self, ModelReport, Report, Submission};
use codescore_common::types::{
    Breakdown, Criterion, CriterionScore, EvaluationRecord, Expected, PromptKey, Value,
};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub struct ScoreAggregator<'a, S: ?Sized, K: ?Sized> {
    sandbox: &'a S,
    registry: &'a TestRegistry,
    checker: &'a K,
    timing: TimingConfig,
}

impl<'a, S, K> ScoreAggregator<'a, S, K>
where
    S: Sandbox + ?Sized,
    K: StyleChecker + ?Sized,
{
    pub fn new(
        sandbox: &'a S,
        registry: &'a TestRegistry,
        checker: &'a K,
        timing: TimingConfig,
    ) -> Self {
        Self {
            sandbox,
            registry,
            checker,
            timing,
        }
    }

    /// Score every submission file under `responses_dir` and write the report.
    /// A model whose file cannot be read or parsed is left out of the report.
    #[instrument(skip_all, fields(responses = %responses_dir.display()))]
    pub async fn evaluate_batch(
        &self,
        responses_dir: &Path,
        report_path: &Path,
    ) -> anyhow::Result<Report> {
        let models = report::list_models(responses_dir)?;
        info!(models = models.len(), "Submissions found");

        let mut results = Report::new();
        let start = Instant::now();

        for (model, path) in models {
            let submission = match Submission::load(&path) {
                Ok(submission) => submission,
                Err(e) => {
                    let reason = format!("{:#}", e);
                    error!(model = %model, error = %reason, "Skipping model");
                    continue;
                }
            };

            let model_start = Instant::now();
            let model_report = self.evaluate_model(&model, &submission).await;
            let scored = model_report.iter().filter(|(_, r)| r.error.is_none()).count();
            info!(
                model = %model,
                scored,
                prompts = model_report.len(),
                elapsed_ms = model_start.elapsed().as_millis(),
                "Model evaluated"
            );
            results.insert(model, model_report);
        }

        report::write_report(report_path, &results)?;
        info!(
            models = results.len(),
            report = %report_path.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Report written"
        );
        Ok(results)
    }

    /// Evaluate every registry prompt for one model, in registry order
    pub async fn evaluate_model(&self, model: &str, submission: &Submission) -> ModelReport {
        let mut report = ModelReport::new();
        for key in self.registry.keys() {
            let record = self.evaluate_prompt(key, submission.code_for(key)).await;
            match &record.error {
                Some(error) => warn!(model = %model, prompt = %key, error = %error, "Prompt not scored"),
                None => info!(
                    model = %model,
                    prompt = %key,
                    passed = record.test_counts.passed,
                    total = record.test_counts.total,
                    overall = record.overall_score,
                    "Prompt scored"
                ),
            }
            report.push(key.clone(), record);
        }
        report
    }

    pub async fn evaluate_prompt(&self, key: &PromptKey, code: Option<&str>) -> EvaluationRecord {
        match loader::load(self.sandbox, code, key.as_str()).await {
            CompiledUnit::NoCode => EvaluationRecord::missing_code(),
            CompiledUnit::CompileError(message) => EvaluationRecord::compile_error(&message),
            CompiledUnit::SymbolMissing => EvaluationRecord::function_not_found(),
            CompiledUnit::Bound(mut callable) => {
                self.score(key, code.unwrap_or_default(), &mut callable).await
            }
        }
    }

    async fn score(
        &self,
        key: &PromptKey,
        source: &str,
        callable: &mut S::Callable,
    ) -> EvaluationRecord {
        let traits = self.registry.traits(key);
        let base = self.registry.cases_for(key);

        let results = runner::run_detailed(base, callable).await;
        let counts = runner::counts(&results);

        let edge = self.registry.edge_cases_for(key);
        let robustness_counts = if edge.is_empty() {
            counts
        } else {
            runner::run(edge, callable).await
        };

        let sample = results.first().and_then(|result| match &result.invocation {
            Invocation::Returned(value) => Some(value.clone()),
            _ => None,
        });

        let timing_args: &[Value] = base
            .iter()
            .find(|case| !matches!(case.expected, Expected::Raises(_)))
            .map(|case| case.args.as_slice())
            .unwrap_or(&[]);

        let mut breakdown = Breakdown::new();
        breakdown.insert(Criterion::Correctness, evaluator::score_from_tests(counts));
        breakdown.insert(
            Criterion::Robustness,
            evaluator::score_from_tests(robustness_counts),
        );
        breakdown.insert(
            Criterion::LinguisticBias,
            evaluator::score_linguistic_bias(traits, counts),
        );
        breakdown.insert(
            Criterion::Performance,
            evaluator::score_performance(callable, timing_args, traits, &self.timing).await,
        );
        breakdown.insert(
            Criterion::Readability,
            evaluator::score_readability(self.checker, source).await,
        );
        breakdown.insert(
            Criterion::CommentRichness,
            evaluator::score_comment_richness(source),
        );
        breakdown.insert(
            Criterion::FreedomExpression,
            evaluator::score_freedom_expression(traits, sample.as_ref()),
        );

        let (security, diversity, originality) = match self.sandbox.parse(source).await {
            Ok(tree) => {
                debug!(prompt = %key, nodes = tree.len(), "Syntax tree parsed");
                (
                    evaluator::score_security(&tree),
                    evaluator::score_syntax_diversity(&tree),
                    evaluator::score_logical_originality(&tree),
                )
            }
            Err(e) => {
                debug!(prompt = %key, error = %e, "Syntax tree unavailable");
                (
                    CriterionScore::UNAVAILABLE,
                    CriterionScore::UNAVAILABLE,
                    CriterionScore::UNAVAILABLE,
                )
            }
        };
        breakdown.insert(Criterion::Security, security);
        breakdown.insert(Criterion::SyntaxDiversity, diversity);
        breakdown.insert(Criterion::LogicalOriginality, originality);

        EvaluationRecord::scored(counts, breakdown)
    }
}
