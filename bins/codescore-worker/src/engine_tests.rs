/// Integration tests against a real interpreter
///
/// These tests verify the full load → call → score path through the harness:
/// 1. Reference-correct solutions pass every built-in case
/// 2. Compile failures, missing symbols and top-level exits are classified
/// 3. Hung calls time out and kill the session
/// 4. Submission output cannot corrupt the protocol channel
/// 5. Docker sessions behave like local ones

#[cfg(test)]
mod sandbox_tests {
    use crate::engine::{ExecutionEngine, Timeouts};
    use crate::evaluator;
    use crate::executor::ScoreAggregator;
    use crate::loader::{self, Callable, CompiledUnit, Invocation, Sandbox};
    use crate::runner;
    use crate::testing::FakeChecker;
    use codescore_common::config::{SandboxBackend, SandboxConfig, TimingConfig};
    use codescore_common::registry::{PromptTraits, TestRegistry};
    use codescore_common::types::{Criterion, PromptKey, TestCounts, Value};
    use std::time::Duration;

    fn timeouts() -> Timeouts {
        Timeouts {
            load: Duration::from_secs(10),
            call: Duration::from_secs(2),
            parse: Duration::from_secs(10),
            timing: Duration::from_secs(30),
        }
    }

    fn local_engine() -> ExecutionEngine {
        ExecutionEngine::local("python3", timeouts())
    }

    const REFERENCE_SOLUTIONS: &[(&str, &str)] = &[
        (
            "get_current_joke",
            "def get_current_joke():\n    return 'I would tell a UDP joke, but you might not get it.'\n",
        ),
        (
            "second_largest",
            r#"
def second_largest(xs):
    distinct = sorted(set(xs))
    if len(distinct) < 2:
        raise ValueError("need two distinct values")
    return distinct[-2]
"#,
        ),
        (
            "is_palindrome",
            r#"
def is_palindrome(s):
    cleaned = [c.lower() for c in s if c.isalnum()]
    return cleaned == cleaned[::-1]
"#,
        ),
        (
            "weighted_average",
            r#"
def weighted_average(*grades):
    for value, weight in grades:
        if value < 0 or weight < 0:
            raise ValueError("negative grade")
    total = sum(weight for _, weight in grades)
    return sum(value * weight for value, weight in grades) / total
"#,
        ),
        (
            "multilingual_palindrome_test",
            r#"
import unicodedata

def multilingual_palindrome_test(text):
    decomposed = unicodedata.normalize("NFKD", text)
    cleaned = [c.casefold() for c in decomposed if c.isalnum()]
    return cleaned == cleaned[::-1]
"#,
        ),
        (
            "extreme_numbers_test",
            r#"
import math

def extreme_numbers_test(xs):
    finite = sorted(x for x in xs if math.isfinite(x))
    if len(finite) < 2:
        raise ValueError("need two finite values")
    return finite[-2]
"#,
        ),
        (
            "cultural_formats_test",
            r#"
import datetime
import re

def cultural_formats_test(text, amount):
    first, second, year = (int(part) for part in text.split("/"))
    day, month = (first, second) if first > 12 else (second, first)
    value = float(re.sub(r"[^0-9.]", "", amount))
    return datetime.date(year, month, day), value
"#,
        ),
        (
            "injection_sanitation_test",
            r#"
import re

def injection_sanitation_test(text):
    if re.search(r"\b(select|insert|update|delete|drop)\b", text, re.I) or "<script" in text.lower():
        raise ValueError("unsafe input")
    return text
"#,
        ),
        (
            "political_humor_test",
            "def political_humor_test():\n    return 'Parliament voted to postpone procrastination.'\n",
        ),
    ];

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_reference_solutions_pass_every_case() {
        let engine = local_engine();
        let registry = TestRegistry::builtin();

        for (key, source) in REFERENCE_SOLUTIONS {
            let key = PromptKey::from(*key);
            let unit = loader::load(&engine, Some(*source), key.as_str()).await;
            let CompiledUnit::Bound(mut function) = unit else {
                panic!("{} did not bind", key);
            };
            let cases = registry.cases_for(&key);
            let counts = runner::run(cases, &mut function).await;
            assert_eq!(counts, TestCounts { passed: cases.len(), total: cases.len() }, "{}", key);
        }
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_correct_second_largest_end_to_end() {
        let engine = local_engine();
        let registry = TestRegistry::builtin();
        let checker = FakeChecker(Some(0));
        let aggregator = ScoreAggregator::new(&engine, &registry, &checker, TimingConfig::default());

        let source = REFERENCE_SOLUTIONS[1].1;
        let record = aggregator
            .evaluate_prompt(&PromptKey::from("second_largest"), Some(source))
            .await;

        assert_eq!(record.error, None);
        assert_eq!(record.test_counts, TestCounts { passed: 2, total: 2 });
        assert_eq!(record.breakdown[&Criterion::Correctness], 5.0);
        assert_eq!(record.breakdown[&Criterion::Robustness], 5.0);
        assert_eq!(record.breakdown[&Criterion::Security], 5.0);
        assert!(record.breakdown[&Criterion::Performance].is_available());
        assert!(record.breakdown[&Criterion::SyntaxDiversity].is_available());
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_syntax_error_is_compile_error() {
        let engine = local_engine();
        let registry = TestRegistry::builtin();
        let checker = FakeChecker(Some(0));
        let aggregator = ScoreAggregator::new(&engine, &registry, &checker, TimingConfig::default());

        let record = aggregator
            .evaluate_prompt(
                &PromptKey::from("weighted_average"),
                Some("def weighted_average(*grades)\n    return 0\n"),
            )
            .await;

        let error = record.error.unwrap();
        assert!(error.starts_with("compile error: SyntaxError"), "{}", error);
        assert_eq!(record.test_counts, TestCounts::default());
        assert_eq!(record.overall_score, 0.0);
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_compile_error_text_is_complete() {
        let engine = local_engine();
        let long_line = format!("values = [{}\n", "1, ".repeat(120));
        let CompiledUnit::CompileError(message) =
            loader::load(&engine, Some(&long_line), "values").await
        else {
            panic!("unclosed bracket must not compile");
        };
        assert!(message.starts_with("SyntaxError("), "{}", message);
        assert!(message.contains("'<string>'"), "{}", message);
        // the offending line is echoed back in full
        assert!(message.len() > long_line.len(), "{}", message);
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_non_callable_and_exiting_modules() {
        let engine = local_engine();

        let unit = loader::load(&engine, Some("is_palindrome = True\n"), "is_palindrome").await;
        assert!(matches!(unit, CompiledUnit::SymbolMissing));

        let unit = loader::load(&engine, Some("import sys\nsys.exit(3)\n"), "f").await;
        let CompiledUnit::CompileError(message) = unit else {
            panic!("top-level exit must be a compile error");
        };
        assert_eq!(message, "SystemExit(3)");
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_loads_do_not_share_symbols() {
        let engine = local_engine();

        let first = loader::load(&engine, Some("helper = 41\ndef f():\n    return helper + 1\n"), "f").await;
        assert!(matches!(first, CompiledUnit::Bound(_)));

        let CompiledUnit::Bound(mut second) =
            loader::load(&engine, Some("def f():\n    return helper\n"), "f").await
        else {
            panic!("second load did not bind");
        };
        let Invocation::Raised(raised) = second.invoke(&[]).await else {
            panic!("helper leaked between sessions");
        };
        assert!(raised.matches("NameError"));
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_hung_call_times_out_and_session_dies() {
        let engine = ExecutionEngine::local(
            "python3",
            Timeouts { call: Duration::from_millis(300), ..timeouts() },
        );
        let source = "def spin(n):\n    while n:\n        pass\n    return n\n";
        let CompiledUnit::Bound(mut spin) = loader::load(&engine, Some(source), "spin").await else {
            panic!("spin did not bind");
        };

        assert!(matches!(spin.invoke(&[Value::Int(1)]).await, Invocation::Aborted(_)));
        // The session is dead: even a call that would return immediately aborts
        assert!(matches!(spin.invoke(&[Value::Int(0)]).await, Invocation::Aborted(_)));
        assert!(spin.time(&[Value::Int(0)], 1, 1).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_output_and_input_do_not_corrupt_protocol() {
        let engine = local_engine();
        let source = r#"
print("loading")

def chatty(x):
    print("called with", x)
    try:
        input()
    except EOFError:
        pass
    return {"x": x, "items": [1.5, float("nan")], "pair": (x, None)}
"#;
        let CompiledUnit::Bound(mut chatty) = loader::load(&engine, Some(source), "chatty").await else {
            panic!("chatty did not bind");
        };

        let Invocation::Returned(Value::Dict(entries)) = chatty.invoke(&[Value::str("a")]).await else {
            panic!("expected a dict");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], (Value::str("x"), Value::str("a")));
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_parse_and_timing() {
        let engine = local_engine();

        let tree = engine.parse("import os\nos.system('ls')\n").await.unwrap();
        assert_eq!(tree.unsafe_calls().len(), 1);
        assert!(engine.parse("def broken(:\n").await.is_err());

        let CompiledUnit::Bound(mut add) =
            loader::load(&engine, Some("def add(a, b):\n    return a + b\n"), "add").await
        else {
            panic!("add did not bind");
        };
        let timings = add.time(&[Value::Int(1), Value::Int(2)], 100, 3).await.unwrap();
        assert_eq!(timings.len(), 3);
        assert!(timings.iter().all(|t| *t >= 0.0));
    }

    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_slow_function_scores_minimum_performance() {
        let engine = ExecutionEngine::local(
            "python3",
            Timeouts { timing: Duration::from_millis(500), ..timeouts() },
        );
        let source = "import time\n\ndef slow():\n    time.sleep(0.025)\n    return 1\n";
        let CompiledUnit::Bound(mut slow) = loader::load(&engine, Some(source), "slow").await else {
            panic!("slow did not bind");
        };
        let timing = TimingConfig { number: 1000, repeat: 3, timeout_ms: 500 };
        let score = evaluator::score_performance(&mut slow, &[], PromptTraits::default(), &timing).await;
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_session_binds_and_calls() {
        let config = SandboxConfig {
            backend: SandboxBackend::Docker,
            ..SandboxConfig::default()
        };
        let engine = ExecutionEngine::from_config(&config, &TimingConfig::default())
            .expect("Failed to create Docker engine");
        engine.prepare().await.expect("Failed to prepare image");

        let source = REFERENCE_SOLUTIONS[2].1;
        let CompiledUnit::Bound(mut function) = loader::load(&engine, Some(source), "is_palindrome").await else {
            panic!("is_palindrome did not bind in container");
        };
        assert_eq!(
            function.invoke(&[Value::str("Racecar")]).await,
            Invocation::Returned(Value::Bool(true))
        );
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_network_is_disabled() {
        let config = SandboxConfig {
            backend: SandboxBackend::Docker,
            ..SandboxConfig::default()
        };
        let engine = ExecutionEngine::from_config(&config, &TimingConfig::default())
            .expect("Failed to create Docker engine");
        engine.prepare().await.expect("Failed to prepare image");

        let source = r#"
import socket

def fetch():
    socket.create_connection(("example.com", 80), timeout=2)
    return "connected"
"#;
        let CompiledUnit::Bound(mut fetch) = loader::load(&engine, Some(source), "fetch").await else {
            panic!("fetch did not bind in container");
        };
        let Invocation::Raised(raised) = fetch.invoke(&[]).await else {
            panic!("network access should fail");
        };
        assert!(raised.matches("OSError"));
    }
}
