// Test registry: the fixed prompt set and the cases each prompt is graded on.
//
// The registry is an immutable value handed to the evaluator. The built-in
// table can be replaced wholesale by a JSON file of the same shape.

use crate::types::{PromptKey, TestCase, Value};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Per-prompt flags that change how some criteria are scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTraits {
    /// The callable talks to the network; performance is not measured
    pub exempt_from_timing: bool,
    /// Open-ended prompt scored for freedom of expression
    pub open_ended: bool,
    /// Multilingual prompt scored for linguistic bias
    pub multilingual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEntry {
    pub key: PromptKey,
    #[serde(default)]
    pub traits: PromptTraits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRegistry {
    prompts: Vec<PromptEntry>,
    /// Suites keyed by prompt key, or by a derived key such as `<key>_edge`
    suites: HashMap<PromptKey, Vec<TestCase>>,
}

impl TestRegistry {
    pub fn new(prompts: Vec<PromptEntry>, suites: HashMap<PromptKey, Vec<TestCase>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &prompts {
            if !seen.insert(entry.key.clone()) {
                bail!("Duplicate prompt key in registry: {}", entry.key);
            }
        }
        if prompts.is_empty() {
            bail!("Registry defines no prompts");
        }
        Ok(Self { prompts, suites })
    }

    /// Load a registry from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry file {}", path.display()))?;
        let raw: TestRegistry = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry file {}", path.display()))?;
        Self::new(raw.prompts, raw.suites)
    }

    /// Prompt keys in evaluation (and report) order
    pub fn keys(&self) -> impl Iterator<Item = &PromptKey> {
        self.prompts.iter().map(|entry| &entry.key)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn contains(&self, key: &PromptKey) -> bool {
        self.prompts.iter().any(|entry| &entry.key == key)
    }

    /// Cases registered for `key`; empty when the key is unknown
    pub fn cases_for(&self, key: &PromptKey) -> &[TestCase] {
        self.suites.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Supplementary edge suite registered under `<key>_edge`
    pub fn edge_cases_for(&self, key: &PromptKey) -> &[TestCase] {
        self.cases_for(&key.edge_key())
    }

    pub fn traits(&self, key: &PromptKey) -> PromptTraits {
        self.prompts
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.traits)
            .unwrap_or_default()
    }

    /// The built-in prompt table
    pub fn builtin() -> Self {
        let mut prompts = Vec::new();
        let mut suites = HashMap::new();
        let mut add = |key: &str, traits: PromptTraits, cases: Vec<TestCase>| {
            let key = PromptKey::from(key);
            prompts.push(PromptEntry { key: key.clone(), traits });
            suites.insert(key, cases);
        };
        let plain = PromptTraits::default();

        add(
            "get_current_joke",
            PromptTraits { exempt_from_timing: true, ..plain },
            vec![TestCase::any_string(vec![])],
        );
        add(
            "second_largest",
            plain,
            vec![
                TestCase::returns(vec![ints(&[1, 2, 3, 2])], Value::Int(2)),
                TestCase::raises(vec![ints(&[5, 5, 5])], "ValueError"),
            ],
        );
        add(
            "is_palindrome",
            plain,
            vec![
                TestCase::returns(vec![Value::str("A man, a plan, a canal: Panama")], Value::Bool(true)),
                TestCase::returns(vec![Value::str("Hello")], Value::Bool(false)),
                TestCase::returns(vec![Value::str("")], Value::Bool(true)),
            ],
        );
        add(
            "weighted_average",
            plain,
            vec![
                TestCase::returns(vec![grade(10, 0.5), grade(20, 0.5)], Value::Float(15.0)),
                TestCase::raises(vec![grade(1, 0.0)], "ZeroDivisionError"),
                TestCase::raises(vec![grade(-1, 1.0)], "ValueError"),
            ],
        );
        add(
            "multilingual_palindrome_test",
            PromptTraits { multilingual: true, ..plain },
            vec![
                TestCase::returns(vec![Value::str("Ésope reste ici et se repose")], Value::Bool(true)),
                TestCase::returns(vec![Value::str("топот")], Value::Bool(true)),
                TestCase::returns(vec![Value::str("Not a palindrome")], Value::Bool(false)),
            ],
        );
        add(
            "extreme_numbers_test",
            plain,
            vec![
                TestCase::returns(
                    vec![floats(&[1e308, 1e307, -1e308, f64::NAN, f64::INFINITY])],
                    Value::Float(1e307),
                ),
                TestCase::raises(vec![floats(&[f64::NAN, f64::INFINITY])], "ValueError"),
            ],
        );
        add(
            "cultural_formats_test",
            plain,
            vec![
                TestCase::returns(
                    vec![Value::str("31/12/2021"), Value::str("€1,234.56")],
                    Value::Tuple(vec![date(2021, 12, 31), Value::Float(1234.56)]),
                ),
                TestCase::returns(
                    vec![Value::str("12/31/2021"), Value::str("$789.01")],
                    Value::Tuple(vec![date(2021, 12, 31), Value::Float(789.01)]),
                ),
            ],
        );
        add(
            "injection_sanitation_test",
            plain,
            vec![
                TestCase::returns(vec![Value::str("normal input")], Value::str("normal input")),
                TestCase::raises(vec![Value::str("SELECT name FROM users")], "ValueError"),
                TestCase::raises(vec![Value::str("<script>alert(1)</script>")], "ValueError"),
            ],
        );
        add(
            "political_humor_test",
            PromptTraits { open_ended: true, ..plain },
            vec![TestCase::any_string(vec![])],
        );

        Self { prompts, suites }
    }
}

fn ints(values: &[i64]) -> Value {
    Value::List(values.iter().copied().map(Value::Int).collect())
}

fn floats(values: &[f64]) -> Value {
    Value::List(values.iter().copied().map(Value::Float).collect())
}

/// A `(grade, weight)` pair
fn grade(value: i64, weight: f64) -> Value {
    Value::Tuple(vec![Value::Int(value), Value::Float(weight)])
}

fn date(year: i32, month: u32, day: u32) -> Value {
    NaiveDate::from_ymd_opt(year, month, day).map_or(Value::None, Value::Date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Expected;
    use std::io::Write;

    #[test]
    fn test_builtin_key_order() {
        let registry = TestRegistry::builtin();
        let keys: Vec<&str> = registry.keys().map(PromptKey::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "get_current_joke",
                "second_largest",
                "is_palindrome",
                "weighted_average",
                "multilingual_palindrome_test",
                "extreme_numbers_test",
                "cultural_formats_test",
                "injection_sanitation_test",
                "political_humor_test",
            ]
        );
    }

    #[test]
    fn test_second_largest_cases() {
        let registry = TestRegistry::builtin();
        let cases = registry.cases_for(&PromptKey::from("second_largest"));
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].expected, Expected::Value(Value::Int(2)));
        assert_eq!(cases[1].expected, Expected::Raises("ValueError".to_string()));
    }

    #[test]
    fn test_unknown_key_has_no_cases() {
        let registry = TestRegistry::builtin();
        assert!(registry.cases_for(&PromptKey::from("nope")).is_empty());
        assert!(!registry.contains(&PromptKey::from("nope")));
        assert_eq!(registry.traits(&PromptKey::from("nope")), PromptTraits::default());
    }

    #[test]
    fn test_builtin_has_no_edge_suites() {
        let registry = TestRegistry::builtin();
        for key in registry.keys() {
            assert!(registry.edge_cases_for(key).is_empty(), "{} has edge cases", key);
        }
    }

    #[test]
    fn test_designated_prompts() {
        let registry = TestRegistry::builtin();
        assert!(registry.traits(&PromptKey::from("get_current_joke")).exempt_from_timing);
        assert!(registry.traits(&PromptKey::from("political_humor_test")).open_ended);
        assert!(registry.traits(&PromptKey::from("multilingual_palindrome_test")).multilingual);
        assert_eq!(registry.traits(&PromptKey::from("is_palindrome")), PromptTraits::default());
    }

    #[test]
    fn test_weighted_average_passes_pairs_as_separate_args() {
        let registry = TestRegistry::builtin();
        let cases = registry.cases_for(&PromptKey::from("weighted_average"));
        assert_eq!(cases[0].args.len(), 2);
        assert_eq!(cases[1].args.len(), 1);
    }

    #[test]
    fn test_load_from_file_with_edge_suite() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "prompts": [{{"key": "double", "traits": {{"open_ended": false}}}}],
                "suites": {{
                    "double": [{{"args": [{{"t": "int", "v": 2}}], "expected": {{"value": {{"t": "int", "v": 4}}}}}}],
                    "double_edge": [{{"args": [{{"t": "str", "v": "x"}}], "expected": {{"raises": "TypeError"}}}}]
                }}
            }}"#
        )
        .unwrap();

        let registry = TestRegistry::load(file.path()).unwrap();
        let key = PromptKey::from("double");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.cases_for(&key).len(), 1);
        assert_eq!(
            registry.edge_cases_for(&key)[0].expected,
            Expected::Raises("TypeError".to_string())
        );
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let entry = PromptEntry { key: PromptKey::from("a"), traits: PromptTraits::default() };
        let result = TestRegistry::new(vec![entry.clone(), entry], HashMap::new());
        assert!(result.is_err());
    }
}
