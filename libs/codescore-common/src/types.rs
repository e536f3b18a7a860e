use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one evaluation task. The callable a submission must define
/// carries the same name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptKey(String);

impl PromptKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the supplementary edge suite for this prompt
    pub fn edge_key(&self) -> PromptKey {
        PromptKey(format!("{}_edge", self.0))
    }
}

impl fmt::Display for PromptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PromptKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A value crossing the sandbox boundary.
///
/// Wire form is `{"t": <tag>, "v": <payload>}`. Floats travel as text so that
/// NaN and the infinities survive JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_text")] f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Date(NaiveDate),
    /// Anything without a faithful encoding. Never equal to anything.
    Repr(String),
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }
}

fn int_equals_float(i: i64, f: f64) -> bool {
    f.is_finite()
        && f.fract() == 0.0
        && f >= i64::MIN as f64
        && f < i64::MAX as f64
        && f as i64 == i
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (Number::Float(a), Number::Float(b)) => a == b,
            (Number::Int(i), Number::Float(f)) | (Number::Float(f), Number::Int(i)) => {
                int_equals_float(i, f)
            }
        }
    }
}

/// Equality follows the graded language's `==`: bools, ints and floats compare
/// numerically, lists never equal tuples, dicts ignore insertion order.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Date(a), Value::Date(b)) => a == b,
            _ => false,
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => f.write_str(&float_text::format(*x)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Date(d) => write!(f, "date({})", d),
            Value::Repr(text) => f.write_str(text),
        }
    }
}

mod float_text {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(value: f64) -> String {
        if value.is_nan() {
            "nan".to_string()
        } else if value.is_infinite() {
            let text = if value > 0.0 { "inf" } else { "-inf" };
            text.to_string()
        } else {
            format!("{:?}", value)
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*value))
    }

    // Registry files may spell finite floats as plain JSON numbers
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FloatRepr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match FloatRepr::deserialize(deserializer)? {
            FloatRepr::Number(value) => Ok(value),
            FloatRepr::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|e| de::Error::custom(format!("invalid float {:?}: {}", text, e))),
        }
    }
}

/// Outcome a test case demands from the callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expected {
    /// Return a value equal to this one
    Value(Value),
    /// Return any string
    AnyString,
    /// Raise an exception of this class (or a subclass)
    Raises(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub args: Vec<Value>,
    pub expected: Expected,
}

impl TestCase {
    pub fn returns(args: Vec<Value>, value: Value) -> Self {
        Self { args, expected: Expected::Value(value) }
    }

    pub fn any_string(args: Vec<Value>) -> Self {
        Self { args, expected: Expected::AnyString }
    }

    pub fn raises(args: Vec<Value>, kind: &str) -> Self {
        Self { args, expected: Expected::Raises(kind.to_string()) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: usize,
    pub total: usize,
}

/// Scoring criteria, in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Correctness,
    Robustness,
    LinguisticBias,
    Performance,
    Readability,
    Security,
    CommentRichness,
    SyntaxDiversity,
    LogicalOriginality,
    FreedomExpression,
}

impl Criterion {
    pub const ALL: [Criterion; 10] = [
        Criterion::Correctness,
        Criterion::Robustness,
        Criterion::LinguisticBias,
        Criterion::Performance,
        Criterion::Readability,
        Criterion::Security,
        Criterion::CommentRichness,
        Criterion::SyntaxDiversity,
        Criterion::LogicalOriginality,
        Criterion::FreedomExpression,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Correctness => "correctness",
            Criterion::Robustness => "robustness",
            Criterion::LinguisticBias => "linguistic_bias",
            Criterion::Performance => "performance",
            Criterion::Readability => "readability",
            Criterion::Security => "security",
            Criterion::CommentRichness => "comment_richness",
            Criterion::SyntaxDiversity => "syntax_diversity",
            Criterion::LogicalOriginality => "logical_originality",
            Criterion::FreedomExpression => "freedom_expression",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to one decimal place, ties to even on the exact binary value.
/// `2.55` is stored just below the tie and rounds down to 2.5.
pub fn round_tenth(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.1}", value).parse().unwrap_or(value)
}

/// Normalized score in [1.0, 5.0]; exactly 0.0 means "could not be computed".
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriterionScore(f64);

impl CriterionScore {
    pub const UNAVAILABLE: CriterionScore = CriterionScore(0.0);
    pub const MIN: CriterionScore = CriterionScore(1.0);
    pub const MAX: CriterionScore = CriterionScore(5.0);

    /// Rounds to one decimal and clamps into [1.0, 5.0].
    pub fn normalized(value: f64) -> Self {
        CriterionScore(round_tenth(value).clamp(1.0, 5.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_available(&self) -> bool {
        self.0 != 0.0
    }
}

impl PartialEq<f64> for CriterionScore {
    fn eq(&self, other: &f64) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for CriterionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

pub type Breakdown = BTreeMap<Criterion, CriterionScore>;

/// Result of evaluating one model's submission for one prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub present: bool,
    pub error: Option<String>,
    pub test_counts: TestCounts,
    pub overall_score: f64,
    pub breakdown: Breakdown,
}

pub const MISSING_CODE: &str = "missing code";
pub const FUNCTION_NOT_FOUND: &str = "function not found";
pub const COMPILE_ERROR_PREFIX: &str = "compile error";

impl EvaluationRecord {
    pub fn missing_code() -> Self {
        Self {
            present: false,
            error: Some(MISSING_CODE.to_string()),
            test_counts: TestCounts::default(),
            overall_score: 0.0,
            breakdown: Breakdown::new(),
        }
    }

    /// Code was supplied but evaluation could not get past loading
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            present: true,
            error: Some(error.into()),
            test_counts: TestCounts::default(),
            overall_score: 0.0,
            breakdown: Breakdown::new(),
        }
    }

    pub fn compile_error(message: &str) -> Self {
        Self::failed(format!("{}: {}", COMPILE_ERROR_PREFIX, message))
    }

    pub fn function_not_found() -> Self {
        Self::failed(FUNCTION_NOT_FOUND)
    }

    pub fn scored(test_counts: TestCounts, breakdown: Breakdown) -> Self {
        Self {
            present: true,
            error: None,
            test_counts,
            overall_score: overall_score(&breakdown),
            breakdown,
        }
    }
}

/// Mean of every breakdown entry, rounded to one decimal; 0.0 when empty.
pub fn overall_score(breakdown: &Breakdown) -> f64 {
    if breakdown.is_empty() {
        return 0.0;
    }
    let sum: f64 = breakdown.values().map(CriterionScore::value).sum();
    round_tenth(sum / breakdown.len() as f64)
}
