/// Harness protocol - the wire contract between the worker and a sandbox session
///
/// The harness script runs inside the sandbox interpreter. Requests and replies
/// are single-line JSON objects. Every reply carries `ok`; the remaining fields
/// depend on the request.

use crate::syntax::SyntaxNode;
use codescore_common::types::Value;
use serde::{Deserialize, Serialize};

/// Harness source, passed to the interpreter with `-c`
pub const HARNESS_SOURCE: &str = include_str!("harness.py");

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    /// Parse source into a flattened pre-order syntax tree
    Parse { source: &'a str },
    /// Execute source in a fresh namespace and bind `symbol`
    Load { source: &'a str, symbol: &'a str },
    /// Invoke the bound callable once
    Call { args: &'a [Value] },
    /// Time `repeat` batches of `number` invocations
    Time { args: &'a [Value], number: u32, repeat: u32 },
}

impl Request<'_> {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Parse { .. } => "parse",
            Request::Load { .. } => "load",
            Request::Call { .. } => "call",
            Request::Time { .. } => "time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailure {
    Compile,
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RaisedRecord {
    pub kind: String,
    #[serde(default)]
    pub lineage: Vec<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Reply {
    pub ok: bool,
    pub error: Option<String>,
    pub failure: Option<LoadFailure>,
    pub value: Option<Value>,
    pub raised: Option<RaisedRecord>,
    pub timings: Option<Vec<f64>>,
    pub nodes: Vec<SyntaxNode>,
}

impl Reply {
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "harness reported failure without a message".to_string())
    }
}
