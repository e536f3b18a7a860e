// In-process stand-ins for the sandbox and the style checker.

use crate::engine::SandboxError;
use crate::loader::{Callable, CompiledUnit, Invocation, Sandbox, TimingError};
use crate::style::{CheckerError, StyleChecker};
use crate::syntax::SyntaxTree;
use async_trait::async_trait;
use codescore_common::types::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Behavior = Arc<dyn Fn(&[Value]) -> Invocation + Send + Sync>;

#[derive(Clone)]
pub struct FakeFunction {
    behavior: Behavior,
    timings: Result<Vec<f64>, String>,
    timing_timeout_ms: Option<u64>,
    calls: Arc<AtomicUsize>,
}

impl FakeFunction {
    pub fn new(behavior: impl Fn(&[Value]) -> Invocation + Send + Sync + 'static) -> Self {
        Self {
            behavior: Arc::new(behavior),
            timings: Ok(vec![0.0005, 0.0005, 0.0005]),
            timing_timeout_ms: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_timings(mut self, timings: Result<Vec<f64>, String>) -> Self {
        self.timings = timings;
        self
    }

    /// Timing runs past the sandbox deadline of `ms`
    pub fn with_timing_timeout(mut self, ms: u64) -> Self {
        self.timing_timeout_ms = Some(ms);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Callable for FakeFunction {
    async fn invoke(&mut self, args: &[Value]) -> Invocation {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(args)
    }

    async fn time(&mut self, _args: &[Value], _number: u32, _repeat: u32)
        -> Result<Vec<f64>, TimingError> {
        if let Some(ms) = self.timing_timeout_ms {
            return Err(SandboxError::Timeout { op: "time", ms }.into());
        }
        self.timings.clone().map_err(TimingError::Failed)
    }
}

#[derive(Clone)]
enum FakeLoad {
    CompileError(String),
    SymbolMissing,
    Bound(FakeFunction),
}

/// Sandbox whose behavior is scripted per source text
#[derive(Default)]
pub struct FakeSandbox {
    loads: HashMap<String, FakeLoad>,
    trees: HashMap<String, SyntaxTree>,
    binds: AtomicUsize,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_error(mut self, source: &str, message: &str) -> Self {
        self.loads.insert(source.to_string(), FakeLoad::CompileError(message.to_string()));
        self
    }

    pub fn symbol_missing(mut self, source: &str) -> Self {
        self.loads.insert(source.to_string(), FakeLoad::SymbolMissing);
        self
    }

    pub fn function(mut self, source: &str, function: FakeFunction) -> Self {
        self.loads.insert(source.to_string(), FakeLoad::Bound(function));
        self
    }

    pub fn tree(mut self, source: &str, tree: SyntaxTree) -> Self {
        self.trees.insert(source.to_string(), tree);
        self
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    type Callable = FakeFunction;

    async fn bind(&self, source: &str, _symbol: &str) -> CompiledUnit<FakeFunction> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        match self.loads.get(source) {
            Some(FakeLoad::CompileError(message)) => CompiledUnit::CompileError(message.clone()),
            Some(FakeLoad::SymbolMissing) | None => CompiledUnit::SymbolMissing,
            Some(FakeLoad::Bound(function)) => CompiledUnit::Bound(function.clone()),
        }
    }

    async fn parse(&self, source: &str) -> Result<SyntaxTree, String> {
        self.trees
            .get(source)
            .cloned()
            .ok_or_else(|| "SyntaxError('invalid syntax')".to_string())
    }
}

/// Style checker reporting a fixed warning count
pub struct FakeChecker(pub Option<usize>);

#[async_trait]
impl StyleChecker for FakeChecker {
    async fn warning_count(&self, _source: &str) -> Result<usize, CheckerError> {
        self.0
            .ok_or_else(|| CheckerError::Unavailable("fake checker offline".to_string()))
    }
}
