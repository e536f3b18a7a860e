/// Dynamic Loader - Load and Bind Untrusted Submissions
///
/// **Core Responsibility:**
/// Turn raw submission text into a `CompiledUnit`: nothing to load, a compile
/// error, a missing symbol, or a bound callable living in its own sandbox
/// session.
///
/// **Seams:**
/// - `Sandbox`: opens isolated sessions, binds a symbol, parses source
/// - `Callable`: a bound function that can be invoked and timed
///
/// `ExecutionEngine` implements `Sandbox` for real interpreters; tests plug in
/// in-process fakes.

use crate::engine::{ExecutionEngine, SandboxError, Session};
use crate::harness::{LoadFailure, RaisedRecord, Reply, Request};
use crate::syntax::SyntaxTree;
use async_trait::async_trait;
use codescore_common::types::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Exception raised by the submission while running a case
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedException {
    pub kind: String,
    /// Class hierarchy, most specific first
    pub lineage: Vec<String>,
    pub message: String,
}

impl RaisedException {
    /// True when the exception is `kind` or one of its subclasses
    pub fn matches(&self, kind: &str) -> bool {
        self.kind == kind || self.lineage.iter().any(|class| class == kind)
    }
}

impl fmt::Display for RaisedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl From<RaisedRecord> for RaisedException {
    fn from(record: RaisedRecord) -> Self {
        let lineage = if record.lineage.is_empty() {
            vec![record.kind.clone()]
        } else {
            record.lineage
        };
        Self {
            kind: record.kind,
            lineage,
            message: record.message,
        }
    }
}

/// Outcome of a single invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Returned(Value),
    Raised(RaisedException),
    /// The sandbox failed (timeout, dead session). Never satisfies a case.
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum TimingError {
    #[error("timed call failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug)]
pub enum CompiledUnit<C> {
    NoCode,
    CompileError(String),
    SymbolMissing,
    Bound(C),
}

#[async_trait]
pub trait Callable: Send {
    async fn invoke(&mut self, args: &[Value]) -> Invocation;

    /// Wall-clock seconds for each of `repeat` batches of `number` calls
    async fn time(&mut self, args: &[Value], number: u32, repeat: u32)
        -> Result<Vec<f64>, TimingError>;
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    type Callable: Callable;

    /// Execute `source` in a fresh isolated namespace and bind `symbol`
    async fn bind(&self, source: &str, symbol: &str) -> CompiledUnit<Self::Callable>;

    /// Parse `source` into a syntax tree without executing it
    async fn parse(&self, source: &str) -> Result<SyntaxTree, String>;
}

/// Load a submission entry. Absent or empty code never reaches the sandbox;
/// whitespace-only code is present and binds nothing.
pub async fn load<S: Sandbox + ?Sized>(
    sandbox: &S,
    code: Option<&str>,
    symbol: &str,
) -> CompiledUnit<S::Callable> {
    match code {
        Some(code) if !code.is_empty() => sandbox.bind(code, symbol).await,
        _ => CompiledUnit::NoCode,
    }
}

/// Callable bound inside a live harness session
pub struct BoundFunction {
    session: Session,
    symbol: String,
    call_timeout: Duration,
    timing_timeout: Duration,
}

#[async_trait]
impl Callable for BoundFunction {
    async fn invoke(&mut self, args: &[Value]) -> Invocation {
        match self.session.request(&Request::Call { args }, self.call_timeout).await {
            Ok(reply) => invocation_from_reply(reply),
            Err(e) => {
                debug!(symbol = %self.symbol, error = %e, "Call aborted");
                Invocation::Aborted(e.to_string())
            }
        }
    }

    async fn time(
        &mut self,
        args: &[Value],
        number: u32,
        repeat: u32,
    ) -> Result<Vec<f64>, TimingError> {
        let request = Request::Time { args, number, repeat };
        let reply = self.session.request(&request, self.timing_timeout).await?;
        if !reply.ok {
            return Err(TimingError::Failed(reply.error_message()));
        }
        match reply.timings {
            Some(timings) if !timings.is_empty() => Ok(timings),
            _ => Err(TimingError::Failed("no timings returned".to_string())),
        }
    }
}

fn invocation_from_reply(reply: Reply) -> Invocation {
    if reply.ok {
        return match reply.value {
            Some(value) => Invocation::Returned(value),
            None => Invocation::Aborted("reply carried no value".to_string()),
        };
    }
    match reply.raised {
        Some(raised) => Invocation::Raised(raised.into()),
        None => Invocation::Aborted(reply.error_message()),
    }
}

#[async_trait]
impl Sandbox for ExecutionEngine {
    type Callable = BoundFunction;

    async fn bind(&self, source: &str, symbol: &str) -> CompiledUnit<BoundFunction> {
        let mut session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Sandbox unavailable");
                return CompiledUnit::CompileError(format!("sandbox unavailable: {}", e));
            }
        };

        let timeouts = self.timeouts();
        let reply = match session
            .request(&Request::Load { source, symbol }, timeouts.load)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Load did not complete");
                return CompiledUnit::CompileError(e.to_string());
            }
        };

        if reply.ok {
            debug!(symbol = %symbol, "Symbol bound");
            return CompiledUnit::Bound(BoundFunction {
                session,
                symbol: symbol.to_string(),
                call_timeout: timeouts.call,
                timing_timeout: timeouts.timing,
            });
        }

        match reply.failure {
            Some(LoadFailure::Symbol) => CompiledUnit::SymbolMissing,
            Some(LoadFailure::Compile) | None => CompiledUnit::CompileError(reply.error_message()),
        }
    }

    async fn parse(&self, source: &str) -> Result<SyntaxTree, String> {
        let mut session = self.open_session().await.map_err(|e| e.to_string())?;
        let reply = session
            .request(&Request::Parse { source }, self.timeouts().parse)
            .await
            .map_err(|e| e.to_string())?;
        if !reply.ok {
            return Err(reply.error_message());
        }
        SyntaxTree::from_nodes(reply.nodes)
    }
}
