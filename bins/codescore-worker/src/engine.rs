/// Execution Engine - Sandboxed Interpreter Sessions
///
/// **Core Responsibility:**
/// Start an isolated interpreter running the harness and exchange protocol
/// messages with it under hard timeouts.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW untrusted code runs (local process, Docker container)
/// - Engine does NOT know what a test case is
/// - Engine does NOT score anything
///
/// **Backends:**
/// - `Local`: `python3 -u -c <harness>` child process, killed on drop
/// - `Docker`: container with networking disabled and memory/CPU limits,
///   force-removed on drop
///
/// A session that times out or loses its channel is dead: the child is killed
/// and every further request fails fast with `SandboxError::Closed`.

use crate::harness::{Reply, Request, HARNESS_SOURCE};
use anyhow::{bail, Context, Result};
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use codescore_common::config::{SandboxBackend, SandboxConfig, TimingConfig};
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Requests larger than this never reach the sandbox
const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;
/// Reply lines larger than this are treated as a protocol violation
const MAX_REPLY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to start sandbox: {0}")]
    Spawn(String),

    #[error("sandbox request '{op}' timed out after {ms}ms")]
    Timeout { op: &'static str, ms: u64 },

    #[error("sandbox session is closed")]
    Closed,

    #[error("sandbox protocol error: {0}")]
    Protocol(String),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container error: {0}")]
    Container(String),
}

/// Per-request wall-clock limits
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub load: Duration,
    pub call: Duration,
    pub parse: Duration,
    pub timing: Duration,
}

impl Timeouts {
    pub fn from_config(sandbox: &SandboxConfig, timing: &TimingConfig) -> Self {
        Self {
            load: Duration::from_millis(sandbox.load_timeout_ms),
            call: Duration::from_millis(sandbox.call_timeout_ms),
            parse: Duration::from_millis(sandbox.parse_timeout_ms),
            timing: Duration::from_millis(timing.timeout_ms),
        }
    }
}

/// Line-oriented duplex channel to a running harness
enum Channel {
    Local {
        child: Child,
        stdin: ChildStdin,
        stdout: Lines<BufReader<ChildStdout>>,
    },
    Docker {
        input: Pin<Box<dyn AsyncWrite + Send>>,
        output: Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>,
        pending: Vec<u8>,
        _guard: ContainerGuard,
    },
}

impl Channel {
    async fn send(&mut self, line: &[u8]) -> Result<(), SandboxError> {
        match self {
            Channel::Local { stdin, .. } => {
                stdin.write_all(line).await?;
                stdin.flush().await?;
            }
            Channel::Docker { input, .. } => {
                input.write_all(line).await?;
                input.flush().await?;
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, SandboxError> {
        match self {
            Channel::Local { stdout, .. } => Ok(stdout.next_line().await?),
            Channel::Docker { output, pending, .. } => loop {
                if let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    return Ok(Some(String::from_utf8_lossy(&line).trim_end().to_string()));
                }
                if pending.len() > MAX_REPLY_BYTES {
                    return Err(SandboxError::Protocol("reply exceeds size limit".to_string()));
                }
                match output.next().await {
                    Some(Ok(LogOutput::StdOut { message })) => pending.extend_from_slice(&message),
                    Some(Ok(LogOutput::StdErr { message })) => {
                        debug!(stderr = %String::from_utf8_lossy(&message), "Sandbox stderr");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(SandboxError::Container(e.to_string())),
                    None => return Ok(None),
                }
            },
        }
    }

    fn kill(&mut self) {
        if let Channel::Local { child, .. } = self {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill sandbox process");
            }
        }
        // Docker containers are force-removed when the guard drops
    }
}

/// An open harness session. Each session owns a fresh interpreter, so nothing
/// one submission defines is visible to another.
pub struct Session {
    channel: Channel,
    alive: bool,
}

impl Session {
    fn new(channel: Channel) -> Self {
        Self { channel, alive: true }
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Send one request and wait for its reply, bounded by `timeout`
    pub async fn request(
        &mut self,
        request: &Request<'_>,
        timeout: Duration,
    ) -> Result<Reply, SandboxError> {
        if !self.is_alive() {
            return Err(SandboxError::Closed);
        }

        let mut line = serde_json::to_vec(request)
            .map_err(|e| SandboxError::Protocol(format!("failed to encode request: {}", e)))?;
        if line.len() > MAX_REQUEST_BYTES {
            return Err(SandboxError::Protocol(format!(
                "request exceeds maximum size of {} bytes",
                MAX_REQUEST_BYTES
            )));
        }
        line.push(b'\n');

        let channel = &mut self.channel;
        let exchange = async {
            channel.send(&line).await?;
            channel.recv().await
        };

        let outcome = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(Some(reply))) => serde_json::from_str::<Reply>(&reply)
                .map_err(|e| SandboxError::Protocol(format!("malformed reply: {}", e))),
            Ok(Ok(None)) => Err(SandboxError::Closed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SandboxError::Timeout {
                op: request.op(),
                ms: timeout.as_millis() as u64,
            }),
        };

        if let Err(ref e) = outcome {
            warn!(op = request.op(), error = %e, "Sandbox session lost");
            self.alive = false;
            self.channel.kill();
        }
        outcome
    }
}

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

#[derive(Debug, Clone)]
pub struct LocalEngine {
    python: String,
}

impl LocalEngine {
    pub fn new(python: impl Into<String>) -> Self {
        Self { python: python.into() }
    }

    async fn prepare(&self) -> Result<()> {
        let output = Command::new(&self.python)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run interpreter '{}'", self.python))?;
        if !output.status.success() {
            bail!("Interpreter '{}' exited with {}", self.python, output.status);
        }
        let version = String::from_utf8_lossy(&output.stdout);
        let version = if version.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr)
        } else {
            version
        };
        info!(interpreter = %self.python, version = %version.trim(), "Local sandbox ready");
        Ok(())
    }

    async fn open(&self) -> Result<Session, SandboxError> {
        let mut child = Command::new(&self.python)
            .args(["-u", "-c", HARNESS_SOURCE])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", self.python, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Spawn("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("child stdout unavailable".to_string()))?;

        Ok(Session::new(Channel::Local {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        }))
    }
}

/// Docker-based sandbox
///
/// **Container Rules:**
/// 1. Image is pulled once at startup if it is not present
/// 2. Network disabled, memory and CPU limited
/// 3. Harness runs as the container command with stdin attached
/// 4. Container is force-removed when the session drops
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    image: String,
    memory_limit_mb: u32,
    cpu_limit: f32,
}

impl DockerEngine {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            image: config.image.clone(),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit: config.cpu_limit,
        })
    }

    /// Ensure the sandbox image is available (pull if needed)
    async fn prepare(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %self.image, "Image pulled");
        Ok(())
    }

    async fn open(&self) -> Result<Session, SandboxError> {
        let container_name = format!("codescore-{}", uuid::Uuid::new_v4());
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "python3".to_string(),
                "-u".to_string(),
                "-c".to_string(),
                HARNESS_SOURCE.to_string(),
            ]),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(false),
            open_stdin: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(i64::from(self.memory_limit_mb) * 1024 * 1024),
                nano_cpus: Some((f64::from(self.cpu_limit) * 1_000_000_000.0) as i64),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| SandboxError::Container(format!("create failed: {}", e)))?;

        let guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
        };

        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(false),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(&container.id, Some(attach_options))
            .await
            .map_err(|e| SandboxError::Container(format!("attach failed: {}", e)))?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Container(format!("start failed: {}", e)))?;

        debug!(container = %container_name, "Sandbox container started");

        Ok(Session::new(Channel::Docker {
            input,
            output,
            pending: Vec::new(),
            _guard: guard,
        }))
    }
}

#[derive(Clone)]
enum Backend {
    Local(LocalEngine),
    Docker(DockerEngine),
}

/// Opens sandbox sessions on the configured backend
#[derive(Clone)]
pub struct ExecutionEngine {
    backend: Backend,
    timeouts: Timeouts,
}

impl ExecutionEngine {
    pub fn from_config(sandbox: &SandboxConfig, timing: &TimingConfig) -> Result<Self> {
        let backend = match sandbox.backend {
            SandboxBackend::Local => Backend::Local(LocalEngine::new(sandbox.python.clone())),
            SandboxBackend::Docker => Backend::Docker(DockerEngine::new(sandbox)?),
        };
        Ok(Self {
            backend,
            timeouts: Timeouts::from_config(sandbox, timing),
        })
    }

    #[cfg(test)]
    pub fn local(python: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            backend: Backend::Local(LocalEngine::new(python)),
            timeouts,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Local(_) => "local",
            Backend::Docker(_) => "docker",
        }
    }

    /// Verify the backend can run sessions before the batch starts
    pub async fn prepare(&self) -> Result<()> {
        match &self.backend {
            Backend::Local(engine) => engine.prepare().await,
            Backend::Docker(engine) => engine.prepare().await,
        }
    }

    pub async fn open_session(&self) -> Result<Session, SandboxError> {
        match &self.backend {
            Backend::Local(engine) => engine.open().await,
            Backend::Docker(engine) => engine.open().await,
        }
    }
}
