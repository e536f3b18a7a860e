// Application configuration shared by the worker and the API.
//
// Every section falls back to defaults, so a missing file or a partial file
// both work.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/codescore.json";
pub const CONFIG_ENV_VAR: &str = "CODESCORE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub sandbox: SandboxConfig,
    pub timing: TimingConfig,
    pub style: StyleConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// One `<model>.json` submission file per model
    pub responses_dir: PathBuf,
    pub report_path: PathBuf,
    /// Replaces the built-in test registry when set
    pub registry_path: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            responses_dir: PathBuf::from("responses"),
            report_path: PathBuf::from("scores.json"),
            registry_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    #[default]
    Local,
    Docker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// Interpreter used by the local backend
    pub python: String,
    /// Image used by the docker backend
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub load_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub parse_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Local,
            python: "python3".to_string(),
            image: "python:3.12-slim".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            load_timeout_ms: 10_000,
            call_timeout_ms: 5_000,
            parse_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Calls per timed batch
    pub number: u32,
    /// Timed batches
    pub repeat: u32,
    pub timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self { number: 1000, repeat: 3, timeout_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Checker command; the code is written to its stdin, one warning per stdout line
    pub command: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "flake8".to_string(),
                "--stdin-display-name".to_string(),
                "<string>".to_string(),
                "-".to_string(),
            ],
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen_addr: "0.0.0.0:3000".to_string() }
    }
}

impl Config {
    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `$CODESCORE_CONFIG`, or `config/codescore.json`
    pub fn load_default() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    bail!("{} points at a missing file: {}", CONFIG_ENV_VAR, path.display());
                }
                Self::load(&path)
            }
            Err(_) => Self::load(Path::new(DEFAULT_CONFIG_PATH)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timing.number == 0 || self.timing.repeat == 0 {
            bail!("timing.number and timing.repeat must be positive");
        }
        if self.style.command.is_empty() {
            bail!("style.command must name a checker program");
        }
        if self.sandbox.cpu_limit <= 0.0 {
            bail!("sandbox.cpu_limit must be positive");
        }
        if self.sandbox.call_timeout_ms == 0 || self.sandbox.load_timeout_ms == 0 {
            bail!("sandbox timeouts must be positive");
        }
        Ok(())
    }
}
