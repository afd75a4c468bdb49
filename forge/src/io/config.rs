//! Forge configuration stored as TOML (default `forge.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Every section defaults independently, so a partial file only overrides
/// what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    pub gateway: GatewayConfig,
    pub harness: HarnessConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Completion service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    /// Connect and idle-read timeout in seconds. One-shot calls also use it
    /// as their total deadline; streams may run longer while tokens arrive.
    pub timeout_secs: u64,
    /// Extra attempts for one-shot calls after a transport failure.
    pub max_retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Sandboxed execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Wall-clock limit for one program run, in seconds.
    pub timeout_secs: u64,
    /// Wall-clock limit for the C++ build step, in seconds.
    pub compile_timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
    /// C++ compiler argv prefix; the source path, `-o` and the binary path are appended.
    pub compiler: Vec<String>,
    /// Python interpreter argv prefix; the script path is appended.
    pub interpreter: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            compile_timeout_secs: 60,
            output_limit_bytes: 1_000_000,
            compiler: vec!["g++".to_string()],
            interpreter: vec!["python3".to_string()],
        }
    }
}

impl HarnessConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }
}

/// Refinement loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Refinement rounds after the first; the loop runs `max_retries + 1` rounds.
    pub max_retries: u32,
    /// Upper bound on one streamed generation, in seconds.
    pub generation_timeout_secs: u64,
    /// Maximum proposals the forward planner submits for review.
    pub max_design_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            generation_timeout_secs: 120,
            max_design_attempts: 2,
        }
    }
}

impl OrchestratorConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gateway.base_url.trim().is_empty() {
            return Err(anyhow!("gateway.base_url must be non-empty"));
        }
        if self.gateway.model.trim().is_empty() {
            return Err(anyhow!("gateway.model must be non-empty"));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(anyhow!("gateway.timeout_secs must be > 0"));
        }
        if self.harness.timeout_secs == 0 {
            return Err(anyhow!("harness.timeout_secs must be > 0"));
        }
        if self.harness.compile_timeout_secs == 0 {
            return Err(anyhow!("harness.compile_timeout_secs must be > 0"));
        }
        if self.harness.output_limit_bytes == 0 {
            return Err(anyhow!("harness.output_limit_bytes must be > 0"));
        }
        if self.harness.compiler.is_empty() || self.harness.compiler[0].trim().is_empty() {
            return Err(anyhow!("harness.compiler must be a non-empty array"));
        }
        if self.harness.interpreter.is_empty() || self.harness.interpreter[0].trim().is_empty() {
            return Err(anyhow!("harness.interpreter must be a non-empty array"));
        }
        if self.orchestrator.generation_timeout_secs == 0 {
            return Err(anyhow!("orchestrator.generation_timeout_secs must be > 0"));
        }
        if self.orchestrator.max_design_attempts == 0 {
            return Err(anyhow!("orchestrator.max_design_attempts must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
