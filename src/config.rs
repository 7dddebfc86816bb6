//! Judge configuration
//!
//! Loaded once at startup from `files/judge.toml` (or `JUDGE_CONFIG`) with a
//! few environment overrides, then handed to every stage by reference.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "./files/judge.toml";

/// Root configuration shared (read-only) by all stages
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Parent directory for per-submission working directories
    pub work_root: PathBuf,
    /// Immutable problem storage (`<problems_root>/<problem_id>/...`)
    pub problems_root: PathBuf,
    /// Durable artifact directory (waveforms)
    pub artifact_dir: PathBuf,
    /// Compiled artifact cache, disabled when unset
    pub compile_cache_dir: Option<PathBuf>,
    /// Worker ID for box ID allocation (0-9)
    pub worker_id: u32,
    pub toolchain: ToolchainConfig,
    pub limits: LimitsConfig,
    pub synthesis: SynthesisConfig,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir(),
            problems_root: PathBuf::from("/problems"),
            artifact_dir: PathBuf::from("/waves"),
            compile_cache_dir: None,
            worker_id: 0,
            toolchain: ToolchainConfig::default(),
            limits: LimitsConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }
}

/// Compiler/runtime selection and flag tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler binary (name looked up in PATH, or absolute path)
    pub compiler: String,
    /// Simulator that runs the compiled artifact
    pub runtime: String,
    /// Default source extension (without dot)
    pub extension: String,
    /// Broader-dialect extension picked up from the working directory
    pub wide_extension: String,
    /// Source whose presence disables dialect widening
    pub self_test_source: String,
    /// Language standard, rendered as `-g<standard>`
    pub standard: Option<String>,
    pub max_errors: u32,
    /// Error cap flag template, `{}` is replaced by `max_errors`
    pub error_limit_flag: Option<String>,
    /// Code generation target, rendered as `-t<target>`
    pub arch_target: Option<String>,
    /// Baseline preprocessor defines
    pub defines: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "iverilog".to_string(),
            runtime: "vvp".to_string(),
            extension: "v".to_string(),
            wide_extension: "sv".to_string(),
            self_test_source: "self_test.v".to_string(),
            standard: Some("2012".to_string()),
            max_errors: 5,
            // Icarus has no error cap switch
            error_limit_flag: None,
            arch_target: None,
            defines: vec!["ONLINE_JUDGE".to_string()],
        }
    }
}

/// Resource limits owned by the worker (per-case limits come with the job)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub compile_time_limit_ms: u32,
    pub compile_memory_limit_mb: u32,
    pub processes: u32,
    pub open_files: u32,
    /// Largest file the program may write, in KB
    pub fsize_kb: u32,
    /// Captured stdout cap in bytes
    pub stdout_limit_bytes: usize,
    /// Captured stderr cap in bytes
    pub stderr_limit_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_time_limit_ms: 30_000,
            compile_memory_limit_mb: 2048,
            processes: 64,
            open_files: 256,
            fsize_kb: 50 * 1024,
            stdout_limit_bytes: 16 * 1024 * 1024,
            stderr_limit_bytes: 64 * 1024,
        }
    }
}

/// External synthesis services
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub f4pga_endpoint: String,
    pub openlane_endpoint: String,
    /// Per-request timeout; calls are never retried
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            f4pga_endpoint: "http://localhost:8100/api/f4pga/synthesize".to_string(),
            openlane_endpoint: "http://localhost:8200/api/openlane/run".to_string(),
            timeout_secs: 300,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl JudgeConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid judge configuration")
    }

    /// Load configuration from `JUDGE_CONFIG` (or the default path), then
    /// apply environment overrides
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("JUDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_file(Path::new(&path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded judge configuration from {:?}", path);
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("JUDGE_WORKER_ID") {
            match value.parse() {
                Ok(id) => self.worker_id = id,
                Err(_) => warn!("Ignoring invalid JUDGE_WORKER_ID={}", value),
            }
        }
        if let Ok(value) = std::env::var("PROBLEMS_ROOT") {
            self.problems_root = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("WAVE_DIR") {
            self.artifact_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("F4PGA_ENDPOINT") {
            self.synthesis.f4pga_endpoint = value;
        }
        if let Ok(value) = std::env::var("OPENLANE_ENDPOINT") {
            self.synthesis.openlane_endpoint = value;
        }
    }
}
