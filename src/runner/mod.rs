//! Runner module - Execution abstraction layer
//!
//! Runs compiled artifacts (and the compiler itself) under a sandbox policy
//! and reports what happened. The runner module does NOT:
//! - Look at stdout/stderr content or determine verdicts
//! - Inspect files the program leaves in its working directory
//! - Know about problem-specific logic

pub mod sandboxed;

use std::path::Path;

use crate::sandbox::{SandboxMeta, Termination};

pub use sandboxed::SandboxedRunner;

/// SIGXFSZ, raised when the program outgrows the file size limit
const SIGXFSZ: i32 = 25;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_string_lossy().into_owned(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }
}

/// Per-run resource limits (supplied by the job)
#[derive(Debug, Clone, PartialEq)]
pub struct RunLimits {
    /// Time limit in milliseconds
    pub time_ms: u32,
    /// Memory limit in MB
    pub memory_mb: u32,
}

impl RunLimits {
    pub fn new(time_ms: u32, memory_mb: u32) -> Self {
        Self { time_ms, memory_mb }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            time_ms: 1000,
            memory_mb: 256,
        }
    }
}

/// Execution status (raw, no verdict interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Time limit exceeded
    TimeLimitExceeded,
    /// Memory limit exceeded
    MemoryLimitExceeded,
    /// Output (stdout or a written file) exceeded its cap
    OutputLimitExceeded,
    /// Killed by signal
    Signaled(i32),
    /// System/internal error
    SystemError(String),
}

impl RunStatus {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    fn from_meta(meta: &SandboxMeta, limits: &RunLimits, stdout_truncated: bool) -> Self {
        let status = match &meta.termination {
            Termination::Exited(code) => RunStatus::Exited(*code),
            Termination::TimedOut => RunStatus::TimeLimitExceeded,
            Termination::OutOfMemory => RunStatus::MemoryLimitExceeded,
            Termination::Signaled(SIGXFSZ) => RunStatus::OutputLimitExceeded,
            Termination::Signaled(sig) => RunStatus::Signaled(*sig),
            Termination::SandboxFailure(message) => RunStatus::SystemError(message.clone()),
        };

        match status {
            RunStatus::SystemError(_) | RunStatus::TimeLimitExceeded => status,
            _ if meta.memory_kb > limits.memory_mb * 1024 => RunStatus::MemoryLimitExceeded,
            _ if stdout_truncated => RunStatus::OutputLimitExceeded,
            _ => status,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Exited(code) => write!(f, "exited({})", code),
            RunStatus::TimeLimitExceeded => write!(f, "time limit exceeded"),
            RunStatus::MemoryLimitExceeded => write!(f, "memory limit exceeded"),
            RunStatus::OutputLimitExceeded => write!(f, "output limit exceeded"),
            RunStatus::Signaled(sig) => write!(f, "signaled({})", sig),
            RunStatus::SystemError(message) => write!(f, "sandbox error: {}", message),
        }
    }
}

/// Captured result of one sandboxed run; read-only for later stages
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: RunStatus,
    /// CPU time used in milliseconds
    pub time_ms: u32,
    /// Memory used in KB
    pub memory_kb: u32,
    pub stdout: Vec<u8>,
    /// Stderr, already cut to the configured cap
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
