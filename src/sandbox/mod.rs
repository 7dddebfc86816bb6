//! Sandbox module - Low-level isolate wrapper
//!
//! This module provides a minimal abstraction over the isolate sandbox.
//! It handles:
//! - Capability policy assembly (filesystem grants, network syscalls)
//! - Isolate box initialization and cleanup
//! - Raw command execution returning `SandboxOutcome`
//!
//! The sandbox module does NOT:
//! - Interpret verdicts (that's the checker's job)
//! - Know about languages or compilation
//! - Look at the files a run leaves behind

pub mod isolate_box;
pub mod meta;
pub mod policy;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub use isolate_box::IsolateSandbox;
pub use meta::{SandboxMeta, Termination};
pub use policy::{build_policy, FsAccess, SandboxPolicy};

/// Resource limits for sandbox execution
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Time limit in milliseconds
    pub time_ms: u32,
    /// Memory limit in MB
    pub memory_mb: u32,
    /// Maximum number of processes
    pub processes: u32,
    /// Maximum open files
    pub open_files: u32,
    /// Maximum file size in KB
    pub fsize_kb: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time_ms: 1000,
            memory_mb: 256,
            processes: 64,
            open_files: 256,
            fsize_kb: 50 * 1024,
        }
    }
}

/// One command to run under a policy
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Program (absolute path) followed by its arguments
    pub command: Vec<String>,
    /// Directory the program runs in; files it writes stay there
    pub work_dir: PathBuf,
    pub policy: SandboxPolicy,
    pub limits: Limits,
    pub stdin: Option<Vec<u8>>,
    /// Captured stdout is cut at this many bytes
    pub stdout_limit: usize,
    /// Captured stderr is cut at this many bytes
    pub stderr_limit: usize,
}

/// Raw outcome from sandbox execution (no verdict interpretation)
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub meta: SandboxMeta,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Stdout was longer than the capture limit
    pub stdout_truncated: bool,
}

/// Runs an untrusted binary under a declared policy
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, request: &SandboxRequest) -> Result<SandboxOutcome>;
}
