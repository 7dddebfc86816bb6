//! Sandboxed runner implementation
//!
//! Executes untrusted code (and the compiler) through the sandbox
//! collaborator with resource limits and a capability policy.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{CommandSpec, ExecutionResult, RunLimits, RunStatus};
use crate::config::LimitsConfig;
use crate::sandbox::{Limits, Sandbox, SandboxPolicy, SandboxRequest};

/// Runner that executes commands in the sandbox
pub struct SandboxedRunner {
    sandbox: Arc<dyn Sandbox>,
    limits: LimitsConfig,
}

impl SandboxedRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>, limits: LimitsConfig) -> Self {
        Self { sandbox, limits }
    }

    /// Run a command in `work_dir` under `policy`
    pub async fn execute(
        &self,
        cmd: &CommandSpec,
        work_dir: &Path,
        policy: &SandboxPolicy,
        limits: &RunLimits,
        stdin: Option<&[u8]>,
    ) -> Result<ExecutionResult> {
        let request = SandboxRequest {
            command: cmd.to_vec(),
            work_dir: work_dir.to_path_buf(),
            policy: policy.clone(),
            limits: Limits {
                time_ms: limits.time_ms,
                memory_mb: limits.memory_mb,
                processes: self.limits.processes,
                open_files: self.limits.open_files,
                fsize_kb: self.limits.fsize_kb,
            },
            stdin: stdin.map(<[u8]>::to_vec),
            stdout_limit: self.limits.stdout_limit_bytes,
            stderr_limit: self.limits.stderr_limit_bytes,
        };

        let outcome = self.sandbox.run(&request).await?;
        let status = RunStatus::from_meta(&outcome.meta, limits, outcome.stdout_truncated);

        debug!(
            "Run finished: status={}, time={}ms, wall={}ms, memory={}kb, stdout={}B, stderr={}B",
            status,
            outcome.meta.time_ms,
            outcome.meta.wall_time_ms,
            outcome.meta.memory_kb,
            outcome.stdout.len(),
            outcome.stderr.len()
        );

        Ok(ExecutionResult {
            status,
            time_ms: outcome.meta.time_ms,
            memory_kb: outcome.meta.memory_kb,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory sandbox used by stage tests

    use super::*;
    use crate::sandbox::{SandboxMeta, SandboxOutcome, Termination};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted response for one command
    #[derive(Clone, Default)]
    pub struct Script {
        pub stdout: Vec<u8>,
        pub stderr: Vec<u8>,
        pub exit_code: i32,
        pub timed_out: bool,
        /// Files the "program" writes into its working directory
        pub writes: Vec<(String, Vec<u8>)>,
    }

    /// Answers compile commands with `compile` and everything else with `run`.
    /// A compile is recognised by the `-o` flag and creates the output file.
    pub struct FakeSandbox {
        pub compile: Script,
        pub run: Script,
        pub requests: Mutex<Vec<SandboxRequest>>,
    }

    impl FakeSandbox {
        pub fn new(run: Script) -> Self {
            Self {
                compile: Script::default(),
                run,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded(&self) -> Vec<SandboxRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn run(&self, request: &SandboxRequest) -> Result<SandboxOutcome> {
            self.requests.lock().unwrap().push(request.clone());

            let output_flag = request.command.iter().position(|arg| arg == "-o");
            let script = match output_flag {
                Some(_) => &self.compile,
                None => &self.run,
            };
            if let (Some(idx), 0) = (output_flag, script.exit_code) {
                std::fs::write(&request.command[idx + 1], b"#! vvp\n")?;
            }
            for (name, content) in &script.writes {
                std::fs::write(request.work_dir.join(name), content)?;
            }

            let termination = if script.timed_out {
                Termination::TimedOut
            } else {
                Termination::Exited(script.exit_code)
            };
            let stdout_truncated = script.stdout.len() > request.stdout_limit;
            let mut stdout = script.stdout.clone();
            stdout.truncate(request.stdout_limit);
            let mut stderr = script.stderr.clone();
            stderr.truncate(request.stderr_limit);

            Ok(SandboxOutcome {
                meta: SandboxMeta {
                    time_ms: 12,
                    wall_time_ms: 15,
                    memory_kb: 2048,
                    termination,
                },
                stdout,
                stderr,
                stdout_truncated,
            })
        }
    }
}
