//! Compiler module - Submission compilation
//!
//! This module turns a submission into a compile unit:
//! - Materializes the primary and auxiliary sources in the working directory
//! - Extracts problem-bundled archives and picks up wider-dialect sources
//! - Resolves flags through the strategies in [`flags`]
//! - Compiles inside the sandbox, memoized by the unit's cache key
//!
//! The compiler module never interprets the program's output.

pub mod flags;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::JudgeConfig;
use crate::core::utils::{extract_zip, find_files_with_extension};
use crate::core::Submission;
use crate::error::JudgeError;
use crate::runner::{CommandSpec, RunLimits, RunStatus, SandboxedRunner};
use crate::sandbox::{FsAccess, SandboxPolicy};

/// Problem id whose sources are self-contained (no bundled archives)
const SELF_TEST_PROBLEM: &str = "self_test";

/// A submission ready to be compiled
#[derive(Debug, Clone, PartialEq)]
pub struct CompileUnit {
    /// Source paths in compile order
    pub sources: Vec<PathBuf>,
    pub flags: Vec<String>,
    /// Compiled artifact path
    pub output: PathBuf,
    /// Hex SHA-256 over problem id, compiler, flags and source bytes
    pub cache_key: String,
}

/// Result of a compilation attempt
#[derive(Debug)]
pub struct CompileResult {
    pub success: bool,
    pub message: Option<String>,
    /// The artifact came from the compile cache
    pub cached: bool,
}

/// Resolve a tool from the runtime configuration.
///
/// Names containing a path separator must point at an existing file; bare
/// names are looked up in `PATH`.
pub fn resolve_binary(name: &str) -> std::result::Result<PathBuf, JudgeError> {
    if name.trim().is_empty() {
        return Err(JudgeError::Configuration("empty tool name".to_string()));
    }

    if name.contains('/') {
        let path = PathBuf::from(name);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(JudgeError::Configuration(format!("{} does not exist", name)))
        };
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| JudgeError::Configuration(format!("{} not found in PATH", name)))
}

/// Compile stage bound to one configuration
pub struct CompileStage {
    config: Arc<JudgeConfig>,
    compiler: PathBuf,
    runtime: PathBuf,
}

impl CompileStage {
    /// Resolve the compiler and simulator up front; a missing tool is a
    /// configuration error and is never retried
    pub fn new(config: Arc<JudgeConfig>) -> std::result::Result<Self, JudgeError> {
        let compiler = resolve_binary(&config.toolchain.compiler)?;
        let runtime = resolve_binary(&config.toolchain.runtime)?;
        debug!("Resolved toolchain: compiler={:?}, runtime={:?}", compiler, runtime);
        Ok(Self {
            config,
            compiler,
            runtime,
        })
    }

    /// Write the submission into `work_dir` and assemble its compile unit
    pub async fn prepare(&self, submission: &Submission, work_dir: &Path) -> Result<CompileUnit> {
        let toolchain = &self.config.toolchain;
        tokio::fs::create_dir_all(work_dir).await?;

        let mut sources = Vec::with_capacity(submission.aux_sources.len() + 1);
        let problem_stem = file_name_only(&submission.problem_id);
        let primary = work_dir.join(format!("{}.{}", problem_stem, toolchain.extension));
        tokio::fs::write(&primary, &submission.source)
            .await
            .with_context(|| format!("Failed to write {:?}", primary))?;
        sources.push(primary);

        for (name, content) in &submission.aux_sources {
            let path = work_dir.join(with_default_extension(
                &file_name_only(name),
                &toolchain.extension,
                &[toolchain.extension.as_str(), toolchain.wide_extension.as_str()],
            ));
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            if !sources.contains(&path) {
                sources.push(path);
            }
        }

        if submission.problem_id != SELF_TEST_PROBLEM {
            self.extract_problem_archives(&submission.problem_id, work_dir)?;
        }

        let self_test_listed = sources
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == toolchain.self_test_source.as_str()));
        if !self_test_listed {
            let extra: Vec<PathBuf> = find_files_with_extension(work_dir, &toolchain.wide_extension)?
                .into_iter()
                .filter(|p| !sources.contains(p))
                .collect();
            if !extra.is_empty() {
                info!("Adding {} files: {:?}", toolchain.wide_extension, extra);
                sources.extend(extra);
            }
        }

        let flags = flags::resolve_flags(toolchain, submission);
        let output = work_dir.join(&problem_stem);
        let cache_key = cache_key(
            &submission.problem_id,
            &self.compiler,
            &flags,
            &sources,
        )?;

        Ok(CompileUnit {
            sources,
            flags,
            output,
            cache_key,
        })
    }

    /// Extract every `.zip` under the problem's storage area into `work_dir`
    fn extract_problem_archives(&self, problem_id: &str, work_dir: &Path) -> Result<()> {
        let problem_dir = self.config.problems_root.join(file_name_only(problem_id));
        for archive in find_files_with_extension(&problem_dir, "zip")? {
            let file = std::fs::File::open(&archive)
                .with_context(|| format!("Failed to open archive {:?}", archive))?;
            let written = extract_zip(file, work_dir)
                .with_context(|| format!("Failed to extract archive {:?}", archive))?;
            info!("Extracted {} files from {:?}", written.len(), archive);
        }
        Ok(())
    }

    /// `<compiler> <flags> -o <output> <sources>`
    pub fn compile_command(&self, unit: &CompileUnit) -> CommandSpec {
        let mut args = unit.flags.clone();
        args.push("-o".to_string());
        args.push(unit.output.to_string_lossy().into_owned());
        args.extend(unit.sources.iter().map(|p| p.to_string_lossy().into_owned()));
        CommandSpec::new(&self.compiler).with_args(args)
    }

    /// `<runtime> <compiled artifact>`
    pub fn run_command(&self, unit: &CompileUnit) -> CommandSpec {
        CommandSpec::new(&self.runtime).with_args([unit.output.to_string_lossy().into_owned()])
    }

    /// Read access to wherever the toolchain lives, on top of `policy`
    pub fn toolchain_policy(&self, policy: SandboxPolicy) -> SandboxPolicy {
        [&self.compiler, &self.runtime]
            .into_iter()
            .filter_map(|tool| tool.parent())
            .fold(policy, |policy, dir| {
                if policy.grants().any(|(granted, _)| dir.starts_with(granted)) {
                    policy
                } else {
                    policy.grant(dir, FsAccess::Read)
                }
            })
    }

    /// Compile `unit` inside the sandbox, reusing a cached artifact when one
    /// exists for the same cache key
    pub async fn compile(
        &self,
        runner: &SandboxedRunner,
        unit: &CompileUnit,
        work_dir: &Path,
    ) -> Result<CompileResult> {
        if self.restore_cached(unit).await {
            return Ok(CompileResult {
                success: true,
                message: None,
                cached: true,
            });
        }

        let command = self.compile_command(unit);
        info!("Compile args: {:?}", command.to_vec());

        // Compilation never gets network access
        let policy = self.toolchain_policy(
            SandboxPolicy::runtime_default().grant(work_dir, FsAccess::ReadWrite),
        );
        let limits = RunLimits::new(
            self.config.limits.compile_time_limit_ms,
            self.config.limits.compile_memory_limit_mb,
        );

        let result = runner
            .execute(&command, work_dir, &policy, &limits, None)
            .await
            .context("Failed to run compiler")?;

        if result.is_success() {
            self.store_cached(unit).await;
            return Ok(CompileResult {
                success: true,
                message: None,
                cached: false,
            });
        }

        let error_msg = if !result.stderr.is_empty() {
            result.stderr_text()
        } else if !result.stdout.is_empty() {
            result.stdout_text()
        } else {
            match result.status {
                RunStatus::TimeLimitExceeded => "Compilation timed out".to_string(),
                RunStatus::Signaled(_) => "Compiler crashed".to_string(),
                RunStatus::Exited(code) => format!("Compilation failed with exit code {}", code),
                _ => "Compilation failed".to_string(),
            }
        };

        Ok(CompileResult {
            success: false,
            message: Some(error_msg),
            cached: false,
        })
    }

    fn cache_entry(&self, unit: &CompileUnit) -> Option<PathBuf> {
        let dir = self.config.compile_cache_dir.as_ref()?;
        let name = unit.output.file_name()?;
        Some(dir.join(&unit.cache_key).join(name))
    }

    async fn restore_cached(&self, unit: &CompileUnit) -> bool {
        let Some(entry) = self.cache_entry(unit) else {
            return false;
        };
        if !entry.is_file() {
            return false;
        }
        match tokio::fs::copy(&entry, &unit.output).await {
            Ok(_) => {
                info!("Using cached build {}", unit.cache_key);
                true
            }
            Err(e) => {
                warn!("Failed to restore cached build {:?}: {}", entry, e);
                false
            }
        }
    }

    async fn store_cached(&self, unit: &CompileUnit) {
        let Some(entry) = self.cache_entry(unit) else {
            return;
        };
        let stored = async {
            if let Some(parent) = entry.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&unit.output, &entry).await
        };
        match stored.await {
            Ok(_) => debug!("Cached build {} at {:?}", unit.cache_key, entry),
            Err(e) => warn!("Failed to cache build {}: {}", unit.cache_key, e),
        }
    }
}

/// Hash the inputs that determine the compiled artifact
fn cache_key(
    problem_id: &str,
    compiler: &Path,
    flags: &[String],
    sources: &[PathBuf],
) -> Result<String> {
    let mut hasher = Sha256::new();
    // Length prefixes keep field boundaries unambiguous
    let mut field = |bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };

    field(problem_id.as_bytes());
    field(compiler.as_os_str().as_encoded_bytes());
    for flag in flags {
        field(flag.as_bytes());
    }
    for source in sources {
        let content =
            std::fs::read(source).with_context(|| format!("Failed to read {:?}", source))?;
        field(&content);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Last path component, so names cannot escape the working directory
fn file_name_only(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "main".to_string())
}

/// Append `.ext` unless `name` already ends in one of the `known` extensions
fn with_default_extension(name: &str, ext: &str, known: &[&str]) -> String {
    let recognized = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| known.contains(&e));
    if recognized {
        name.to_string()
    } else {
        format!("{}.{}", name, ext)
    }
}
