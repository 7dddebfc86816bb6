//! Isolate box management
//!
//! Low-level wrapper around the isolate sandbox for secure code execution.
//! Manages box initialization, cleanup, and command execution.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::meta::{parse_meta, SandboxMeta, Termination};
use super::policy::{FsAccess, SandboxPolicy};
use super::{Limits, Sandbox, SandboxOutcome, SandboxRequest};

const STDIN_FILE: &str = ".judge.stdin";
const STDOUT_FILE: &str = ".judge.stdout";
const STDERR_FILE: &str = ".judge.stderr";

/// Box ids a single worker cycles through
const BOXES_PER_WORKER: u32 = 1000;

/// Isolate box manager
pub struct IsolateBox {
    box_id: u32,
    use_cgroups: bool,
}

impl IsolateBox {
    /// Create and initialize a new isolate box
    pub async fn new(box_id: u32, use_cgroups: bool) -> Result<Self> {
        // Clean up any existing box
        let _ = Command::new("isolate")
            .args(["--box-id", &box_id.to_string(), "--cleanup"])
            .output()
            .await;

        let box_id_str = box_id.to_string();
        let mut args = vec!["--box-id", &box_id_str];
        if use_cgroups {
            args.push("--cg");
        }
        args.push("--init");

        let output = Command::new("isolate")
            .args(&args)
            .output()
            .await
            .context("Failed to run isolate --init")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to initialize isolate box: {}", stderr);
        }

        let box_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(
            "Initialized isolate box {} at {} (cgroups: {})",
            box_id, box_path, use_cgroups
        );

        Ok(Self {
            box_id,
            use_cgroups,
        })
    }

    /// Run a command in the isolate box
    pub async fn run(&self, request: &SandboxRequest) -> Result<SandboxOutcome> {
        let meta_file = format!("/tmp/isolate_meta_{}.txt", self.box_id);
        let stdout_path = request.work_dir.join(STDOUT_FILE);
        let stderr_path = request.work_dir.join(STDERR_FILE);
        let stdin_path = request.work_dir.join(STDIN_FILE);

        let mut args = vec!["--box-id".to_string(), self.box_id.to_string()];
        args.extend(limit_args(&request.limits, self.use_cgroups));
        args.push(format!("--meta={}", meta_file));
        args.extend(policy_args(&request.policy, &request.work_dir));
        args.extend([
            "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
            format!("--env=HOME={}", request.work_dir.display()),
            format!("--chdir={}", request.work_dir.display()),
            format!("--stdout={}", stdout_path.display()),
            format!("--stderr={}", stderr_path.display()),
        ]);

        if let Some(stdin) = &request.stdin {
            fs::write(&stdin_path, stdin).await?;
            args.push(format!("--stdin={}", stdin_path.display()));
        }

        args.push("--run".to_string());
        args.push("--".to_string());
        args.extend(request.command.iter().cloned());

        debug!("Running isolate with args: {:?}", args);

        let output = Command::new("isolate")
            .args(&args)
            .output()
            .await
            .context("Failed to run isolate")?;

        let meta_content = fs::read_to_string(&meta_file).await.unwrap_or_default();
        let meta = settle_meta(
            &meta_content,
            output.status.success(),
            &String::from_utf8_lossy(&output.stderr),
        );

        let (stdout, stdout_truncated) = read_capped(&stdout_path, request.stdout_limit).await;
        let (stderr, _) = read_capped(&stderr_path, request.stderr_limit).await;

        for path in [&stdout_path, &stderr_path, &stdin_path] {
            let _ = fs::remove_file(path).await;
        }
        let _ = fs::remove_file(&meta_file).await;

        Ok(SandboxOutcome {
            meta,
            stdout,
            stderr,
            stdout_truncated,
        })
    }

    /// Cleanup the isolate box
    pub async fn cleanup(self) -> Result<()> {
        Command::new("isolate")
            .args(["--box-id", &self.box_id.to_string(), "--cleanup"])
            .output()
            .await?;
        info!("Cleaned up isolate box {}", self.box_id);
        Ok(())
    }
}

/// Parse the meta file, treating a failed isolate invocation that never
/// reported a status as a sandbox failure
fn settle_meta(content: &str, isolate_succeeded: bool, isolate_stderr: &str) -> SandboxMeta {
    let mut meta = parse_meta(content);
    let reported = content
        .lines()
        .any(|line| line.trim_start().starts_with("status:"));

    if !isolate_succeeded && !reported {
        let message = isolate_stderr.trim();
        meta.termination = Termination::SandboxFailure(if message.is_empty() {
            "isolate failed without a status".to_string()
        } else {
            message.to_string()
        });
    }
    meta
}

fn limit_args(limits: &Limits, use_cgroups: bool) -> Vec<String> {
    let time_limit_secs = (limits.time_ms as f64) / 1000.0;
    let wall_time_secs = time_limit_secs * 2.0 + 1.0;

    let mut args = Vec::new();
    if use_cgroups {
        args.push("--cg".to_string());
        args.push(format!("--cg-mem={}", limits.memory_mb * 1024));
    }
    args.extend([
        format!("--time={}", time_limit_secs),
        format!("--wall-time={}", wall_time_secs),
        format!("--processes={}", limits.processes),
        format!("--open-files={}", limits.open_files),
        format!("--fsize={}", limits.fsize_kb),
    ]);
    args
}

/// Render a policy as isolate directory rules and network sharing.
///
/// Every grant except the working directory is optional, so a directory
/// missing on the host is skipped instead of failing the mount.
fn policy_args(policy: &SandboxPolicy, work_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = policy
        .grants()
        .map(|(path, access)| {
            let options = match access {
                FsAccess::ReadNoExec => "noexec,maybe",
                FsAccess::Read => "maybe",
                FsAccess::Tmp => "tmp",
                FsAccess::ReadWrite if path == work_dir => "rw",
                FsAccess::ReadWrite => "rw,maybe",
            };
            format!("--dir={}:{}", path.display(), options)
        })
        .collect();

    if policy.allows_network() {
        args.push("--share-net".to_string());
    }
    args
}

/// Read at most `limit` bytes; the flag reports whether the file was longer
async fn read_capped(path: &Path, limit: usize) -> (Vec<u8>, bool) {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return (Vec::new(), false),
    };
    let mut buf = Vec::new();
    // One extra byte tells a full read from a cut one
    if let Err(e) = file.take(limit as u64 + 1).read_to_end(&mut buf).await {
        warn!("Failed to read sandbox output {:?}: {}", path, e);
    }
    let truncated = buf.len() > limit;
    buf.truncate(limit);
    (buf, truncated)
}

/// Sandbox collaborator backed by isolate
pub struct IsolateSandbox {
    worker_id: u32,
    counter: AtomicU32,
    cgroups: OnceCell<bool>,
}

impl IsolateSandbox {
    pub fn new(worker_id: u32) -> Self {
        Self {
            worker_id,
            counter: AtomicU32::new(0),
            cgroups: OnceCell::new(),
        }
    }

    /// Each worker (0-9) gets a dedicated range of 1000 box IDs
    fn next_box_id(&self) -> u32 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        (self.worker_id % 10) * BOXES_PER_WORKER + (counter % BOXES_PER_WORKER)
    }

    /// Check (once) if isolate cgroups are available
    pub async fn cgroups_available(&self) -> bool {
        *self
            .cgroups
            .get_or_init(|| async {
                let test_result = Command::new("isolate")
                    .args(["--box-id", "99", "--cg", "--init"])
                    .output()
                    .await;

                let _ = Command::new("isolate")
                    .args(["--box-id", "99", "--cleanup"])
                    .output()
                    .await;

                matches!(test_result, Ok(r) if r.status.success())
            })
            .await
    }

    /// Ensure cgroups are available; return an error otherwise
    pub async fn ensure_cgroups_available(&self) -> Result<()> {
        if self.cgroups_available().await {
            Ok(())
        } else {
            anyhow::bail!("Isolate cgroup support is required but not available. Install isolate with cgroup support and ensure cgroups are enabled.")
        }
    }
}

/// The sandbox user must be able to write into every writable grant
async fn open_writable_grants(policy: &SandboxPolicy) {
    let writable: Vec<PathBuf> = policy
        .grants()
        .filter(|(_, access)| *access == FsAccess::ReadWrite)
        .map(|(path, _)| path.to_path_buf())
        .collect();

    for path in writable {
        if let Err(e) = fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777)).await {
            warn!("Failed to open {:?} to the sandbox user: {}", path, e);
        }
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    async fn run(&self, request: &SandboxRequest) -> Result<SandboxOutcome> {
        if request.command.is_empty() {
            anyhow::bail!("No command specified for execution");
        }
        self.ensure_cgroups_available().await?;

        open_writable_grants(&request.policy).await;

        let isolate_box = IsolateBox::new(self.next_box_id(), true).await?;
        let outcome = isolate_box.run(request).await;
        isolate_box.cleanup().await?;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::policy::build_policy;

    #[test]
    fn test_policy_args_render_grants_and_network() {
        let policy = build_policy(
            &SandboxPolicy::runtime_default(),
            Path::new("/work/s1"),
            Path::new("/waves"),
            true,
        );
        let args = policy_args(&policy, Path::new("/work/s1"));

        assert!(args.contains(&"--dir=/usr:maybe".to_string()));
        assert!(args.contains(&"--dir=/etc:noexec,maybe".to_string()));
        assert!(args.contains(&"--dir=/tmp:tmp".to_string()));
        assert!(args.contains(&"--dir=/work/s1:rw".to_string()));
        assert!(args.contains(&"--dir=/waves:rw,maybe".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--share-net"));
    }

    #[test]
    fn test_policy_args_without_network() {
        let policy = build_policy(
            &SandboxPolicy::runtime_default(),
            Path::new("/work/s1"),
            Path::new("/waves"),
            false,
        );
        assert!(!policy_args(&policy, Path::new("/work/s1")).contains(&"--share-net".to_string()));
    }

    #[test]
    fn test_failed_isolate_run_is_sandbox_failure() {
        let meta = settle_meta("", false, "Cannot mount /waves: No such file or directory\n");
        assert_eq!(
            meta.termination,
            Termination::SandboxFailure("Cannot mount /waves: No such file or directory".to_string())
        );

        // A program that exits non-zero also makes isolate exit non-zero
        let meta = settle_meta("time:0.010\nexitcode:1\nstatus:RE\n", false, "");
        assert_eq!(meta.termination, Termination::Exited(1));

        let meta = settle_meta("time:0.010\ntime-wall:0.020\n", true, "");
        assert_eq!(meta.termination, Termination::Exited(0));
    }

    #[test]
    fn test_limit_args() {
        let limits = Limits {
            time_ms: 2500,
            memory_mb: 128,
            ..Limits::default()
        };
        let args = limit_args(&limits, true);

        assert_eq!(args[0], "--cg");
        assert_eq!(args[1], "--cg-mem=131072");
        assert!(args.contains(&"--time=2.5".to_string()));
        assert!(args.contains(&"--wall-time=6".to_string()));
        assert!(args.contains(&"--fsize=51200".to_string()));
    }

    #[test]
    fn test_box_ids_stay_in_worker_range() {
        let sandbox = IsolateSandbox::new(3);
        let first = sandbox.next_box_id();
        let second = sandbox.next_box_id();
        assert_eq!(first, 3000);
        assert_eq!(second, 3001);
    }

    #[test]
    fn test_read_capped_reports_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        std::fs::write(&path, b"0123456789").unwrap();

        let (data, truncated) = tokio_test::block_on(read_capped(&path, 4));
        assert_eq!(data, b"0123");
        assert!(truncated);

        let (data, truncated) = tokio_test::block_on(read_capped(&path, 10));
        assert_eq!(data, b"0123456789");
        assert!(!truncated);

        let (data, truncated) = tokio_test::block_on(read_capped(&dir.path().join("missing"), 10));
        assert!(data.is_empty());
        assert!(!truncated);
    }
}
