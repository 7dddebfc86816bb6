//! Sandbox capability policy
//!
//! A policy is a set of filesystem grants plus a set of permitted syscalls.
//! Grants only ever widen: merging a weaker grant for a path that already has
//! a stronger one keeps the stronger one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Syscalls needed to open outbound connections
pub const NETWORK_SYSCALLS: &[&str] = &[
    "socket",
    "connect",
    "bind",
    "getsockname",
    "getpeername",
    "getsockopt",
    "setsockopt",
    "sendto",
    "recvfrom",
    "sendmsg",
    "recvmsg",
    "shutdown",
];

/// Filesystem access level, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FsAccess {
    /// Readable, nothing may be executed from it
    ReadNoExec,
    /// Readable and executable
    Read,
    /// Private scratch directory
    Tmp,
    /// Readable, writable and executable
    ReadWrite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxPolicy {
    fs: BTreeMap<PathBuf, FsAccess>,
    syscalls: BTreeSet<String>,
}

impl SandboxPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants the runtime needs to start a dynamically linked simulator
    pub fn runtime_default() -> Self {
        Self::new()
            .grant("/usr", FsAccess::Read)
            .grant("/lib", FsAccess::Read)
            .grant("/lib64", FsAccess::Read)
            .grant("/etc", FsAccess::ReadNoExec)
            .grant("/tmp", FsAccess::Tmp)
    }

    pub fn grant(mut self, path: impl AsRef<Path>, access: FsAccess) -> Self {
        let entry = self
            .fs
            .entry(path.as_ref().to_path_buf())
            .or_insert(access);
        if access > *entry {
            *entry = access;
        }
        self
    }

    pub fn allow_syscalls<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.syscalls.extend(names.into_iter().map(str::to_string));
        self
    }

    #[cfg(test)]
    pub fn access(&self, path: &Path) -> Option<FsAccess> {
        self.fs.get(path).copied()
    }

    #[cfg(test)]
    pub fn is_writable(&self, path: &Path) -> bool {
        self.access(path) == Some(FsAccess::ReadWrite)
    }

    pub fn allows_syscall(&self, name: &str) -> bool {
        self.syscalls.contains(name)
    }

    pub fn allows_network(&self) -> bool {
        NETWORK_SYSCALLS.iter().all(|name| self.allows_syscall(name))
    }

    /// Filesystem grants in path order
    pub fn grants(&self) -> impl Iterator<Item = (&Path, FsAccess)> {
        self.fs.iter().map(|(path, access)| (path.as_path(), *access))
    }
}

/// Build the policy for one sandboxed run of a submission.
///
/// Adds, on top of `base`: a writable working directory, a writable durable
/// artifact directory, and the network syscalls when synthesis verification
/// is enabled. Nothing granted by `base` is removed.
pub fn build_policy(
    base: &SandboxPolicy,
    work_dir: &Path,
    artifact_dir: &Path,
    synthesis_enabled: bool,
) -> SandboxPolicy {
    let policy = base
        .clone()
        .grant(work_dir, FsAccess::ReadWrite)
        .grant(artifact_dir, FsAccess::ReadWrite);

    if synthesis_enabled {
        policy.allow_syscalls(NETWORK_SYSCALLS.iter().copied())
    } else {
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_policy_grants_work_and_artifact_dirs() {
        let base = SandboxPolicy::runtime_default();
        let policy = build_policy(&base, Path::new("/tmp/sub1"), Path::new("/waves"), false);

        assert!(policy.is_writable(Path::new("/tmp/sub1")));
        assert!(policy.is_writable(Path::new("/waves")));
        assert!(!policy.allows_network());
        assert!(!policy.allows_syscall("connect"));
    }

    #[test]
    fn test_network_only_with_synthesis() {
        let base = SandboxPolicy::runtime_default();
        let policy = build_policy(&base, Path::new("/w"), Path::new("/waves"), true);

        assert!(policy.allows_network());
        assert!(policy.allows_syscall("socket"));
    }

    #[test]
    fn test_build_policy_is_additive() {
        let base = SandboxPolicy::runtime_default().allow_syscalls(["clone"]);
        let policy = build_policy(&base, Path::new("/w"), Path::new("/waves"), false);

        for (path, access) in base.grants() {
            assert!(policy.access(path).unwrap() >= access, "lost grant {:?}", path);
        }
        assert!(policy.allows_syscall("clone"));
    }

    #[test]
    fn test_grant_never_downgrades() {
        let policy = SandboxPolicy::new()
            .grant("/data", FsAccess::ReadWrite)
            .grant("/data", FsAccess::ReadNoExec);
        assert_eq!(policy.access(Path::new("/data")), Some(FsAccess::ReadWrite));
    }

    #[test]
    fn test_build_policy_is_idempotent() {
        let base = SandboxPolicy::runtime_default();
        let first = build_policy(&base, Path::new("/w"), Path::new("/waves"), true);
        let second = build_policy(&base, Path::new("/w"), Path::new("/waves"), true);
        assert_eq!(first, second);
    }
}
