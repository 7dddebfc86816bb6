//! Isolate meta file parser
//!
//! Turns the `key:value` meta file isolate writes after `--run` into resource
//! usage and a raw termination status.

/// How the sandboxed process terminated
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// Exited on its own with the given code
    Exited(i32),
    /// CPU or wall time limit hit
    TimedOut,
    /// Killed by a signal
    Signaled(i32),
    /// Killed by the cgroup OOM killer
    OutOfMemory,
    /// The sandbox itself failed
    SandboxFailure(String),
}

/// Resource usage and termination reported by the sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxMeta {
    /// CPU time in milliseconds
    pub time_ms: u32,
    /// Wall clock time in milliseconds
    pub wall_time_ms: u32,
    /// Peak memory in KB (cg-mem or max-rss, whichever is larger)
    pub memory_kb: u32,
    pub termination: Termination,
}

impl Default for SandboxMeta {
    fn default() -> Self {
        Self {
            time_ms: 0,
            wall_time_ms: 0,
            memory_kb: 0,
            termination: Termination::Exited(0),
        }
    }
}

fn seconds_to_ms(value: &str) -> Option<u32> {
    value.parse::<f64>().ok().map(|t| (t * 1000.0) as u32)
}

/// Parse isolate meta file content
pub fn parse_meta(content: &str) -> SandboxMeta {
    let mut meta = SandboxMeta::default();
    let mut status = String::new();
    let mut message = String::new();
    let mut exit_code = 0;
    let mut exit_signal = None;
    let mut oom_killed = false;
    let mut fields = 0;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        fields += 1;
        let value = value.trim();

        match key.trim() {
            "time" => meta.time_ms = seconds_to_ms(value).unwrap_or(meta.time_ms),
            "time-wall" => meta.wall_time_ms = seconds_to_ms(value).unwrap_or(meta.wall_time_ms),
            "cg-mem" | "max-rss" => {
                if let Ok(kb) = value.parse::<u32>() {
                    meta.memory_kb = meta.memory_kb.max(kb);
                }
            }
            "cg-oom-killed" => oom_killed = value == "1",
            "exitcode" => exit_code = value.parse().unwrap_or(0),
            "exitsig" => exit_signal = value.parse().ok(),
            "status" => status = value.to_string(),
            "message" => message = value.to_string(),
            _ => {}
        }
    }

    // isolate always reports timings once the program has run
    if fields == 0 {
        meta.termination = Termination::SandboxFailure("empty meta file".to_string());
        return meta;
    }

    meta.termination = if oom_killed {
        Termination::OutOfMemory
    } else {
        match status.as_str() {
            "TO" => Termination::TimedOut,
            "XX" => Termination::SandboxFailure(message),
            "SG" => Termination::Signaled(exit_signal.unwrap_or(0)),
            _ => match exit_signal {
                Some(sig) => Termination::Signaled(sig),
                None => Termination::Exited(exit_code),
            },
        }
    };

    meta
}
