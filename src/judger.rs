//! Judger module for processing submission judge jobs
//!
//! Runs one submission through the whole pipeline: compile, then for every
//! case execute, check, and fold in the post-check adjustments (resource
//! limits, waveform capture, synthesis verification).

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::checker;
use crate::compiler::CompileStage;
use crate::config::JudgeConfig;
use crate::core::utils::log_artifacts;
use crate::core::{Adjustment, Submission, SubmissionMeta, Verdict};
use crate::error::JudgeError;
use crate::runner::{RunLimits, RunStatus, SandboxedRunner};
use crate::sandbox::{build_policy, Sandbox, SandboxPolicy};
use crate::synthesis::{SynthesisClient, SynthesisVerifier};
use crate::waveform::{WaveformCapture, WAVEFORM_FILE};

/// Job handed to the worker
#[derive(Debug, Serialize, Deserialize)]
pub struct JudgeJob {
    #[serde(default)]
    pub submission_id: Option<String>,
    pub problem_id: String,
    pub source: String,
    #[serde(default)]
    pub aux_sources: BTreeMap<String, AuxSource>,
    #[serde(default)]
    pub meta: SubmissionMeta,
    pub time_limit: u32, // ms
    pub memory_limit: u32, // MB
    pub cases: Vec<CaseInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuxSource {
    pub content: String,
    /// `content` is base64
    #[serde(default)]
    pub is_binary: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseInfo {
    pub id: i64,
    pub points: f64,
    /// Fed to the simulation on stdin
    #[serde(default)]
    pub input: Option<String>,
}

/// Result of judging a submission
#[derive(Debug, Serialize, Deserialize)]
pub struct JudgeResult {
    pub submission_id: Option<String>,
    pub verdict: String,
    pub score: f64,
    pub max_score: f64,
    pub case_results: Vec<CaseResult>,
    /// Compile error / internal error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: i64,
    pub verdict: String,
    pub points: f64,
    pub feedback: String,
    pub extended_feedback: String,
    pub time_ms: u32,
    pub memory_kb: u32,
}

impl JudgeJob {
    /// Build the immutable submission view, decoding binary aux sources
    pub fn to_submission(&self) -> Result<Submission> {
        let mut submission = Submission::new(self.problem_id.clone(), self.source.clone())
            .with_meta(self.meta.clone());

        for (name, aux) in &self.aux_sources {
            let content = if aux.is_binary {
                BASE64
                    .decode(aux.content.trim())
                    .with_context(|| format!("Invalid base64 in aux source {}", name))?
            } else {
                aux.content.clone().into_bytes()
            };
            submission = submission.with_aux_source(name.clone(), content);
        }

        if let Some(id) = &self.submission_id {
            submission = submission.with_submission_id(id.clone());
        }
        Ok(submission)
    }

    fn max_score(&self) -> f64 {
        self.cases.iter().map(|c| c.points).sum()
    }

    fn early_result(&self, verdict: Verdict, message: String) -> JudgeResult {
        JudgeResult {
            submission_id: self.submission_id.clone(),
            verdict: verdict.to_string(),
            score: 0.0,
            max_score: self.max_score(),
            case_results: vec![],
            error_message: Some(message),
            cache_key: None,
        }
    }
}

/// Abnormal terminations the checker cannot see in stdout. A plain non-zero
/// exit is left to the checker.
fn status_adjustment(status: &RunStatus) -> Option<Adjustment> {
    match status {
        RunStatus::TimeLimitExceeded => Some(Adjustment::demote(
            Verdict::TimeLimitExceeded,
            "time limit exceeded",
        )),
        RunStatus::MemoryLimitExceeded => Some(Adjustment::demote(
            Verdict::MemoryLimitExceeded,
            "memory limit exceeded",
        )),
        RunStatus::OutputLimitExceeded => Some(Adjustment::demote(
            Verdict::OutputLimitExceeded,
            "output limit exceeded",
        )),
        RunStatus::SystemError(message) => Some(Adjustment::demote(
            Verdict::InternalError,
            format!("sandbox error: {}", message),
        )),
        RunStatus::Signaled(signal) => Some(Adjustment::demote(
            Verdict::RuntimeError,
            format!("runtime error (signal {})", signal),
        )),
        RunStatus::Exited(_) => None,
    }
}

pub struct Judger {
    config: Arc<JudgeConfig>,
    runner: SandboxedRunner,
    waveform: WaveformCapture,
    synthesis: SynthesisVerifier,
}

impl Judger {
    pub fn new(
        config: Arc<JudgeConfig>,
        sandbox: Arc<dyn Sandbox>,
        synthesis_client: Arc<dyn SynthesisClient>,
    ) -> Self {
        Self {
            runner: SandboxedRunner::new(sandbox, config.limits.clone()),
            waveform: WaveformCapture::new(&config.artifact_dir),
            synthesis: SynthesisVerifier::new(config.clone(), synthesis_client),
            config,
        }
    }

    /// Judge one job. Configuration and missing-input errors become an
    /// `internal_error` result; anything else is a worker failure.
    pub async fn judge(&self, job: &JudgeJob) -> Result<JudgeResult> {
        match self.process(job).await {
            Ok(result) => Ok(result),
            Err(e) => match e.downcast_ref::<JudgeError>() {
                Some(judge_error) if judge_error.is_internal() => {
                    error!(
                        "Internal error for submission {:?}: {}",
                        job.submission_id, judge_error
                    );
                    Ok(job.early_result(Verdict::InternalError, judge_error.to_string()))
                }
                _ => Err(e),
            },
        }
    }

    async fn process(&self, job: &JudgeJob) -> Result<JudgeResult> {
        let submission = job.to_submission()?;
        let stage = CompileStage::new(self.config.clone())?;

        tokio::fs::create_dir_all(&self.config.work_root).await?;
        let work = tempfile::Builder::new()
            .prefix("hdl-judge-")
            .tempdir_in(&self.config.work_root)
            .context("Failed to create working directory")?;
        let work_dir = work.path();

        let unit = stage.prepare(&submission, work_dir).await?;
        let compile_result = stage.compile(&self.runner, &unit, work_dir).await?;
        if !compile_result.success {
            info!(
                "Compile error: submission_id={:?}, problem={}",
                job.submission_id, job.problem_id
            );
            let mut result = job.early_result(
                Verdict::CompileError,
                compile_result.message.unwrap_or_default(),
            );
            result.cache_key = Some(unit.cache_key);
            return Ok(result);
        }
        info!(
            "Compiled problem {} (cache_key={}, cached={})",
            job.problem_id, unit.cache_key, compile_result.cached
        );

        if let Err(e) = tokio::fs::create_dir_all(&self.config.artifact_dir).await {
            warn!("Failed to create artifact dir {:?}: {}", self.config.artifact_dir, e);
        }
        let policy = stage.toolchain_policy(build_policy(
            &SandboxPolicy::runtime_default(),
            work_dir,
            &self.config.artifact_dir,
            submission.meta.ppa_enabled(),
        ));
        let run_command = stage.run_command(&unit);
        info!("Run cmd: {:?}", run_command.to_vec());
        let limits = RunLimits::new(job.time_limit, job.memory_limit);

        let mut ppa_adjustments: Option<Vec<Adjustment>> = None;
        let mut case_results = Vec::with_capacity(job.cases.len());
        let mut overall_verdict = Verdict::Accepted;
        let mut score = 0.0;

        for case in &job.cases {
            remove_stale_trace(work_dir).await;

            let run_result = self
                .runner
                .execute(
                    &run_command,
                    work_dir,
                    &policy,
                    &limits,
                    case.input.as_deref().map(str::as_bytes),
                )
                .await
                .with_context(|| format!("Failed to run case {}", case.id))?;
            log_artifacts(work_dir);

            let mut adjustments: Vec<Adjustment> = Vec::new();
            adjustments.extend(status_adjustment(&run_result.status));
            adjustments.extend(self.waveform.capture(&submission, work_dir).await);

            if ppa_adjustments.is_none() {
                ppa_adjustments = Some(self.synthesis.verify(&submission, &unit.sources[0]).await);
            }
            adjustments.extend(ppa_adjustments.iter().flatten().cloned());

            let verdict = checker::check(&run_result, case.points).adjust_all(adjustments);

            if verdict.verdict != Verdict::Accepted && overall_verdict == Verdict::Accepted {
                overall_verdict = verdict.verdict;
            }
            score += verdict.points;

            case_results.push(CaseResult {
                case_id: case.id,
                verdict: verdict.verdict.to_string(),
                points: verdict.points,
                feedback: verdict.feedback,
                extended_feedback: verdict.extended_feedback,
                time_ms: run_result.time_ms,
                memory_kb: run_result.memory_kb,
            });
        }

        info!(
            "Job summary: submission_id={:?}, verdict={}, score={}/{}",
            job.submission_id,
            overall_verdict,
            score,
            job.max_score()
        );

        Ok(JudgeResult {
            submission_id: job.submission_id.clone(),
            verdict: overall_verdict.to_string(),
            score,
            max_score: job.max_score(),
            case_results,
            error_message: None,
            cache_key: Some(unit.cache_key),
        })
    }
}

/// A trace from an earlier case must not be attributed to the next one
async fn remove_stale_trace(work_dir: &Path) {
    let trace = work_dir.join(WAVEFORM_FILE);
    if let Err(e) = tokio::fs::remove_file(&trace).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove stale {:?}: {}", trace, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolchainConfig;
    use crate::error::ProviderError;
    use crate::runner::sandboxed::fake::{FakeSandbox, Script};
    use crate::synthesis::report::MetricMap;
    use crate::synthesis::SynthesisRequest;
    use async_trait::async_trait;

    /// Reports the same metrics for every provider
    struct StaticClient(MetricMap);

    #[async_trait]
    impl SynthesisClient for StaticClient {
        async fn synthesize(&self, _request: SynthesisRequest) -> Result<MetricMap, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn test_config(dir: &Path) -> JudgeConfig {
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("iverilog"), b"").unwrap();
        std::fs::write(bin.join("vvp"), b"").unwrap();

        JudgeConfig {
            work_root: dir.join("work"),
            problems_root: dir.join("problems"),
            artifact_dir: dir.join("waves"),
            toolchain: ToolchainConfig {
                compiler: bin.join("iverilog").to_string_lossy().into_owned(),
                runtime: bin.join("vvp").to_string_lossy().into_owned(),
                ..ToolchainConfig::default()
            },
            ..JudgeConfig::default()
        }
    }

    fn job(meta: SubmissionMeta) -> JudgeJob {
        JudgeJob {
            submission_id: Some("1001".to_string()),
            problem_id: "alu".to_string(),
            source: "module top; endmodule".to_string(),
            aux_sources: BTreeMap::new(),
            meta,
            time_limit: 2000,
            memory_limit: 256,
            cases: vec![
                CaseInfo {
                    id: 1,
                    points: 40.0,
                    input: None,
                },
                CaseInfo {
                    id: 2,
                    points: 60.0,
                    input: Some("3 4\n".to_string()),
                },
            ],
        }
    }

    fn judger(config: JudgeConfig, sandbox: Arc<FakeSandbox>, metrics: &[(&str, f64)]) -> Judger {
        let metrics = metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Judger::new(Arc::new(config), sandbox, Arc::new(StaticClient(metrics)))
    }

    fn stdout(text: &str) -> Script {
        Script {
            stdout: text.as_bytes().to_vec(),
            ..Script::default()
        }
    }

    #[tokio::test]
    async fn test_accepted_submission_scores_all_points() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(FakeSandbox::new(stdout("RESULT: OK\n")));
        let judger = judger(test_config(dir.path()), sandbox.clone(), &[]);

        let result = judger.judge(&job(SubmissionMeta::new())).await.unwrap();

        assert_eq!(result.verdict, "accepted");
        assert_eq!(result.score, 100.0);
        assert_eq!(result.max_score, 100.0);
        assert_eq!(result.case_results.len(), 2);
        assert!(result.cache_key.is_some());

        let requests = sandbox.recorded();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].command[0].ends_with("vvp"));
        assert_eq!(requests[2].stdin.as_deref(), Some(&b"3 4\n"[..]));
        assert!(!requests[1].policy.allows_network());
    }

    #[tokio::test]
    async fn test_wrong_answer_reports_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(FakeSandbox::new(stdout("garbage\nRESULT: WA 3\n")));
        let judger = judger(test_config(dir.path()), sandbox, &[]);

        let result = judger.judge(&job(SubmissionMeta::new())).await.unwrap();

        assert_eq!(result.verdict, "wrong_answer");
        assert_eq!(result.score, 0.0);
        assert!(result.case_results[0].feedback.contains('3'));
    }

    #[tokio::test]
    async fn test_empty_output_explains_itself() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(FakeSandbox::new(Script {
            stderr: b"tb.v:9: $finish called".to_vec(),
            ..Script::default()
        }));
        let judger = judger(test_config(dir.path()), sandbox, &[]);

        let result = judger.judge(&job(SubmissionMeta::new())).await.unwrap();
        let case = &result.case_results[0];

        assert_eq!(result.verdict, "wrong_answer");
        assert!(case.feedback.starts_with("no output on stdout"));
        assert!(case.extended_feedback.contains("$finish called"));
    }

    #[tokio::test]
    async fn test_compile_error_stops_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut sandbox = FakeSandbox::new(stdout("RESULT: OK\n"));
        sandbox.compile = Script {
            stderr: b"alu.v:1: syntax error".to_vec(),
            exit_code: 2,
            ..Script::default()
        };
        let sandbox = Arc::new(sandbox);
        let judger = judger(test_config(dir.path()), sandbox.clone(), &[]);

        let result = judger.judge(&job(SubmissionMeta::new())).await.unwrap();

        assert_eq!(result.verdict, "compile_error");
        assert_eq!(result.error_message.as_deref(), Some("alu.v:1: syntax error"));
        assert!(result.case_results.is_empty());
        assert_eq!(sandbox.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_compiler_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.toolchain.compiler = "/nonexistent/iverilog".to_string();
        let sandbox = Arc::new(FakeSandbox::new(stdout("RESULT: OK\n")));
        let judger = judger(config, sandbox.clone(), &[]);

        let result = judger.judge(&job(SubmissionMeta::new())).await.unwrap();

        assert_eq!(result.verdict, "internal_error");
        assert!(result
            .error_message
            .unwrap()
            .starts_with("Configuration error"));
        assert!(sandbox.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_time_limit_demotes_passing_output() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(FakeSandbox::new(Script {
            stdout: b"RESULT: OK\n".to_vec(),
            timed_out: true,
            ..Script::default()
        }));
        let judger = judger(test_config(dir.path()), sandbox, &[]);

        let result = judger.judge(&job(SubmissionMeta::new())).await.unwrap();

        assert_eq!(result.verdict, "time_limit_exceeded");
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_waveform_and_failed_ppa_on_correct_design() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let constraints = config.problems_root.join("alu/f4pga");
        std::fs::create_dir_all(&constraints).unwrap();
        std::fs::write(constraints.join("basys3.xdc"), b"# pins").unwrap();
        let waves = config.artifact_dir.clone();

        let sandbox = Arc::new(FakeSandbox::new(Script {
            stdout: b"RESULT: OK\n".to_vec(),
            writes: vec![(WAVEFORM_FILE.to_string(), vec![b'#'; 256])],
            ..Script::default()
        }));
        let judger = judger(config, sandbox.clone(), &[("fmax_mhz", 80.0)]);
        let meta = SubmissionMeta::new()
            .with("enable_waveform", true)
            .with("enable_ppa", true)
            .with("f4pga_board", "basys3")
            .with("target_fmax_mhz", 100);

        let result = judger.judge(&job(meta)).await.unwrap();

        assert_eq!(result.verdict, "performance_limit_exceeded");
        assert_eq!(result.score, 0.0);
        let case = &result.case_results[0];
        assert_eq!(case.feedback, "PPA: 1 item(s) failed");
        assert!(case
            .extended_feedback
            .starts_with(&format!("[WAVEFORM]VCD:{}", waves.join("1001.vcd").display())));
        assert!(case
            .extended_feedback
            .contains("- [F4PGA] fmax: 80 MHz (target >= 100 MHz) FAIL"));
        assert!(waves.join("1001.vcd").is_file());
        assert!(sandbox.recorded()[1].policy.allows_network());
    }

    #[test]
    fn test_job_decodes_binary_aux_sources() {
        let job: JudgeJob = serde_json::from_value(serde_json::json!({
            "problem_id": "alu",
            "source": "module top; endmodule",
            "aux_sources": {
                "tb.v": {"content": "module tb; endmodule"},
                "lib.sv": {"content": "bW9kdWxlIGxpYjsgZW5kbW9kdWxl", "is_binary": true}
            },
            "meta": {"enable_waveform": "true"},
            "time_limit": 1000,
            "memory_limit": 128,
            "cases": [{"id": 1, "points": 100}]
        }))
        .unwrap();

        let submission = job.to_submission().unwrap();
        assert_eq!(submission.aux_sources["lib.sv"], b"module lib; endmodule");
        assert_eq!(submission.aux_sources["tb.v"], b"module tb; endmodule");
        assert!(submission.meta.waveform_enabled());
        assert_eq!(submission.artifact_stem(), "unknown");
    }
}
