//! Synthesis (PPA) verification
//!
//! When a submission enables PPA, each provider with a target in the metadata
//! synthesizes the primary source against the problem's constraint file.
//! Reported metrics are compared with the per-problem thresholds and the
//! outcome is expressed as verdict adjustments:
//!
//! - every comparison becomes a feedback line, pass or fail
//! - any failed threshold demotes the case to `performance_limit_exceeded`
//! - a missing constraint file is an internal error and stops verification
//! - provider failures, and inputs that exist but cannot be read, are logged
//!   and only noted in the feedback

pub mod client;
pub mod provider;
pub mod report;

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::JudgeConfig;
use crate::core::{Adjustment, Submission, Verdict};
use crate::error::{JudgeError, ProviderError};

pub use client::{HttpSynthesisClient, SynthesisClient, SynthesisRequest};
pub use provider::{MetricCheck, Provider};

pub struct SynthesisVerifier {
    config: Arc<JudgeConfig>,
    client: Arc<dyn SynthesisClient>,
}

impl SynthesisVerifier {
    pub fn new(config: Arc<JudgeConfig>, client: Arc<dyn SynthesisClient>) -> Self {
        Self { config, client }
    }

    /// Run every enabled provider, one after another, and return the
    /// adjustments to apply to each case verdict
    pub async fn verify(&self, submission: &Submission, source_path: &Path) -> Vec<Adjustment> {
        if !submission.meta.ppa_enabled() {
            return Vec::new();
        }

        let mut adjustments = Vec::new();
        let mut failures = Vec::new();
        let mut providers_run = 0;

        for provider in Provider::ALL {
            let Some(target) = submission.meta.text(provider.target_key()) else {
                continue;
            };

            let request = match self.build_request(provider, submission, source_path, target).await
            {
                Ok(request) => request,
                Err(e @ JudgeError::MissingInput(_)) => {
                    error!("{} cannot run for problem {}: {}", provider, submission.problem_id, e);
                    adjustments.push(Adjustment::Annotate(format!("{} {}", provider.tag(), e)));
                    adjustments.push(Adjustment::demote(
                        Verdict::InternalError,
                        format!("{}: missing input file", provider),
                    ));
                    return adjustments;
                }
                Err(e) => {
                    warn!("{} input unreadable for problem {}: {}", provider, submission.problem_id, e);
                    adjustments.push(Adjustment::Annotate(format!(
                        "{} execution failed: {}",
                        provider.tag(),
                        e
                    )));
                    continue;
                }
            };

            info!(
                "Submitting problem {} to {} (target {})",
                submission.problem_id, provider, target
            );
            let metrics = match self.client.synthesize(request).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    log_provider_failure(provider, &e);
                    adjustments.push(Adjustment::Annotate(format!(
                        "{} execution failed: {}",
                        provider.tag(),
                        e
                    )));
                    continue;
                }
            };
            providers_run += 1;

            for metric in provider.metrics() {
                let check = MetricCheck {
                    provider,
                    metric,
                    measured: metric.lookup(&metrics),
                    threshold: submission.meta.number(metric.threshold_key),
                };
                let line = check.describe();
                if check.failed() {
                    failures.push(line.clone());
                }
                adjustments.push(Adjustment::Annotate(line));
            }
        }

        if !failures.is_empty() {
            info!(
                "PPA targets missed for problem {}: {} item(s)",
                submission.problem_id,
                failures.len()
            );
            let itemized: Vec<String> = failures.iter().map(|line| format!("- {}", line)).collect();
            adjustments.push(Adjustment::Annotate(format!(
                "[PPA] failed items:\n{}",
                itemized.join("\n")
            )));
            adjustments.push(Adjustment::demote(
                Verdict::PerformanceLimitExceeded,
                format!("PPA: {} item(s) failed", failures.len()),
            ));
        } else if providers_run > 0 {
            adjustments.push(Adjustment::Annotate("[PPA] all targets met".to_string()));
        }

        adjustments
    }

    /// Read the source and constraint file; both are closed before the call
    async fn build_request(
        &self,
        provider: Provider,
        submission: &Submission,
        source_path: &Path,
        target: &str,
    ) -> Result<SynthesisRequest, JudgeError> {
        let constraint_path =
            provider.constraint_path(&self.config.problems_root, &submission.problem_id, target);

        let source = read_input(source_path).await?;
        let constraint = read_input(&constraint_path).await?;

        Ok(SynthesisRequest {
            provider,
            endpoint: provider.endpoint(&self.config.synthesis).to_string(),
            source_name: file_name(source_path),
            source,
            constraint_name: file_name(&constraint_path),
            constraint,
        })
    }
}

async fn read_input(path: &Path) -> Result<Vec<u8>, JudgeError> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(JudgeError::MissingInput(path.to_path_buf()))
        }
        Err(e) => Err(JudgeError::Io(e)),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn log_provider_failure(provider: Provider, err: &ProviderError) {
    match err {
        ProviderError::Connect(e) => warn!("{} connection failed: {}", provider, e),
        ProviderError::Timeout => warn!("{} request timed out", provider),
        ProviderError::Request(e) => warn!("{} request failed: {}", provider, e),
        ProviderError::Status(code) => warn!("{} returned HTTP {}", provider, code),
        ProviderError::EmptyBody => warn!("{} returned an empty body", provider),
        ProviderError::InvalidBody(e) => warn!("{} returned an invalid body: {}", provider, e),
    }
}
