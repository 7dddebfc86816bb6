//! Waveform capture
//!
//! After a run, a signal trace left in the working directory is copied to
//! the durable artifact directory and referenced from the case feedback.
//! Capture is best effort: nothing here can demote a verdict.

use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::core::{Adjustment, Submission};
use crate::error::JudgeError;

/// Trace file the testbench is expected to dump
pub const WAVEFORM_FILE: &str = "wave.vcd";
const WAVEFORM_EXTENSION: &str = "vcd";
/// Smaller traces are treated as empty or truncated captures
pub const MIN_WAVEFORM_BYTES: u64 = 100;

pub struct WaveformCapture {
    artifact_dir: PathBuf,
}

impl WaveformCapture {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
        }
    }

    /// Where the trace of `submission` is stored
    pub fn destination(&self, submission: &Submission) -> PathBuf {
        self.artifact_dir
            .join(format!("{}.{}", submission.artifact_stem(), WAVEFORM_EXTENSION))
    }

    /// Copy the trace out of `work_dir`, returning the feedback segment that
    /// references it
    pub async fn capture(&self, submission: &Submission, work_dir: &Path) -> Option<Adjustment> {
        if !submission.meta.waveform_enabled() {
            return None;
        }

        let trace = work_dir.join(WAVEFORM_FILE);
        let size = match tokio::fs::metadata(&trace).await {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                debug!("No {} in {:?}", WAVEFORM_FILE, work_dir);
                return None;
            }
        };
        info!("VCD file size: {} bytes", size);

        if size < MIN_WAVEFORM_BYTES {
            warn!("VCD file is too small ({} bytes), skipping", size);
            return None;
        }

        match self.store(submission, &trace).await {
            Ok(dest) => {
                info!("Saved VCD to {}", dest.display());
                Some(Adjustment::Annotate(format!(
                    "[WAVEFORM]VCD:{}",
                    dest.display()
                )))
            }
            Err(e) => {
                error!("Failed to copy VCD file: {}", e);
                None
            }
        }
    }

    async fn store(&self, submission: &Submission, trace: &Path) -> Result<PathBuf, JudgeError> {
        // Concurrent first use from several workers is fine
        tokio::fs::create_dir_all(&self.artifact_dir)
            .await
            .map_err(|e| {
                JudgeError::Artifact(format!("cannot create {:?}: {}", self.artifact_dir, e))
            })?;

        let dest = self.destination(submission);
        tokio::fs::copy(trace, &dest)
            .await
            .map_err(|e| JudgeError::Artifact(format!("cannot copy to {:?}: {}", dest, e)))?;
        Ok(dest)
    }
}
