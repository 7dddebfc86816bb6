mod checker;
mod compiler;
mod config;
mod core;
mod error;
mod judger;
mod runner;
mod sandbox;
mod synthesis;
mod waveform;

use anyhow::{Context, Result};
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::JudgeConfig;
use crate::judger::{JudgeJob, Judger};
use crate::sandbox::IsolateSandbox;
use crate::synthesis::HttpSynthesisClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the result document
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hdl_judge=info".parse()?),
        )
        .init();

    let config = Arc::new(JudgeConfig::load()?);
    info!(
        "Starting HDL judge: worker_id={}, artifact_dir={:?}",
        config.worker_id, config.artifact_dir
    );

    let sandbox = IsolateSandbox::new(config.worker_id);
    sandbox.ensure_cgroups_available().await?;
    info!("Confirmed isolate cgroup support is available");

    let synthesis_client = HttpSynthesisClient::new(config.synthesis.timeout())?;
    let judger = Judger::new(config, Arc::new(sandbox), Arc::new(synthesis_client));

    let job = read_job(std::env::args().nth(1).as_deref())?;
    info!(
        "Received judge job: submission_id={:?}, problem={}, cases={}",
        job.submission_id,
        job.problem_id,
        job.cases.len()
    );

    let result = match judger.judge(&job).await {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to judge submission {:?}: {:#}", job.submission_id, e);
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Read the job from a file, or from stdin when no path (or `-`) is given
fn read_job(path: Option<&str>) -> Result<JudgeJob> {
    let content = match path {
        Some(path) if path != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read job from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("Invalid judge job")
}
