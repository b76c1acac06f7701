/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/orchestrator.rs
*
* Fans the per-VM agent install out over the whole fleet. Every VM gets its own
* task; all tasks are joined regardless of individual outcomes, and the only
* shared state is the result list assembled after the join.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::agent::AgentInstaller;
use crate::error::Result;
use crate::provisioner::FleetProvisioner;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Carries the service's `Active:` line.
    Success(String),
    Failed(String),
}

/// State of one VM's install job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInstallJob {
    pub vm_name: String,
    pub index: u32,
    pub outcome: JobOutcome,
}

impl AgentInstallJob {
    pub fn new(vm_name: &str, index: u32, outcome: JobOutcome) -> Self {
        Self {
            vm_name: vm_name.to_string(),
            index,
            outcome,
        }
    }
}

/// Aggregate result of one fleet-wide install.
#[derive(Debug, Clone)]
pub struct FleetReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub failed_names: Vec<String>,
    pub jobs: Vec<AgentInstallJob>,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

impl FleetReport {
    fn from_jobs(jobs: Vec<AgentInstallJob>, elapsed: Duration) -> Self {
        let failed_names: Vec<String> = jobs
            .iter()
            .filter(|j| !matches!(j.outcome, JobOutcome::Success(_)))
            .map(|j| j.vm_name.clone())
            .collect();
        Self {
            total: jobs.len(),
            success: jobs.len() - failed_names.len(),
            failed: failed_names.len(),
            failed_names,
            jobs,
            elapsed,
            finished_at: Utc::now(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Runs `job` for every VM concurrently and joins on all of them.
///
/// A job that returns `Err` or panics is marked failed; it never affects its
/// siblings.
pub async fn run_jobs<F, Fut>(vm_names: &[String], job: F) -> FleetReport
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    let started = Instant::now();
    info!(count = vm_names.len(), "Launching agent install jobs");

    let handles: Vec<_> = vm_names
        .iter()
        .map(|name| {
            let span = info_span!("agent_job", vm = %name);
            tokio::spawn(job(name.clone()).instrument(span))
        })
        .collect();

    let results = join_all(handles).await;

    let jobs = vm_names
        .iter()
        .zip(results)
        .enumerate()
        .map(|(i, (name, result))| {
            let outcome = match result {
                Ok(Ok(status)) => {
                    info!(vm = %name, "Agent install succeeded");
                    JobOutcome::Success(status)
                }
                Ok(Err(e)) => {
                    error!(vm = %name, error = %e, "Agent install failed");
                    JobOutcome::Failed(e.to_string())
                }
                Err(e) => {
                    error!(vm = %name, error = %e, "Agent install task aborted");
                    JobOutcome::Failed(format!("install task aborted: {}", e))
                }
            };
            AgentInstallJob::new(name, i as u32 + 1, outcome)
        })
        .collect();

    FleetReport::from_jobs(jobs, started.elapsed())
}

/// Waits for one VM to run, then installs the agent on it.
pub async fn install_agent(
    provisioner: &FleetProvisioner,
    installer: &AgentInstaller,
    vm_name: &str,
) -> Result<String> {
    provisioner.await_running(vm_name).await?;
    installer.install(vm_name).await
}

/// Runs `install_agent` for every VM of the fleet.
pub async fn install_agents(
    provisioner: Arc<FleetProvisioner>,
    installer: Arc<AgentInstaller>,
    vm_names: &[String],
) -> FleetReport {
    run_jobs(vm_names, |name| {
        let provisioner = provisioner.clone();
        let installer = installer.clone();
        async move { install_agent(&provisioner, &installer, &name).await }
    })
    .await
}
