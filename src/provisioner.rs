/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/provisioner.rs
*
* Creates or starts the fleet's VirtualMachines. Each VM is reconciled on its
* own: a failure is recorded against that VM and the loop moves on, so the
* summary always covers every name in the fleet.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::cluster::manifests::{self, run_strategy_patch, vm_ref, vmi_ref, RunStrategy};
use crate::cluster::status::{VmStatus, VmiPhase};
use crate::cluster::ResourceClient;
use crate::config::FleetConfig;
use crate::error::{Error, Result};
use crate::poller::{poll_until, Observation, PollSpec};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// `prefix-1` through `prefix-count`.
pub fn vm_names(prefix: &str, count: u32) -> Vec<String> {
    (1..=count).map(|i| format!("{}-{}", prefix, i)).collect()
}

/// What provisioning did to one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmAction {
    Created,
    Started,
    AlreadyRunning,
    /// Exists in some other state; later polling decides.
    InProgress(String),
    Failed(String),
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmAction::Created => f.write_str("created"),
            VmAction::Started => f.write_str("started (was stopped)"),
            VmAction::AlreadyRunning => f.write_str("already running"),
            VmAction::InProgress(status) => write!(f, "exists ({})", status),
            VmAction::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub name: String,
    pub index: u32,
    pub action: VmAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub created: usize,
    pub already_existed: usize,
    pub failed: usize,
    pub records: Vec<VmRecord>,
}

impl ProvisionSummary {
    fn record(&mut self, record: VmRecord) {
        match record.action {
            VmAction::Created | VmAction::Started => self.created += 1,
            VmAction::AlreadyRunning | VmAction::InProgress(_) => self.already_existed += 1,
            VmAction::Failed(_) => self.failed += 1,
        }
        self.records.push(record);
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }
}

/// Observed state of one fleet member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmObservation {
    pub name: String,
    pub vm: VmStatus,
    pub vmi: VmiPhase,
}

pub struct FleetProvisioner {
    cluster: Arc<dyn ResourceClient>,
    config: Arc<FleetConfig>,
}

impl FleetProvisioner {
    pub fn new(cluster: Arc<dyn ResourceClient>, config: Arc<FleetConfig>) -> Self {
        Self { cluster, config }
    }

    pub fn names(&self) -> Vec<String> {
        vm_names(&self.config.vms.prefix, self.config.vms.count)
    }

    /// Reconciles every VM of the fleet. Never fails as a whole; inspect the summary.
    pub async fn provision(&self) -> ProvisionSummary {
        let mut summary = ProvisionSummary::default();
        info!(
            namespace = %self.config.vms.namespace,
            count = self.config.vms.count,
            prefix = %self.config.vms.prefix,
            "Provisioning VM fleet"
        );

        for (i, name) in self.names().into_iter().enumerate() {
            let action = match self.reconcile(&name).await {
                Ok(action) => action,
                Err(e) => {
                    error!(vm = %name, error = %e, "VM provisioning failed");
                    VmAction::Failed(e.to_string())
                }
            };
            info!(vm = %name, action = %action, "VM reconciled");
            summary.record(VmRecord {
                name,
                index: i as u32 + 1,
                action,
            });
        }
        summary
    }

    async fn reconcile(&self, name: &str) -> Result<VmAction> {
        let target = vm_ref(&self.config.vms, name);
        let existing = self.cluster.get(&target).await?;

        // Create when absent, start when stopped, otherwise leave it alone.
        match VmStatus::from_resource(existing.as_ref()) {
            VmStatus::Absent => {
                let manifest = manifests::virtual_machine(&self.config.vms, name)?;
                self.cluster.apply(&[manifest]).await?;
                Ok(VmAction::Created)
            }
            VmStatus::Running => Ok(VmAction::AlreadyRunning),
            VmStatus::Stopped => {
                self.cluster
                    .patch(&target, &run_strategy_patch(RunStrategy::Always)?)
                    .await?;
                Ok(VmAction::Started)
            }
            other => Ok(VmAction::InProgress(other.to_string())),
        }
    }

    /// Waits for the VM to report `Running`. A VM that does not exist is a hard failure.
    pub async fn await_running(&self, name: &str) -> Result<()> {
        let target = vm_ref(&self.config.vms, name);
        let budget = self.config.budgets.vm_running;
        let spec = PollSpec::new(format!("{} to be Running", target), budget.interval, budget.timeout)
            .abort_on_query_error();

        let (cluster, target) = (&self.cluster, &target);
        poll_until(&spec, move || async move {
            let vm = cluster.get(target).await?.ok_or_else(|| Error::QueryFailed {
                resource: target.to_string(),
                detail: "VirtualMachine does not exist".to_string(),
            })?;
            Ok(match VmStatus::from_resource(Some(&vm)) {
                VmStatus::Running => Observation::Converged(()),
                other => Observation::Pending(format!("printableStatus={}", other)),
            })
        })
        .await
    }

    /// Current VM and instance state of every fleet member.
    pub async fn observe(&self) -> Result<Vec<VmObservation>> {
        let mut observations = Vec::new();
        for name in self.names() {
            let vm = self.cluster.get(&vm_ref(&self.config.vms, &name)).await?;
            let vmi = self.cluster.get(&vmi_ref(&self.config.vms, &name)).await?;
            observations.push(VmObservation {
                vm: VmStatus::from_resource(vm.as_ref()),
                vmi: VmiPhase::from_resource(vmi.as_ref()),
                name,
            });
        }
        Ok(observations)
    }
}
