/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/installer.rs
*
* One-time install of the virtualization operator, driven as an explicit state
* machine. Each state performs one step against the cluster and names the
* state that follows; `run` walks the chain from `CheckPrereqs` to `Done`.
*
* Any error is fatal for the whole install. Nothing is rolled back: whatever
* was applied before the failure stays in the cluster for inspection.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::cluster::manifests::{self, capability_ref, subscription_ref};
use crate::cluster::status::{installed_revision, Conditions, InstallPhase};
use crate::cluster::{ResourceClient, ResourceKind, ResourceRef};
use crate::config::{OperatorSettings, PollBudgets};
use crate::error::{Error, Result, Timeout};
use crate::poller::{poll_until, Observation, PollSpec};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// States of the operator install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    CheckPrereqs,
    CheckExisting,
    ApplyOperator,
    AwaitInstallPlan,
    AwaitInstallSucceeded { revision: String },
    ApplyCapabilityPatch,
    AwaitCapabilityHealthy,
    ApplyEnvOverridePatch,
    Done,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallState::CheckPrereqs => f.write_str("CheckPrereqs"),
            InstallState::CheckExisting => f.write_str("CheckExisting"),
            InstallState::ApplyOperator => f.write_str("ApplyOperator"),
            InstallState::AwaitInstallPlan => f.write_str("AwaitInstallPlan"),
            InstallState::AwaitInstallSucceeded { .. } => f.write_str("AwaitInstallSucceeded"),
            InstallState::ApplyCapabilityPatch => f.write_str("ApplyCapabilityPatch"),
            InstallState::AwaitCapabilityHealthy => f.write_str("AwaitCapabilityHealthy"),
            InstallState::ApplyEnvOverridePatch => f.write_str("ApplyEnvOverridePatch"),
            InstallState::Done => f.write_str("Done"),
        }
    }
}

/// What a finished install did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub server_version: String,
    /// The capability was already healthy, so the operator bundle was not reapplied.
    pub reused_existing: bool,
    pub revision: Option<String>,
    pub feature_gate_added: bool,
    pub env_override_patched: bool,
    pub visited: Vec<String>,
}

pub struct OperatorInstaller {
    cluster: Arc<dyn ResourceClient>,
    settings: OperatorSettings,
    budgets: PollBudgets,
}

impl OperatorInstaller {
    pub fn new(
        cluster: Arc<dyn ResourceClient>,
        settings: OperatorSettings,
        budgets: PollBudgets,
    ) -> Self {
        Self {
            cluster,
            settings,
            budgets,
        }
    }

    /// Drives the install from `CheckPrereqs` to `Done`.
    pub async fn run(&self) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        let mut state = InstallState::CheckPrereqs;

        while state != InstallState::Done {
            info!(state = %state, "Operator install step");
            report.visited.push(state.to_string());
            state = self.step(state, &mut report).await?;
        }
        report.visited.push(InstallState::Done.to_string());

        info!(
            namespace = %self.settings.namespace,
            revision = ?report.revision,
            "Operator install complete"
        );
        Ok(report)
    }

    /// Executes one state and returns the next one.
    pub async fn step(&self, state: InstallState, report: &mut InstallReport) -> Result<InstallState> {
        match state {
            InstallState::CheckPrereqs => self.check_prereqs(report).await,
            InstallState::CheckExisting => self.check_existing(report).await,
            InstallState::ApplyOperator => self.apply_operator().await,
            InstallState::AwaitInstallPlan => self.await_install_plan(report).await,
            InstallState::AwaitInstallSucceeded { revision } => {
                self.await_install_succeeded(&revision).await
            }
            InstallState::ApplyCapabilityPatch => self.apply_capability_patch(report).await,
            InstallState::AwaitCapabilityHealthy => self.await_capability_healthy().await,
            InstallState::ApplyEnvOverridePatch => self.apply_env_override(report).await,
            InstallState::Done => Ok(InstallState::Done),
        }
    }

    async fn check_prereqs(&self, report: &mut InstallReport) -> Result<InstallState> {
        // 1. The API server must answer at all.
        report.server_version = self.cluster.server_version().await.map_err(|e| match e {
            Error::PrereqMissing(_) => e,
            other => Error::PrereqMissing(format!("cluster API is unreachable: {}", other)),
        })?;
        info!(version = %report.server_version, "Connected to cluster");

        // 2. A missing catalog only warrants a warning.
        let catalog = ResourceRef::namespaced(
            ResourceKind::CatalogSource,
            &self.settings.source_namespace,
            &self.settings.source,
        );
        match self.cluster.get(&catalog).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(catalog = %catalog, "Catalog source not found; the subscription may never resolve"),
            Err(e) => warn!(catalog = %catalog, error = %e, "Could not check catalog source"),
        }
        Ok(InstallState::CheckExisting)
    }

    async fn check_existing(&self, report: &mut InstallReport) -> Result<InstallState> {
        let target = capability_ref(&self.settings);
        let existing = self.cluster.get(&target).await?;
        match existing {
            Some(capability) if Conditions::from_resource(&capability).is_healthy() => {
                info!(capability = %target, "Capability already healthy; reapplying feature gate only");
                report.reused_existing = true;
                Ok(InstallState::ApplyCapabilityPatch)
            }
            _ => Ok(InstallState::ApplyOperator),
        }
    }

    async fn apply_operator(&self) -> Result<InstallState> {
        let bundle = manifests::operator_bundle(&self.settings)?;
        self.cluster.apply(&bundle).await?;
        info!(
            namespace = %self.settings.namespace,
            subscription = %self.settings.subscription,
            "Operator namespace, group and subscription applied"
        );
        Ok(InstallState::AwaitInstallPlan)
    }

    async fn await_install_plan(&self, report: &mut InstallReport) -> Result<InstallState> {
        let target = subscription_ref(&self.settings);
        let budget = self.budgets.install_plan;
        let spec = PollSpec::new(
            format!("installed revision on {}", target),
            budget.interval,
            budget.timeout,
        );

        let (cluster, target) = (&self.cluster, &target);
        let revision = poll_until(&spec, move || async move {
            let Some(subscription) = cluster.get(target).await? else {
                return Ok(Observation::Pending("subscription <absent>".to_string()));
            };
            Ok(match installed_revision(&subscription) {
                Some(revision) => Observation::Converged(revision),
                None => {
                    let state = subscription
                        .pointer("/status/state")
                        .and_then(|v| v.as_str())
                        .unwrap_or("<none>");
                    Observation::Pending(format!("installedCSV=<none> state={}", state))
                }
            })
        })
        .await
        .map_err(|e| retag(e, Error::InstallPlanTimeout))?;

        info!(revision = %revision, "Subscription resolved");
        report.revision = Some(revision.clone());
        Ok(InstallState::AwaitInstallSucceeded { revision })
    }

    async fn await_install_succeeded(&self, revision: &str) -> Result<InstallState> {
        let target = ResourceRef::namespaced(
            ResourceKind::ClusterServiceVersion,
            &self.settings.namespace,
            revision,
        );
        let budget = self.budgets.install_succeeded;
        let spec = PollSpec::new(
            format!("{} to reach Succeeded", target),
            budget.interval,
            budget.timeout,
        );

        let (cluster, target) = (&self.cluster, &target);
        poll_until(&spec, move || async move {
            let csv = cluster.get(target).await?;
            let phase = InstallPhase::from_resource(csv.as_ref());
            if phase == InstallPhase::Succeeded {
                return Ok(Observation::Converged(()));
            }
            if !phase.is_expected() {
                warn!(revision = %revision, phase = %phase, "Unexpected install phase");
            }
            Ok(Observation::Pending(format!("phase={}", phase)))
        })
        .await
        .map_err(|e| retag(e, Error::InstallTimeout))?;

        info!(revision = %revision, "Operator revision succeeded");
        Ok(InstallState::ApplyCapabilityPatch)
    }

    /// Ensures the capability exists, then appends the feature gate if it is missing.
    async fn apply_capability_patch(&self, report: &mut InstallReport) -> Result<InstallState> {
        let target = capability_ref(&self.settings);

        // 1. Create the capability, or leave an existing one as it is.
        self.cluster
            .apply(&[manifests::capability(&self.settings)?])
            .await?;

        // 2. Read it back and append the gate only when absent.
        let current = self.cluster.get(&target).await?.ok_or_else(|| Error::QueryFailed {
            resource: target.to_string(),
            detail: "not found right after apply".to_string(),
        })?;

        match manifests::feature_gate_patch(&current, &self.settings.feature_gate)? {
            Some(patch) => {
                self.cluster.patch(&target, &patch).await?;
                report.feature_gate_added = true;
                info!(gate = %self.settings.feature_gate, "Feature gate enabled");
            }
            None => info!(gate = %self.settings.feature_gate, "Feature gate already enabled"),
        }
        Ok(InstallState::AwaitCapabilityHealthy)
    }

    async fn await_capability_healthy(&self) -> Result<InstallState> {
        let target = capability_ref(&self.settings);
        let budget = self.budgets.capability_healthy;
        let spec = PollSpec::new(
            format!("{} to become healthy", target),
            budget.interval,
            budget.timeout,
        );

        let (cluster, probe_target) = (&self.cluster, &target);
        poll_until(&spec, move || async move {
            let Some(capability) = cluster.get(probe_target).await? else {
                return Ok(Observation::Pending("<absent>".to_string()));
            };
            let conditions = Conditions::from_resource(&capability);
            Ok(if conditions.is_healthy() {
                Observation::Converged(())
            } else {
                Observation::Pending(conditions.to_string())
            })
        })
        .await
        .map_err(|e| retag(e, Error::CapabilityUnhealthy))?;

        info!(capability = %target, "Capability healthy");
        Ok(InstallState::ApplyEnvOverridePatch)
    }

    async fn apply_env_override(&self, report: &mut InstallReport) -> Result<InstallState> {
        let target = subscription_ref(&self.settings);
        let (name, value) = &self.settings.env_override;
        let subscription = self.cluster.get(&target).await?.ok_or_else(|| Error::QueryFailed {
            resource: target.to_string(),
            detail: "not found".to_string(),
        })?;

        match manifests::subscription_env_patch(&subscription, name, value)? {
            Some(patch) => {
                self.cluster.patch(&target, &patch).await?;
                report.env_override_patched = true;
                info!(env = %name, value = %value, "Subscription environment override set");
            }
            None => info!(env = %name, "Subscription environment override already set"),
        }
        Ok(InstallState::Done)
    }
}

/// Re-labels a poll timeout as the step-specific error; other errors pass through.
fn retag(error: Error, as_step: fn(Timeout) -> Error) -> Error {
    match error {
        Error::ConvergenceTimeout(t) => as_step(t),
        other => other,
    }
}
