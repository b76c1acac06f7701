/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/config.rs
*
* The immutable configuration value constructed once at process start from the
* command line and environment, then shared (behind an `Arc`) by every
* component. Nothing in the tool mutates configuration after `validate`.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VM_NAMESPACE: &str = "default";
pub const DEFAULT_VM_PREFIX: &str = "fleet-vm";
pub const DEFAULT_VM_USER: &str = "fedora";
pub const DEFAULT_VM_PASSWORD: &str = "fedora";
pub const DEFAULT_VM_IMAGE: &str = "quay.io/containerdisks/fedora:latest";
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "openshift-cnv";
pub const DEFAULT_CAPABILITY_NAME: &str = "kubevirt-hyperconverged";
pub const DEFAULT_AGENT_SERVICE: &str = "fleet-agent";

/// Settings for the one-time operator install.
#[derive(Debug, Clone)]
pub struct OperatorSettings {
    pub namespace: String,
    pub operator_group: String,
    pub subscription: String,
    pub package: String,
    pub channel: String,
    pub source: String,
    pub source_namespace: String,
    pub capability_name: String,
    pub feature_gate: String,
    /// Environment variable forced on the operator subscription.
    pub env_override: (String, String),
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            operator_group: "kubevirt-hyperconverged-group".to_string(),
            subscription: "hco-operatorhub".to_string(),
            package: "community-kubevirt-hyperconverged".to_string(),
            channel: "stable".to_string(),
            source: "community-operators".to_string(),
            source_namespace: "openshift-marketplace".to_string(),
            capability_name: DEFAULT_CAPABILITY_NAME.to_string(),
            feature_gate: "Sidecar".to_string(),
            env_override: ("KVM_EMULATION".to_string(), "true".to_string()),
        }
    }
}

/// Desired shape of every VM in the fleet.
#[derive(Debug, Clone)]
pub struct VmSettings {
    pub namespace: String,
    pub prefix: String,
    pub count: u32,
    pub user: String,
    pub password: String,
    pub image: String,
    pub cpu_cores: u32,
    pub memory: String,
    /// Contents of the public keys injected through cloud-init.
    pub ssh_public_keys: Vec<String>,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_VM_NAMESPACE.to_string(),
            prefix: DEFAULT_VM_PREFIX.to_string(),
            count: 3,
            user: DEFAULT_VM_USER.to_string(),
            password: DEFAULT_VM_PASSWORD.to_string(),
            image: DEFAULT_VM_IMAGE.to_string(),
            cpu_cores: 1,
            memory: "2Gi".to_string(),
            ssh_public_keys: Vec::new(),
        }
    }
}

/// Options passed to the SSH-over-virtctl transport.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Where the agent comes from and how it is installed on a VM.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub source_dir: PathBuf,
    pub target_os: String,
    pub target_arch: String,
    pub binary_name: String,
    pub service_name: String,
    /// Unit file to ship instead of the rendered default.
    pub service_file: Option<PathBuf>,
    pub remote_staging_dir: String,
    pub install_dir: String,
    /// Wait between `enable --now` and the final status query.
    pub settle_delay: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./agent"),
            target_os: "linux".to_string(),
            target_arch: "amd64".to_string(),
            binary_name: DEFAULT_AGENT_SERVICE.to_string(),
            service_name: DEFAULT_AGENT_SERVICE.to_string(),
            service_file: None,
            remote_staging_dir: "/tmp".to_string(),
            install_dir: "/usr/local/bin".to_string(),
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// Interval and budget of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Budget {
    pub const fn secs(interval: u64, timeout: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
        }
    }
}

/// Poll budgets for every wait in the workflow.
#[derive(Debug, Clone)]
pub struct PollBudgets {
    pub install_plan: Budget,
    pub install_succeeded: Budget,
    pub capability_healthy: Budget,
    pub vm_running: Budget,
    pub vmi_ready: Budget,
    pub ssh_ready: Budget,
    pub ssh_max_attempts: u32,
}

impl Default for PollBudgets {
    fn default() -> Self {
        Self {
            install_plan: Budget::secs(5, 300),
            install_succeeded: Budget::secs(5, 900),
            capability_healthy: Budget::secs(10, 1800),
            vm_running: Budget::secs(10, 600),
            vmi_ready: Budget::secs(5, 300),
            ssh_ready: Budget::secs(10, 300),
            ssh_max_attempts: 30,
        }
    }
}

/// The whole configuration of one run.
#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub kubeconfig: Option<PathBuf>,
    pub operator: OperatorSettings,
    pub vms: VmSettings,
    pub ssh: SshSettings,
    pub agent: AgentSettings,
    pub budgets: PollBudgets,
    /// Propagate per-VM agent failures to the exit code.
    pub strict: bool,
}

impl FleetConfig {
    /// Rejects configurations that would only fail later against the cluster.
    pub fn validate(&self) -> Result<()> {
        if self.vms.count == 0 {
            return Err(Error::Config("VM count must be at least 1".to_string()));
        }
        if !is_dns_label(&self.vms.prefix) {
            return Err(Error::Config(format!(
                "VM prefix '{}' is not a valid DNS-1123 label",
                self.vms.prefix
            )));
        }
        // The longest generated name must still be a valid label.
        let longest = format!("{}-{}", self.vms.prefix, self.vms.count);
        if longest.len() > 63 {
            return Err(Error::Config(format!(
                "Generated VM name '{}' exceeds 63 characters",
                longest
            )));
        }
        if self.vms.ssh_public_keys.iter().all(|k| k.trim().is_empty()) {
            return Err(Error::Config(
                "At least one SSH public key is required".to_string(),
            ));
        }
        if self.vms.user.is_empty() {
            return Err(Error::Config("VM user must not be empty".to_string()));
        }
        Ok(())
    }
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}
