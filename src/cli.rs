/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/cli.rs
*
* Command-line interface of `virt_fleet`, declared with clap's derive API.
* Every setting can also come from the environment; the parsed arguments are
* resolved once into an immutable `FleetConfig`.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::config::{
    AgentSettings, FleetConfig, OperatorSettings, SshSettings, VmSettings, DEFAULT_AGENT_SERVICE,
    DEFAULT_CAPABILITY_NAME, DEFAULT_OPERATOR_NAMESPACE, DEFAULT_VM_IMAGE, DEFAULT_VM_NAMESPACE,
    DEFAULT_VM_PASSWORD, DEFAULT_VM_PREFIX, DEFAULT_VM_USER,
};
use crate::error::{Error, Result};
use crate::telemetry::LogFormat;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Installs the virtualization operator, provisions a VM fleet and deploys a
/// monitoring agent into every VM.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the virtualization operator and wait until it is healthy.
    InstallOperator,

    /// Create or start every VM of the fleet.
    Provision,

    /// Install the agent on every VM of the fleet, concurrently.
    InstallAgents,

    /// Install the agent on one VM; exits non-zero if it fails.
    InstallAgent(InstallAgentArgs),

    /// Operator install, provisioning and agent install in one go.
    Up,

    /// Show VM, instance and agent state for every VM of the fleet.
    Status,

    /// Print the agent's journal from one VM.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
pub struct InstallAgentArgs {
    /// Name of the VM to install on.
    pub vm: String,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Name of the VM to read from.
    pub vm: String,

    /// Keep streaming new lines until interrupted.
    #[arg(long, short)]
    pub follow: bool,

    /// Number of past lines to show.
    #[arg(long, short = 'n', default_value_t = 100)]
    pub lines: u32,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to the kubeconfig file; the default discovery rules apply when unset.
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Exit non-zero when any VM fails agent installation.
    #[arg(long, global = true)]
    pub strict: bool,

    #[command(flatten)]
    pub vm: VmArgs,

    #[command(flatten)]
    pub ssh: SshArgs,

    #[command(flatten)]
    pub operator: OperatorArgs,

    #[command(flatten)]
    pub agent: AgentArgs,
}

#[derive(Args, Debug)]
pub struct VmArgs {
    #[arg(long, env = "VM_NAMESPACE", default_value = DEFAULT_VM_NAMESPACE, global = true)]
    pub vm_namespace: String,

    /// VMs are named `<prefix>-1` through `<prefix>-<count>`.
    #[arg(long, env = "VM_PREFIX", default_value = DEFAULT_VM_PREFIX, global = true)]
    pub vm_prefix: String,

    #[arg(long, env = "VM_COUNT", default_value_t = 3, global = true)]
    pub vm_count: u32,

    #[arg(long, env = "VM_USER", default_value = DEFAULT_VM_USER, global = true)]
    pub vm_user: String,

    #[arg(long, env = "VM_PASSWORD", default_value = DEFAULT_VM_PASSWORD, global = true, hide_env_values = true)]
    pub vm_password: String,

    /// Container disk image the VMs boot from.
    #[arg(long, env = "VM_IMAGE", default_value = DEFAULT_VM_IMAGE, global = true)]
    pub vm_image: String,

    #[arg(long, env = "VM_CPU_CORES", default_value_t = 1, global = true)]
    pub vm_cpu_cores: u32,

    #[arg(long, env = "VM_MEMORY", default_value = "2Gi", global = true)]
    pub vm_memory: String,
}

#[derive(Args, Debug)]
pub struct SshArgs {
    /// Public keys to authorize, as `.pub` file paths or literal key lines.
    /// Defaults to `~/.ssh/id_ed25519.pub` and `~/.ssh/id_rsa.pub` when present.
    #[arg(long = "ssh-public-key", env = "SSH_PUBLIC_KEYS", value_delimiter = ',', global = true)]
    pub ssh_public_keys: Vec<String>,

    /// Private key used by the transport.
    #[arg(long, env = "SSH_IDENTITY_FILE", global = true)]
    pub ssh_identity_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct OperatorArgs {
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE, global = true)]
    pub operator_namespace: String,

    #[arg(long, env = "OPERATOR_CHANNEL", default_value = "stable", global = true)]
    pub operator_channel: String,

    /// Catalog source providing the operator package.
    #[arg(long, env = "OPERATOR_SOURCE", default_value = "community-operators", global = true)]
    pub operator_source: String,

    /// Feature gate appended to the capability's configuration.
    #[arg(long, env = "CAPABILITY_FEATURE_GATE", default_value = "Sidecar", global = true)]
    pub feature_gate: String,

    #[arg(long, default_value = DEFAULT_CAPABILITY_NAME, global = true)]
    pub capability_name: String,
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Go module containing the agent.
    #[arg(long, env = "AGENT_SOURCE_DIR", default_value = "./agent", global = true)]
    pub agent_source_dir: PathBuf,

    #[arg(long, env = "AGENT_TARGET_ARCH", default_value = "amd64", global = true)]
    pub agent_target_arch: String,

    #[arg(long, env = "AGENT_SERVICE_NAME", default_value = DEFAULT_AGENT_SERVICE, global = true)]
    pub agent_service_name: String,

    /// Unit file to install instead of the generated one.
    #[arg(long, global = true)]
    pub agent_service_file: Option<PathBuf>,
}

impl GlobalArgs {
    /// Resolves the arguments into a validated configuration.
    pub fn into_config(self) -> Result<FleetConfig> {
        let keys = if self.ssh.ssh_public_keys.is_empty() {
            default_public_keys()?
        } else {
            self.ssh
                .ssh_public_keys
                .iter()
                .map(|k| read_public_key(k))
                .collect::<Result<Vec<_>>>()?
        };

        let config = FleetConfig {
            kubeconfig: self.kubeconfig,
            operator: OperatorSettings {
                namespace: self.operator.operator_namespace,
                channel: self.operator.operator_channel,
                source: self.operator.operator_source,
                capability_name: self.operator.capability_name,
                feature_gate: self.operator.feature_gate,
                ..OperatorSettings::default()
            },
            vms: VmSettings {
                namespace: self.vm.vm_namespace,
                prefix: self.vm.vm_prefix,
                count: self.vm.vm_count,
                user: self.vm.vm_user,
                password: self.vm.vm_password,
                image: self.vm.vm_image,
                cpu_cores: self.vm.vm_cpu_cores,
                memory: self.vm.vm_memory,
                ssh_public_keys: keys,
            },
            ssh: SshSettings {
                identity_file: self.ssh.ssh_identity_file,
                ..SshSettings::default()
            },
            agent: AgentSettings {
                source_dir: self.agent.agent_source_dir,
                target_arch: self.agent.agent_target_arch,
                binary_name: self.agent.agent_service_name.clone(),
                service_name: self.agent.agent_service_name,
                service_file: self.agent.agent_service_file,
                ..AgentSettings::default()
            },
            strict: self.strict,
            ..FleetConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn read_public_key(value: &str) -> Result<String> {
    let value = value.trim();
    if value.starts_with("ssh-") || value.starts_with("ecdsa-") {
        return Ok(value.to_string());
    }
    let path = expand_home(value);
    std::fs::read_to_string(&path)
        .map(|k| k.trim().to_string())
        .map_err(|e| Error::Config(format!("cannot read SSH public key '{}': {}", path.display(), e)))
}

fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(value),
    }
}

fn default_public_keys() -> Result<Vec<String>> {
    let Some(home) = std::env::var_os("HOME") else {
        return Ok(Vec::new());
    };
    let ssh_dir = Path::new(&home).join(".ssh");
    ["id_ed25519.pub", "id_rsa.pub"]
        .iter()
        .map(|f| ssh_dir.join(f))
        .filter(|p| p.is_file())
        .map(|p| read_public_key(&p.to_string_lossy()))
        .collect()
}
