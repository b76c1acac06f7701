/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/agent.rs
*
* Installs the monitoring agent on one running VM as a systemd service:
* readiness gates, pre-clean, local build, copy, composite install, then a
* status check after a short settle delay. Every step is attempted once and
* any failure ends the job for this VM only.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::cluster::manifests::{vm_ref, vmi_ref};
use crate::cluster::status::{vmi_ready, VmiPhase};
use crate::cluster::ResourceClient;
use crate::config::{AgentSettings, FleetConfig};
use crate::error::{Error, Result};
use crate::poller::{poll_until, Observation, PollSpec};
use crate::toolchain::{BuildRequest, Toolchain};
use crate::transport::{exec_checked, VmTarget, VmTransport};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const RUNNING_MARKER: &str = "active (running)";

/// Systemd unit shipped with the agent when no unit file is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub exec_start: String,
    pub restart_sec: u32,
}

impl ServiceUnit {
    pub fn for_agent(settings: &AgentSettings) -> Self {
        Self {
            description: format!("{} monitoring agent", settings.service_name),
            exec_start: format!("{}/{}", settings.install_dir, settings.binary_name),
            restart_sec: 5,
        }
    }
}

impl fmt::Display for ServiceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Unit]")?;
        writeln!(f, "Description={}", self.description)?;
        writeln!(f, "After=network-online.target")?;
        writeln!(f, "Wants=network-online.target")?;
        writeln!(f)?;
        writeln!(f, "[Service]")?;
        writeln!(f, "Type=simple")?;
        writeln!(f, "ExecStart={}", self.exec_start)?;
        writeln!(f, "Restart=always")?;
        writeln!(f, "RestartSec={}", self.restart_sec)?;
        writeln!(f)?;
        writeln!(f, "[Install]")?;
        writeln!(f, "WantedBy=multi-user.target")
    }
}

/// Remote command lines for one agent service.
#[derive(Debug, Clone)]
pub struct ServiceCommands {
    unit: String,
    staged_binary: String,
    staged_unit: String,
    installed_binary: String,
    installed_unit: String,
}

impl ServiceCommands {
    pub fn new(settings: &AgentSettings) -> Self {
        let unit = format!("{}.service", settings.service_name);
        Self {
            staged_binary: format!("{}/{}", settings.remote_staging_dir, settings.binary_name),
            staged_unit: format!("{}/{}", settings.remote_staging_dir, unit),
            installed_binary: format!("{}/{}", settings.install_dir, settings.binary_name),
            installed_unit: format!("/etc/systemd/system/{}", unit),
            unit,
        }
    }

    pub fn is_active(&self) -> String {
        format!("sudo systemctl is-active {}", self.unit)
    }

    pub fn stop(&self) -> String {
        format!("sudo systemctl stop {}", self.unit)
    }

    pub fn status(&self) -> String {
        format!("sudo systemctl status {} --no-pager", self.unit)
    }

    pub fn journal(&self, lines: u32, follow: bool) -> String {
        let mut command = format!("sudo journalctl -u {} --no-pager -n {}", self.unit, lines);
        if follow {
            command.push_str(" -f");
        }
        command
    }

    /// Move, relabel, reload, enable and start as one `&&` chain.
    pub fn install(&self) -> String {
        [
            format!("sudo mv {} {}", self.staged_unit, self.installed_unit),
            format!("sudo mv {} {}", self.staged_binary, self.installed_binary),
            format!("sudo chmod 0755 {}", self.installed_binary),
            format!(
                "(command -v restorecon >/dev/null 2>&1 && sudo restorecon {} {} || true)",
                self.installed_binary, self.installed_unit
            ),
            "sudo systemctl daemon-reload".to_string(),
            format!("sudo systemctl enable --now {}", self.unit),
        ]
        .join(" && ")
    }
}

/// The `Active:` line of `systemctl status`, or the whole text if there is none.
pub fn active_line(status_text: &str) -> String {
    status_text
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("Active:"))
        .unwrap_or_else(|| status_text.trim())
        .to_string()
}

pub struct AgentInstaller {
    cluster: Arc<dyn ResourceClient>,
    transport: Arc<dyn VmTransport>,
    toolchain: Arc<dyn Toolchain>,
    config: Arc<FleetConfig>,
    work_dir: PathBuf,
    commands: ServiceCommands,
}

impl AgentInstaller {
    pub fn new(
        cluster: Arc<dyn ResourceClient>,
        transport: Arc<dyn VmTransport>,
        toolchain: Arc<dyn Toolchain>,
        config: Arc<FleetConfig>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let commands = ServiceCommands::new(&config.agent);
        Self {
            cluster,
            transport,
            toolchain,
            config,
            work_dir: work_dir.into(),
            commands,
        }
    }

    pub fn target(&self, vm: &str) -> VmTarget {
        VmTarget::new(&self.config.vms.namespace, vm, &self.config.vms.user)
    }

    /// Installs and starts the agent on `vm`; returns the service's `Active:` line.
    pub async fn install(&self, vm: &str) -> Result<String> {
        let target = self.target(vm);

        // 1. Wait until the instance is Ready and answers over SSH.
        self.await_instance_ready(vm).await?;
        self.await_ssh(&target).await?;

        // 2. Stop any previous copy so the binary can be replaced.
        self.pre_clean(&target).await;

        // 3. Build locally and stage binary and unit in the VM.
        let binary = self.build(vm).await?;
        let unit = self.unit_file(vm).await?;
        self.copy_artifacts(&target, &binary, &unit).await?;

        // 4. Install, reload and start in a single remote call.
        exec_checked(self.transport.as_ref(), &target, &self.commands.install()).await?;
        info!(vm = %vm, "Agent service enabled");

        // 5. Give systemd a moment, then check the unit really runs.
        tokio::time::sleep(self.config.agent.settle_delay).await;
        self.verify(&target).await
    }

    async fn await_instance_ready(&self, vm: &str) -> Result<()> {
        let vm_target = vm_ref(&self.config.vms, vm);
        if self.cluster.get(&vm_target).await?.is_none() {
            return Err(Error::QueryFailed {
                resource: vm_target.to_string(),
                detail: "VirtualMachine does not exist".to_string(),
            });
        }

        let target = vmi_ref(&self.config.vms, vm);
        let budget = self.config.budgets.vmi_ready;
        let spec = PollSpec::new(format!("{} to be Ready", target), budget.interval, budget.timeout);
        let (cluster, target) = (&self.cluster, &target);
        poll_until(&spec, move || async move {
            let vmi = cluster.get(target).await?;
            Ok(match vmi {
                Some(vmi) if vmi_ready(&vmi) => Observation::Converged(()),
                other => Observation::Pending(format!(
                    "phase={} ready=false",
                    VmiPhase::from_resource(other.as_ref())
                )),
            })
        })
        .await
    }

    /// Round-trips a known token over the transport until it comes back intact.
    async fn await_ssh(&self, target: &VmTarget) -> Result<()> {
        let token = format!("virt-fleet-ready-{}", target.name);
        let command = format!("echo {}", token);
        let budget = self.config.budgets.ssh_ready;
        let spec = PollSpec::new(format!("SSH on {}", target.name), budget.interval, budget.timeout)
            .max_attempts(self.config.budgets.ssh_max_attempts);

        let (transport, token, command) = (&self.transport, &token, &command);
        poll_until(&spec, move || async move {
            let output = transport.exec(target, command).await?;
            Ok(if output.success() && output.stdout.trim() == token.as_str() {
                Observation::Converged(())
            } else {
                Observation::Pending(format!(
                    "exit={} {}",
                    output.status,
                    output.stderr.trim()
                ))
            })
        })
        .await?;

        info!(vm = %target.name, "SSH ready");
        Ok(())
    }

    /// Stops a running copy of the service. Failures are logged and ignored.
    async fn pre_clean(&self, target: &VmTarget) {
        let active = match self.transport.exec(target, &self.commands.is_active()).await {
            Ok(output) => output.stdout.trim() == "active",
            Err(e) => {
                debug!(vm = %target.name, error = %e, "Service state query failed, assuming not installed");
                false
            }
        };
        if !active {
            return;
        }

        info!(vm = %target.name, "Stopping existing agent service");
        if let Err(e) = exec_checked(self.transport.as_ref(), target, &self.commands.stop()).await {
            warn!(vm = %target.name, error = %e, "Could not stop existing agent service");
        }
    }

    fn vm_work_dir(&self, vm: &str) -> PathBuf {
        self.work_dir.join(vm)
    }

    async fn build(&self, vm: &str) -> Result<PathBuf> {
        let agent = &self.config.agent;
        let request = BuildRequest {
            source_dir: agent.source_dir.clone(),
            target_os: agent.target_os.clone(),
            target_arch: agent.target_arch.clone(),
            output: self.vm_work_dir(vm).join(&agent.binary_name),
        };
        self.toolchain.build(&request).await?;
        Ok(request.output)
    }

    async fn unit_file(&self, vm: &str) -> Result<PathBuf> {
        if let Some(path) = &self.config.agent.service_file {
            return Ok(path.clone());
        }
        let dir = self.vm_work_dir(vm);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.service", self.config.agent.service_name));
        let unit = ServiceUnit::for_agent(&self.config.agent);
        tokio::fs::write(&path, unit.to_string()).await?;
        Ok(path)
    }

    async fn copy_artifacts(&self, target: &VmTarget, binary: &Path, unit: &Path) -> Result<()> {
        self.transport
            .copy(target, binary, &self.commands.staged_binary)
            .await?;
        self.transport
            .copy(target, unit, &self.commands.staged_unit)
            .await?;
        debug!(vm = %target.name, "Agent artifacts copied");
        Ok(())
    }

    async fn verify(&self, target: &VmTarget) -> Result<String> {
        let output = self.transport.exec(target, &self.commands.status()).await?;
        let line = active_line(&output.stdout);
        if output.stdout.contains(RUNNING_MARKER) {
            info!(vm = %target.name, status = %line, "Agent running");
            Ok(line)
        } else {
            Err(Error::RemoteExecFailed {
                vm: target.name.clone(),
                command: self.commands.status(),
                detail: format!("service is not running ({})", line),
            })
        }
    }

    /// Best-effort `systemctl is-active` result, `None` if the VM can't be reached.
    pub async fn service_state(&self, vm: &str) -> Option<String> {
        let target = self.target(vm);
        match self.transport.exec(&target, &self.commands.is_active()).await {
            Ok(output) if output.status != 255 => Some(output.stdout.trim().to_string()),
            _ => None,
        }
    }
}
