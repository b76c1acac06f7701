/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/main.rs
*
* Entry point of the `virt_fleet` binary. Parses the command line, resolves
* the configuration once, wires the production collaborators (kube client,
* virtctl transport, Go toolchain) and dispatches to the requested stage.
*
* Exit codes: 0 on success, 1 on any fatal error. A failed `install-agent`
* is fatal; per-VM failures of a fleet-wide install are reported in the
* summary and only affect the exit code with `--strict`.
*
* SPDX-License-Identifier: Apache-2.0 */

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use virt_fleet::agent::{AgentInstaller, ServiceCommands};
use virt_fleet::cli::{Cli, Commands, LogsArgs};
use virt_fleet::cluster::kube_client::KubeResourceClient;
use virt_fleet::cluster::status::VmiPhase;
use virt_fleet::cluster::ResourceClient;
use virt_fleet::config::FleetConfig;
use virt_fleet::installer::OperatorInstaller;
use virt_fleet::logs::{self, TailOptions};
use virt_fleet::orchestrator::{self, FleetReport};
use virt_fleet::provisioner::FleetProvisioner;
use virt_fleet::report;
use virt_fleet::telemetry;
use virt_fleet::toolchain::GoToolchain;
use virt_fleet::transport::{VirtctlTransport, VmTarget};

/// Production collaborators shared by every stage of one run.
struct App {
    config: Arc<FleetConfig>,
    cluster: Arc<dyn ResourceClient>,
}

impl App {
    async fn connect(config: FleetConfig) -> Result<Self> {
        let cluster = KubeResourceClient::connect(config.kubeconfig.as_deref())
            .await
            .context("Failed to create Kubernetes client. Is your kubeconfig set up correctly?")?;
        Ok(Self {
            config: Arc::new(config),
            cluster: Arc::new(cluster),
        })
    }

    fn provisioner(&self) -> Arc<FleetProvisioner> {
        Arc::new(FleetProvisioner::new(self.cluster.clone(), self.config.clone()))
    }

    fn agent_installer(&self, work_dir: &std::path::Path) -> Arc<AgentInstaller> {
        Arc::new(AgentInstaller::new(
            self.cluster.clone(),
            Arc::new(VirtctlTransport::new(self.config.ssh.clone())),
            Arc::new(GoToolchain::default()),
            self.config.clone(),
            work_dir,
        ))
    }

    async fn install_operator(&self) -> Result<()> {
        println!("➡️  Installing virtualization operator in '{}'", self.config.operator.namespace);
        let installer = OperatorInstaller::new(
            self.cluster.clone(),
            self.config.operator.clone(),
            self.config.budgets.clone(),
        );
        let result = installer.run().await.context("Operator installation failed")?;
        print!("{}", report::render_install_report(&result));
        println!("✅ Operator installed and healthy.");
        Ok(())
    }

    async fn provision(&self) -> Result<()> {
        println!(
            "➡️  Provisioning {} VMs with prefix '{}' in '{}'",
            self.config.vms.count, self.config.vms.prefix, self.config.vms.namespace
        );
        let summary = self.provisioner().provision().await;
        print!("{}", report::render_provision_summary(&summary));
        Ok(())
    }

    async fn install_agents(&self) -> Result<FleetReport> {
        let provisioner = self.provisioner();
        let names = provisioner.names();
        println!("➡️  Installing agent on {} VMs", names.len());

        let work_dir = tempfile::Builder::new()
            .prefix("virt-fleet-")
            .tempdir()
            .context("Failed to create build directory")?;
        let installer = self.agent_installer(work_dir.path());
        let fleet = orchestrator::install_agents(provisioner, installer, &names).await;
        print!("{}", report::render_fleet_report(&fleet));
        Ok(fleet)
    }

    async fn install_agent(&self, vm: &str) -> Result<()> {
        println!("➡️  Installing agent on '{}'", vm);
        let work_dir = tempfile::Builder::new()
            .prefix("virt-fleet-")
            .tempdir()
            .context("Failed to create build directory")?;
        let provisioner = self.provisioner();
        let installer = self.agent_installer(work_dir.path());

        let status = orchestrator::install_agent(&provisioner, &installer, vm)
            .await
            .with_context(|| format!("Agent installation on '{}' failed", vm))?;
        println!("✅ Agent running on '{}': {}", vm, status);
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let observations = self
            .provisioner()
            .observe()
            .await
            .context("Failed to query fleet state")?;
        let work_dir = std::env::temp_dir();
        let installer = self.agent_installer(&work_dir);

        let mut rows = Vec::with_capacity(observations.len());
        for observation in observations {
            let agent = if observation.vmi == VmiPhase::Running {
                installer.service_state(&observation.name).await
            } else {
                None
            };
            rows.push((observation, agent));
        }
        print!("{}", report::render_fleet_status(&rows));
        Ok(())
    }

    async fn logs(&self, args: LogsArgs) -> Result<()> {
        let transport = VirtctlTransport::new(self.config.ssh.clone());
        let commands = ServiceCommands::new(&self.config.agent);
        let target = VmTarget::new(&self.config.vms.namespace, &args.vm, &self.config.vms.user);
        let options = TailOptions {
            lines: args.lines,
            follow: args.follow,
        };

        let tail = logs::tail(&transport, &commands, &target, options);
        let output = tokio::select! {
            result = tail => result.with_context(|| format!("Failed to read agent logs from '{}'", args.vm))?,
            _ = tokio::signal::ctrl_c() => None,
        };
        if let Some(text) = output {
            print!("{}", text);
        }
        Ok(())
    }
}

/// Exit code for a finished fleet install.
fn fleet_exit_code(fleet: &FleetReport, strict: bool) -> ExitCode {
    if fleet.all_succeeded() {
        println!("\n✅ Agent installed on every VM.");
        ExitCode::SUCCESS
    } else if strict {
        eprintln!("\n❌ Agent installation failed on {} VM(s).", fleet.failed);
        ExitCode::FAILURE
    } else {
        println!(
            "\n⚠️  Agent installation failed on {} VM(s); see the report above.",
            fleet.failed
        );
        ExitCode::SUCCESS
    }
}

async fn run_async_logic(cli: Cli) -> Result<ExitCode> {
    let config = cli.global.into_config().context("Invalid configuration")?;
    let strict = config.strict;
    let app = App::connect(config).await?;

    match cli.command {
        Commands::InstallOperator => app.install_operator().await?,
        Commands::Provision => app.provision().await?,
        Commands::InstallAgents => {
            let fleet = app.install_agents().await?;
            return Ok(fleet_exit_code(&fleet, strict));
        }
        Commands::InstallAgent(args) => app.install_agent(&args.vm).await?,
        Commands::Up => {
            app.install_operator().await?;
            app.provision().await?;
            let fleet = app.install_agents().await?;
            return Ok(fleet_exit_code(&fleet, strict));
        }
        Commands::Status => app.status().await?,
        Commands::Logs(args) => app.logs(args).await?,
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = telemetry::init(cli.global.log_format) {
        eprintln!("[virt_fleet] Failed to initialize logging: {}", e);
    }

    match run_async_logic(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\n❌ An error occurred: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
