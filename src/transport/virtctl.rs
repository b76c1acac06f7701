/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/transport/virtctl.rs
*
* Implements `VmTransport` on top of the `virtctl` CLI. Commands run through
* `virtctl ssh <user>@vmi/<name>` and files move through `virtctl scp`; both
* carry the same local SSH options (connect timeout, no host-key pinning, the
* optional identity file).
*
* SPDX-License-Identifier: Apache-2.0 */

use super::common::{capture_command, describe, stream_command};
use super::{ExecOutput, VmTarget, VmTransport};
use crate::config::SshSettings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Transport backed by the virtctl binary.
pub struct VirtctlTransport {
    binary: PathBuf,
    ssh: SshSettings,
}

impl VirtctlTransport {
    pub fn new(ssh: SshSettings) -> Self {
        Self {
            binary: PathBuf::from("virtctl"),
            ssh,
        }
    }

    fn local_ssh_opts(&self) -> Vec<String> {
        let options = [
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.ssh.connect_timeout.as_secs().max(1)),
        ];
        options
            .into_iter()
            .flat_map(|o| ["--local-ssh-opts".to_string(), format!("-o {}", o)])
            .collect()
    }

    fn identity_args(&self) -> Vec<String> {
        match &self.ssh.identity_file {
            Some(path) => vec![
                "--identity-file".to_string(),
                path.to_string_lossy().into_owned(),
            ],
            None => Vec::new(),
        }
    }

    pub(crate) fn ssh_args(&self, target: &VmTarget, command: &str) -> Vec<String> {
        let mut args = vec![
            "ssh".to_string(),
            format!("{}@vmi/{}", target.user, target.name),
            "--namespace".to_string(),
            target.namespace.clone(),
        ];
        args.extend(self.identity_args());
        args.extend(self.local_ssh_opts());
        args.push("--command".to_string());
        args.push(command.to_string());
        args
    }

    pub(crate) fn scp_args(&self, target: &VmTarget, local: &Path, remote: &str) -> Vec<String> {
        let mut args = vec![
            "scp".to_string(),
            "--namespace".to_string(),
            target.namespace.clone(),
        ];
        args.extend(self.identity_args());
        args.extend(self.local_ssh_opts());
        args.push(local.to_string_lossy().into_owned());
        args.push(format!("{}@vmi/{}:{}", target.user, target.name, remote));
        args
    }

    fn command(&self, args: Vec<String>) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command
    }
}

#[async_trait]
impl VmTransport for VirtctlTransport {
    async fn exec(&self, target: &VmTarget, command: &str) -> Result<ExecOutput> {
        let mut cmd = self.command(self.ssh_args(target, command));
        let captured = capture_command(&mut cmd).await?;
        let output = ExecOutput {
            stdout: captured.stdout,
            stderr: captured.stderr,
            status: captured.status.code().unwrap_or(-1),
        };
        debug!(vm = %target.name, status = output.status, "Remote command finished");
        Ok(output)
    }

    async fn copy(&self, target: &VmTarget, local: &Path, remote: &str) -> Result<()> {
        let mut cmd = self.command(self.scp_args(target, local, remote));
        let captured = capture_command(&mut cmd).await?;
        if captured.status.success() {
            Ok(())
        } else {
            Err(Error::CopyFailed {
                vm: target.name.clone(),
                local: local.display().to_string(),
                remote: remote.to_string(),
                detail: format!("{}: {}", captured.status, captured.stderr.trim()),
            })
        }
    }

    async fn stream(&self, target: &VmTarget, command: &str) -> Result<()> {
        let mut cmd = self.command(self.ssh_args(target, command));
        let status = stream_command(&mut cmd).await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::RemoteExecFailed {
                vm: target.name.clone(),
                command: describe(&cmd),
                detail: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transport(identity: Option<&str>) -> VirtctlTransport {
        VirtctlTransport::new(SshSettings {
            identity_file: identity.map(PathBuf::from),
            connect_timeout: Duration::from_secs(10),
        })
    }

    #[test]
    fn test_ssh_args() {
        let target = VmTarget::new("vms", "test-1", "fedora");
        let args = transport(Some("/home/me/.ssh/id_ed25519")).ssh_args(&target, "echo hi");

        assert_eq!(&args[..4], ["ssh", "fedora@vmi/test-1", "--namespace", "vms"]);
        assert_eq!(&args[4..6], ["--identity-file", "/home/me/.ssh/id_ed25519"]);
        assert!(args.contains(&"-o StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"-o UserKnownHostsFile=/dev/null".to_string()));
        assert!(args.contains(&"-o ConnectTimeout=10".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--command", "echo hi"]);
    }

    #[test]
    fn test_scp_args_without_identity() {
        let target = VmTarget::new("vms", "test-3", "fedora");
        let args = transport(None).scp_args(&target, Path::new("/tmp/build/agent"), "/tmp/agent");

        assert_eq!(&args[..3], ["scp", "--namespace", "vms"]);
        assert!(!args.contains(&"--identity-file".to_string()));
        assert_eq!(
            &args[args.len() - 2..],
            ["/tmp/build/agent", "fedora@vmi/test-3:/tmp/agent"]
        );
    }
}
