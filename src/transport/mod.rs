/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/transport/mod.rs
*
* The remote exec/copy seam. The agent installer and the log tailer reach a
* VM only through `VmTransport`; `VirtctlTransport` is the production
* implementation, shelling out to `virtctl ssh` / `virtctl scp`.
*
* SPDX-License-Identifier: Apache-2.0 */

pub mod common;
pub mod virtctl;

pub use virtctl::VirtctlTransport;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// A named, namespaced VM reached as a given login user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmTarget {
    pub namespace: String,
    pub name: String,
    pub user: String,
}

impl VmTarget {
    pub fn new(namespace: &str, name: &str, user: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            user: user.to_string(),
        }
    }
}

impl fmt::Display for VmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user, self.namespace, self.name)
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status; `-1` when the process was killed by a signal.
    pub status: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait VmTransport: Send + Sync {
    /// Runs `command` on the VM. A non-zero remote exit is reported in the
    /// output, not as an error; `Err` means the transport itself failed.
    async fn exec(&self, target: &VmTarget, command: &str) -> Result<ExecOutput>;

    /// Copies a local file to `remote` on the VM.
    async fn copy(&self, target: &VmTarget, local: &Path, remote: &str) -> Result<()>;

    /// Runs `command` and forwards its output line by line until it exits.
    async fn stream(&self, target: &VmTarget, command: &str) -> Result<()>;
}

/// Runs `command` and turns a non-zero exit into [`Error::RemoteExecFailed`].
pub async fn exec_checked(
    transport: &dyn VmTransport,
    target: &VmTarget,
    command: &str,
) -> Result<String> {
    let output = transport.exec(target, command).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        let detail = if output.stderr.trim().is_empty() {
            format!("exit status {}", output.status)
        } else {
            format!("exit status {}: {}", output.status, output.stderr.trim())
        };
        Err(Error::RemoteExecFailed {
            vm: target.name.clone(),
            command: command.to_string(),
            detail,
        })
    }
}
