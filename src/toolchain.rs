/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/toolchain.rs
*
* Local build of the agent binary for the VM's OS/architecture. The build is
* a blocking local step of each per-VM job; a failure is fatal for that job
* only.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::error::{Error, Result};
use crate::transport::common::{capture_command, describe};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// What to build and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub source_dir: PathBuf,
    pub target_os: String,
    pub target_arch: String,
    pub output: PathBuf,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<()>;
}

/// Cross-compiles a Go module with `go build`.
pub struct GoToolchain {
    go: PathBuf,
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self {
            go: PathBuf::from("go"),
        }
    }
}

impl GoToolchain {
    pub(crate) fn command(&self, request: &BuildRequest) -> Command {
        let mut command = Command::new(&self.go);
        command
            .current_dir(&request.source_dir)
            .env("GOOS", &request.target_os)
            .env("GOARCH", &request.target_arch)
            .env("CGO_ENABLED", "0")
            .arg("build")
            .arg("-o")
            .arg(&request.output)
            .arg(".");
        command
    }
}

#[async_trait]
impl Toolchain for GoToolchain {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        ensure_source_dir(&request.source_dir)?;
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut command = self.command(request);
        let captured = capture_command(&mut command).await.map_err(|e| match e {
            Error::PrereqMissing(detail) => Error::BuildFailed(detail),
            other => other,
        })?;
        if !captured.status.success() {
            return Err(Error::BuildFailed(format!(
                "`{}` exited with {}: {}",
                describe(&command),
                captured.status,
                captured.stderr.trim()
            )));
        }

        info!(
            output = %request.output.display(),
            os = %request.target_os,
            arch = %request.target_arch,
            "Agent binary built"
        );
        Ok(())
    }
}

fn ensure_source_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(Error::BuildFailed(format!(
            "agent source tree '{}' does not exist",
            dir.display()
        )))
    }
}
