/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/transport/common.rs
*
* Child-process helpers shared by the transport and the build toolchain.
* `capture_command` collects output for callers that inspect it;
* `stream_command` forwards stdout/stderr line by line as they arrive, which
* gives immediate feedback for long-running commands such as a followed log.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::error::{Error, Result};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Renders a command line for logs and error messages.
pub fn describe(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program().to_string_lossy().into_owned())
        .chain(std.get_args().map(|a| a.to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Captured output of a finished local process.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the command to completion with stdin closed and captures its output.
pub async fn capture_command(command: &mut Command) -> Result<Captured> {
    debug!(command = %describe(command), "Spawning");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let output = match command.output().await {
        Ok(output) => output,
        Err(e) => return Err(spawn_error(command, e)),
    };

    Ok(Captured {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs the command, forwarding each output line to our stdout/stderr.
pub async fn stream_command(command: &mut Command) -> Result<ExitStatus> {
    debug!(command = %describe(command), "Spawning (streaming)");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| spawn_error(command, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::IoError(std::io::Error::other("child has no stdout handle")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::IoError(std::io::Error::other("child has no stderr handle")))?;

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout_reader.next_line(), if stdout_open => match line? {
                Some(line) => println!("{}", line),
                None => stdout_open = false,
            },
            line = stderr_reader.next_line(), if stderr_open => match line? {
                Some(line) => eprintln!("{}", line),
                None => stderr_open = false,
            },
        }
    }

    Ok(child.wait().await?)
}

fn spawn_error(command: &Command, e: std::io::Error) -> Error {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::PrereqMissing(format!("'{}' is not installed or not in PATH", program))
    } else {
        Error::IoError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_renders_program_and_args() {
        let mut cmd = Command::new("virtctl");
        cmd.args(["ssh", "fedora@vmi/test-1"]);
        assert_eq!(describe(&cmd), "virtctl ssh fedora@vmi/test-1");
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_prereq_error() {
        let mut cmd = Command::new("definitely-not-a-real-binary-virt-fleet");
        let err = capture_command(&mut cmd).await.unwrap_err();
        assert!(matches!(err, Error::PrereqMissing(_)));
    }
}
