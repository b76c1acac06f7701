/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/logs.rs
*
* Reads the agent's journal on one VM. A bounded tail is captured and returned;
* a followed tail streams until the remote command ends or the process is
* interrupted.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::agent::ServiceCommands;
use crate::error::Result;
use crate::transport::{exec_checked, VmTarget, VmTransport};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    pub lines: u32,
    pub follow: bool,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            lines: 100,
            follow: false,
        }
    }
}

/// Returns the last `options.lines` journal lines, or streams them when following.
///
/// When following, output is forwarded as it arrives and `Ok(None)` is returned.
pub async fn tail(
    transport: &dyn VmTransport,
    commands: &ServiceCommands,
    target: &VmTarget,
    options: TailOptions,
) -> Result<Option<String>> {
    let command = commands.journal(options.lines, options.follow);
    info!(vm = %target.name, follow = options.follow, lines = options.lines, "Reading agent journal");

    if options.follow {
        transport.stream(target, &command).await?;
        Ok(None)
    } else {
        exec_checked(transport, target, &command).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::testing::FakeTransport;

    #[tokio::test]
    async fn test_bounded_tail_returns_journal() {
        let transport = FakeTransport::default();
        let commands = ServiceCommands::new(&AgentSettings::default());
        let target = VmTarget::new("default", "test-1", "fedora");

        let text = tail(&transport, &commands, &target, TailOptions { lines: 20, follow: false })
            .await
            .unwrap();

        assert!(text.unwrap().contains("fleet-agent[42]: started"));
        assert_eq!(
            transport.commands_for("test-1"),
            ["sudo journalctl -u fleet-agent.service --no-pager -n 20"]
        );
    }

    #[tokio::test]
    async fn test_follow_streams() {
        let transport = FakeTransport::default();
        let commands = ServiceCommands::new(&AgentSettings::default());
        let target = VmTarget::new("default", "test-1", "fedora");

        let text = tail(&transport, &commands, &target, TailOptions { lines: 5, follow: true })
            .await
            .unwrap();

        assert!(text.is_none());
        assert!(transport.commands_for("test-1")[0].ends_with(" -f"));
    }
}
