/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/report.rs
*
* Operator-facing console output: aligned status rows and the end-of-stage
* summaries. This output goes to stdout regardless of the log level; tracing
* events go to stderr.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::installer::InstallReport;
use crate::orchestrator::{FleetReport, JobOutcome};
use crate::provisioner::{ProvisionSummary, VmAction, VmObservation};
use std::fmt::Write;

fn status_row(label: &str, success: bool, message: &str) -> String {
    let status_icon = if success { "✅" } else { "❌" };
    // Pad the label so the icons line up.
    format!("{:<25} {} {}", label, status_icon, message)
}

pub fn render_install_report(report: &InstallReport) -> String {
    let mut out = String::from("--- Operator Install ---\n");
    let _ = writeln!(out, "{}", status_row("Cluster", true, &report.server_version));
    let revision = report.revision.as_deref().unwrap_or("(already installed)");
    let _ = writeln!(out, "{}", status_row("Operator revision", true, revision));
    let gate = if report.feature_gate_added {
        "enabled"
    } else {
        "already enabled"
    };
    let _ = writeln!(out, "{}", status_row("Feature gate", true, gate));
    let env = if report.env_override_patched {
        "set"
    } else {
        "already set"
    };
    let _ = writeln!(out, "{}", status_row("Environment override", true, env));
    out
}

pub fn render_provision_summary(summary: &ProvisionSummary) -> String {
    let mut out = String::from("--- VM Provisioning ---\n");
    for record in &summary.records {
        let ok = !matches!(record.action, VmAction::Failed(_));
        let _ = writeln!(out, "{}", status_row(&record.name, ok, &record.action.to_string()));
    }
    let _ = writeln!(
        out,
        "Created: {}  Already existed: {}  Failed: {}  (total {})",
        summary.created,
        summary.already_existed,
        summary.failed,
        summary.total()
    );
    out
}

pub fn render_fleet_report(report: &FleetReport) -> String {
    let mut out = String::from("--- Agent Installation Report ---\n");
    for job in &report.jobs {
        let row = match &job.outcome {
            JobOutcome::Success(status) => status_row(&job.vm_name, true, status),
            JobOutcome::Failed(reason) => status_row(&job.vm_name, false, reason),
        };
        let _ = writeln!(out, "{}", row);
    }
    let _ = writeln!(
        out,
        "Total: {}  Succeeded: {}  Failed: {}",
        report.total, report.success, report.failed
    );
    if !report.failed_names.is_empty() {
        let _ = writeln!(out, "Failed VMs: {}", report.failed_names.join(", "));
    }
    let _ = writeln!(
        out,
        "Finished at {} after {}s",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.elapsed.as_secs()
    );
    out
}

/// One row per VM: resource status, instance phase, agent state.
pub fn render_fleet_status(rows: &[(VmObservation, Option<String>)]) -> String {
    let mut out = String::from("--- Fleet Status ---\n");
    for (observation, agent) in rows {
        let agent = agent.as_deref().unwrap_or("unreachable");
        let healthy = agent == "active";
        let message = format!(
            "vm={} vmi={} agent={}",
            observation.vm, observation.vmi, agent
        );
        let _ = writeln!(out, "{}", status_row(&observation.name, healthy, &message));
    }
    out
}
