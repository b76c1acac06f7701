/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/cluster/status.rs
*
* Typed views over the status sections the workflow waits on: capability
* conditions, the install phase of the operator revision, the printable status
* of a VirtualMachine and the phase/readiness of its running instance. All
* readers take the raw JSON document returned by the resource client.
*
* SPDX-License-Identifier: Apache-2.0 */

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Tri-state value of a status condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        })
    }
}

/// Condition kind to status, as read from `.status.conditions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions(pub BTreeMap<String, ConditionStatus>);

impl Conditions {
    pub fn from_resource(resource: &Value) -> Self {
        let map = resource
            .pointer("/status/conditions")
            .and_then(Value::as_array)
            .map(|conditions| {
                conditions
                    .iter()
                    .filter_map(|c| {
                        let kind = c.get("type")?.as_str()?;
                        let status = c.get("status").and_then(Value::as_str).unwrap_or("Unknown");
                        Some((kind.to_string(), ConditionStatus::parse(status)))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Conditions(map)
    }

    /// Missing conditions read as `Unknown`.
    pub fn get(&self, kind: &str) -> ConditionStatus {
        self.0.get(kind).copied().unwrap_or(ConditionStatus::Unknown)
    }

    /// `Available=True ∧ Progressing=False ∧ Degraded=False`
    pub fn is_healthy(&self) -> bool {
        capability_healthy(
            self.get("Available"),
            self.get("Progressing"),
            self.get("Degraded"),
        )
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Available={} Progressing={} Degraded={}",
            self.get("Available"),
            self.get("Progressing"),
            self.get("Degraded")
        )
    }
}

pub fn capability_healthy(
    available: ConditionStatus,
    progressing: ConditionStatus,
    degraded: ConditionStatus,
) -> bool {
    available == ConditionStatus::True
        && progressing == ConditionStatus::False
        && degraded == ConditionStatus::False
}

/// Phase of the installed operator revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallPhase {
    Absent,
    Pending,
    InstallReady,
    Installing,
    Succeeded,
    Other(String),
}

impl InstallPhase {
    pub fn from_resource(resource: Option<&Value>) -> Self {
        let Some(resource) = resource else {
            return InstallPhase::Absent;
        };
        match resource.pointer("/status/phase").and_then(Value::as_str) {
            None | Some("") => InstallPhase::Absent,
            Some("Pending") => InstallPhase::Pending,
            Some("InstallReady") => InstallPhase::InstallReady,
            Some("Installing") => InstallPhase::Installing,
            Some("Succeeded") => InstallPhase::Succeeded,
            Some(other) => InstallPhase::Other(other.to_string()),
        }
    }

    /// Phases that are part of a normal install progression.
    pub fn is_expected(&self) -> bool {
        !matches!(self, InstallPhase::Other(_))
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallPhase::Absent => f.write_str("<absent>"),
            InstallPhase::Pending => f.write_str("Pending"),
            InstallPhase::InstallReady => f.write_str("InstallReady"),
            InstallPhase::Installing => f.write_str("Installing"),
            InstallPhase::Succeeded => f.write_str("Succeeded"),
            InstallPhase::Other(s) => f.write_str(s),
        }
    }
}

/// The installed revision identifier reported by a subscription.
pub fn installed_revision(subscription: &Value) -> Option<String> {
    subscription
        .pointer("/status/installedCSV")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `printableStatus` of a VirtualMachine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmStatus {
    Absent,
    Stopped,
    Starting,
    Running,
    Other(String),
}

impl VmStatus {
    pub fn from_resource(resource: Option<&Value>) -> Self {
        let Some(resource) = resource else {
            return VmStatus::Absent;
        };
        match resource
            .pointer("/status/printableStatus")
            .and_then(Value::as_str)
        {
            Some("Stopped") => VmStatus::Stopped,
            Some("Starting") => VmStatus::Starting,
            Some("Running") => VmStatus::Running,
            Some(other) => VmStatus::Other(other.to_string()),
            None => VmStatus::Other("<no status>".to_string()),
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmStatus::Absent => f.write_str("<absent>"),
            VmStatus::Stopped => f.write_str("Stopped"),
            VmStatus::Starting => f.write_str("Starting"),
            VmStatus::Running => f.write_str("Running"),
            VmStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Phase of a VirtualMachineInstance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmiPhase {
    Absent,
    Scheduled,
    Running,
    Failed,
    Other(String),
}

impl VmiPhase {
    pub fn from_resource(resource: Option<&Value>) -> Self {
        let Some(resource) = resource else {
            return VmiPhase::Absent;
        };
        match resource.pointer("/status/phase").and_then(Value::as_str) {
            Some("Scheduled") => VmiPhase::Scheduled,
            Some("Running") => VmiPhase::Running,
            Some("Failed") => VmiPhase::Failed,
            Some(other) => VmiPhase::Other(other.to_string()),
            None => VmiPhase::Other("<no phase>".to_string()),
        }
    }
}

impl fmt::Display for VmiPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmiPhase::Absent => f.write_str("<absent>"),
            VmiPhase::Scheduled => f.write_str("Scheduled"),
            VmiPhase::Running => f.write_str("Running"),
            VmiPhase::Failed => f.write_str("Failed"),
            VmiPhase::Other(s) => f.write_str(s),
        }
    }
}

/// True when the instance reports condition `Ready=True`.
pub fn vmi_ready(vmi: &Value) -> bool {
    Conditions::from_resource(vmi).get("Ready") == ConditionStatus::True
}
