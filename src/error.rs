/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/error.rs
*
* Error taxonomy shared by every workflow component. Pre-flight and one-time
* installer errors are fatal for the whole process; transport, copy and build
* errors are contained to the per-VM job that produced them.
*
* SPDX-License-Identifier: Apache-2.0 */

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Diagnostic payload carried by every timeout-flavoured error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    /// Human description of what was being awaited.
    pub what: String,
    pub elapsed: Duration,
    pub attempts: u32,
    /// Last observed state, rendered for the operator.
    pub last_observed: String,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out waiting for {} after {}s ({} attempts); last observed: {}",
            self.what,
            self.elapsed.as_secs(),
            self.attempts,
            self.last_observed
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Prerequisite missing: {0}")]
    PrereqMissing(String),

    #[error("{0}")]
    ConvergenceTimeout(Timeout),

    #[error("Install plan never appeared: {0}")]
    InstallPlanTimeout(Timeout),

    #[error("Operator install did not succeed: {0}")]
    InstallTimeout(Timeout),

    #[error("Capability is unhealthy: {0}")]
    CapabilityUnhealthy(Timeout),

    #[error("Failed to apply {resource}: {source}")]
    ApplyFailed {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("Failed to patch {resource}: {source}")]
    PatchFailed {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("Failed to query {resource}: {detail}")]
    QueryFailed { resource: String, detail: String },

    #[error("Remote command on '{vm}' failed ({command}): {detail}")]
    RemoteExecFailed {
        vm: String,
        command: String,
        detail: String,
    },

    #[error("Copy of '{local}' to '{vm}:{remote}' failed: {detail}")]
    CopyFailed {
        vm: String,
        local: String,
        remote: String,
        detail: String,
    },

    #[error("Agent build failed: {0}")]
    BuildFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to serialize JSON document: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to serialize YAML document: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the timeout payload for any of the timeout-flavoured variants.
    pub fn timeout(&self) -> Option<&Timeout> {
        match self {
            Error::ConvergenceTimeout(t)
            | Error::InstallPlanTimeout(t)
            | Error::InstallTimeout(t)
            | Error::CapabilityUnhealthy(t) => Some(t),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
