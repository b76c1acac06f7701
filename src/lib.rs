/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/lib.rs
*
* Library root of `virt_fleet`. The workflow components (operator installer,
* fleet provisioner, per-VM agent installer, fleet orchestrator) talk to the
* outside world only through three seams: `cluster::ResourceClient`,
* `transport::VmTransport` and `toolchain::Toolchain`.
*
* SPDX-License-Identifier: Apache-2.0 */

pub mod agent;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod installer;
pub mod logs;
pub mod orchestrator;
pub mod poller;
pub mod provisioner;
pub mod report;
pub mod telemetry;
pub mod toolchain;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
