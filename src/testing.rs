/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/testing.rs
*
* In-memory stand-ins for the three external collaborators (cluster, VM
* transport, build toolchain). Each fake records the calls it receives so
* tests can assert on mutation counts, and exposes knobs to inject failures
* for specific VMs.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::cluster::{Manifest, ResourceClient, ResourceKind, ResourcePatch, ResourceRef};
use crate::config::{FleetConfig, OperatorSettings};
use crate::error::{Error, Result};
use crate::toolchain::{BuildRequest, Toolchain};
use crate::transport::{ExecOutput, VmTarget, VmTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

pub type Store = BTreeMap<ResourceRef, Value>;

/// Simulated control-plane behaviour run after every apply or patch.
pub type Reaction = Box<dyn Fn(&ResourceRef, &mut Store) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get(ResourceRef),
    Apply(ResourceRef),
    Patch(ResourceRef, ResourcePatch),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Get(_))
    }
}

pub struct FakeCluster {
    pub store: Mutex<Store>,
    pub calls: Mutex<Vec<Call>>,
    pub reachable: bool,
    pub fail_apply: BTreeSet<String>,
    reactions: Vec<Reaction>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            store: Mutex::new(Store::new()),
            calls: Mutex::new(Vec::new()),
            reachable: true,
            fail_apply: BTreeSet::new(),
            reactions: Vec::new(),
        }
    }
}

impl FakeCluster {
    pub fn with_reaction(mut self, reaction: Reaction) -> Self {
        self.reactions.push(reaction);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn failing_apply_for(mut self, name: &str) -> Self {
        self.fail_apply.insert(name.to_string());
        self
    }

    pub fn seed(&self, target: ResourceRef, value: Value) {
        self.store.lock().unwrap().insert(target, value);
    }

    pub fn object(&self, target: &ResourceRef) -> Option<Value> {
        self.store.lock().unwrap().get(target).cloned()
    }

    pub fn snapshot(&self) -> Store {
        self.store.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn mutations_of(&self, name: &str) -> Vec<Call> {
        self.mutations()
            .into_iter()
            .filter(|c| match c {
                Call::Apply(r) | Call::Patch(r, _) => r.name == name,
                Call::Get(_) => false,
            })
            .collect()
    }

    fn react(&self, target: &ResourceRef, store: &mut Store) {
        for reaction in &self.reactions {
            reaction(target, store);
        }
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn server_version(&self) -> Result<String> {
        if self.reachable {
            Ok("v1.30.0".to_string())
        } else {
            Err(Error::PrereqMissing("cluster API is unreachable".to_string()))
        }
    }

    async fn apply(&self, manifests: &[Manifest]) -> Result<()> {
        for manifest in manifests {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Apply(manifest.target.clone()));
            if self.fail_apply.contains(&manifest.target.name) {
                return Err(Error::IoError(std::io::Error::other(format!(
                    "injected apply failure for {}",
                    manifest.target
                ))));
            }
            let mut store = self.store.lock().unwrap();
            match store.get_mut(&manifest.target) {
                Some(existing) => json_patch::merge(existing, &manifest.body),
                None => {
                    store.insert(manifest.target.clone(), manifest.body.clone());
                }
            }
            self.react(&manifest.target, &mut store);
        }
        Ok(())
    }

    async fn get(&self, target: &ResourceRef) -> Result<Option<Value>> {
        self.calls.lock().unwrap().push(Call::Get(target.clone()));
        Ok(self.object(target))
    }

    async fn patch(&self, target: &ResourceRef, patch: &ResourcePatch) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Patch(target.clone(), patch.clone()));
        let mut store = self.store.lock().unwrap();
        let Some(existing) = store.get_mut(target) else {
            return Err(Error::QueryFailed {
                resource: target.to_string(),
                detail: "not found".to_string(),
            });
        };
        match patch {
            ResourcePatch::Merge(value) => json_patch::merge(existing, value),
            ResourcePatch::Json(ops) => json_patch::patch(existing, &ops.0).map_err(|e| {
                Error::QueryFailed {
                    resource: target.to_string(),
                    detail: e.to_string(),
                }
            })?,
        }
        self.react(target, &mut store);
        Ok(())
    }
}

fn set_status(store: &mut Store, target: &ResourceRef, status: Value) {
    if let Some(object) = store.get_mut(target) {
        object["status"] = status;
    }
}

/// Operator behaviour: a subscription gets an installed revision whose CSV
/// has succeeded, and the capability reports healthy conditions once created.
pub fn simulate_operator(settings: &OperatorSettings) -> Reaction {
    let settings = settings.clone();
    Box::new(move |target: &ResourceRef, store: &mut Store| match target.kind {
        ResourceKind::Subscription => {
            let revision = "kubevirt-hyperconverged-operator.v1.11.0";
            set_status(store, target, json!({ "installedCSV": revision }));
            store.insert(
                ResourceRef::namespaced(
                    ResourceKind::ClusterServiceVersion,
                    &settings.namespace,
                    revision,
                ),
                json!({ "metadata": { "name": revision }, "status": { "phase": "Succeeded" } }),
            );
        }
        ResourceKind::HyperConverged => {
            set_status(store, target, healthy_conditions());
        }
        _ => {}
    })
}

pub fn healthy_conditions() -> Value {
    json!({
        "conditions": [
            { "type": "Available", "status": "True" },
            { "type": "Progressing", "status": "False" },
            { "type": "Degraded", "status": "False" }
        ]
    })
}

/// KubeVirt behaviour: a VM with `runStrategy: Always` is running and has a
/// ready instance.
pub fn simulate_kubevirt() -> Reaction {
    Box::new(|target: &ResourceRef, store: &mut Store| {
        if target.kind != ResourceKind::VirtualMachine {
            return;
        }
        let always = store
            .get(target)
            .and_then(|vm| vm.pointer("/spec/runStrategy"))
            .and_then(Value::as_str)
            == Some("Always");
        if !always {
            return;
        }
        set_status(store, target, json!({ "printableStatus": "Running" }));
        let vmi = ResourceRef::new(
            ResourceKind::VirtualMachineInstance,
            target.namespace.as_deref(),
            &target.name,
        );
        store.insert(
            vmi,
            json!({
                "metadata": { "name": target.name },
                "status": {
                    "phase": "Running",
                    "conditions": [{ "type": "Ready", "status": "True" }]
                }
            }),
        );
    })
}

/// Per-VM state kept by the fake transport.
#[derive(Debug, Clone, Default)]
pub struct FakeVm {
    pub service_active: bool,
    pub files: BTreeSet<String>,
}

#[derive(Default)]
pub struct FakeTransport {
    pub vms: Mutex<BTreeMap<String, FakeVm>>,
    pub commands: Mutex<Vec<(String, String)>>,
    pub unreachable: BTreeSet<String>,
    pub fail_copy: BTreeSet<String>,
    pub fail_install: BTreeSet<String>,
}

impl FakeTransport {
    pub fn unreachable(mut self, vm: &str) -> Self {
        self.unreachable.insert(vm.to_string());
        self
    }

    pub fn failing_copy(mut self, vm: &str) -> Self {
        self.fail_copy.insert(vm.to_string());
        self
    }

    pub fn failing_install(mut self, vm: &str) -> Self {
        self.fail_install.insert(vm.to_string());
        self
    }

    pub fn vm(&self, name: &str) -> FakeVm {
        self.vms.lock().unwrap().get(name).cloned().unwrap_or_default()
    }

    pub fn set_active(&self, name: &str, active: bool) {
        self.vms
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .service_active = active;
    }

    pub fn commands_for(&self, name: &str) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(vm, _)| vm == name)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn output(stdout: &str, status: i32) -> ExecOutput {
        ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            status,
        }
    }
}

#[async_trait]
impl VmTransport for FakeTransport {
    async fn exec(&self, target: &VmTarget, command: &str) -> Result<ExecOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((target.name.clone(), command.to_string()));

        if self.unreachable.contains(&target.name) {
            return Ok(ExecOutput {
                stdout: String::new(),
                stderr: "ssh: connect to host: Connection refused".to_string(),
                status: 255,
            });
        }

        let mut vms = self.vms.lock().unwrap();
        let vm = vms.entry(target.name.clone()).or_default();

        let output = if let Some(token) = command.strip_prefix("echo ") {
            Self::output(&format!("{}\n", token), 0)
        } else if command.contains("systemctl is-active") {
            if vm.service_active {
                Self::output("active\n", 0)
            } else {
                Self::output("inactive\n", 3)
            }
        } else if command.contains("systemctl stop") {
            vm.service_active = false;
            Self::output("", 0)
        } else if command.contains("enable --now") {
            if self.fail_install.contains(&target.name) {
                Self::output("Failed to enable unit", 1)
            } else {
                vm.service_active = true;
                Self::output("", 0)
            }
        } else if command.contains("systemctl status") {
            if vm.service_active {
                Self::output(
                    "● fleet-agent.service - Fleet monitoring agent\n     Active: active (running) since Mon 2026-10-12 10:00:00 UTC; 3s ago\n",
                    0,
                )
            } else {
                Self::output(
                    "● fleet-agent.service - Fleet monitoring agent\n     Active: inactive (dead)\n",
                    3,
                )
            }
        } else if command.contains("journalctl") {
            Self::output("Oct 12 10:00:01 vm fleet-agent[42]: started\n", 0)
        } else {
            Self::output("", 0)
        };
        Ok(output)
    }

    async fn copy(&self, target: &VmTarget, local: &Path, remote: &str) -> Result<()> {
        if self.fail_copy.contains(&target.name) {
            return Err(Error::CopyFailed {
                vm: target.name.clone(),
                local: local.display().to_string(),
                remote: remote.to_string(),
                detail: "injected copy failure".to_string(),
            });
        }
        self.vms
            .lock()
            .unwrap()
            .entry(target.name.clone())
            .or_default()
            .files
            .insert(remote.to_string());
        Ok(())
    }

    async fn stream(&self, target: &VmTarget, command: &str) -> Result<()> {
        self.exec(target, command).await.map(|_| ())
    }
}

#[derive(Default)]
pub struct FakeToolchain {
    pub builds: Mutex<Vec<BuildRequest>>,
    pub fail: bool,
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        self.builds.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(Error::BuildFailed("injected build failure".to_string()));
        }
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output, b"agent").await?;
        Ok(())
    }
}

/// A valid configuration for a fleet of `count` VMs named `prefix-i`.
pub fn fleet_config(prefix: &str, count: u32) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.vms.prefix = prefix.to_string();
    config.vms.count = count;
    config.vms.ssh_public_keys = vec!["ssh-ed25519 AAAA test@host".to_string()];
    config
}
