/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/cluster/manifests.rs
*
* Typed builders for every document the tool sends to the cluster. Manifests
* are assembled from structs (k8s-openapi metadata, serde shapes for the OLM
* and KubeVirt kinds) and only serialized at the end, so no document is ever
* produced by string interpolation.
*
* The two patch builders read the current object first and return `None` when
* the desired state is already present.
*
* SPDX-License-Identifier: Apache-2.0 */

use super::{Manifest, ResourceKind, ResourcePatch, ResourceRef};
use crate::config::{OperatorSettings, VmSettings};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{EnvVar, Namespace};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "virt-fleet";
pub const FLEET_LABEL: &str = "virt-fleet.io/fleet";
pub const VM_LABEL: &str = "kubevirt.io/vm";

/// Location of the feature-gate list inside the capability resource.
pub const FEATURE_GATES_PATH: [&str; 4] =
    ["spec", "configuration", "developerConfiguration", "featureGates"];

/// Generic envelope for the custom kinds.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<S: Serialize> {
    api_version: String,
    kind: &'static str,
    metadata: ObjectMeta,
    spec: S,
}

impl<S: Serialize> Document<S> {
    fn new(kind: ResourceKind, metadata: ObjectMeta, spec: S) -> Self {
        Self {
            api_version: kind.api_version(),
            kind: kind.kind(),
            metadata,
            spec,
        }
    }
}

#[derive(Serialize, Default)]
struct Empty {}

fn metadata(name: &str, namespace: Option<&str>, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        ..ObjectMeta::default()
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    )])
}

fn manifest<T: Serialize>(target: ResourceRef, document: &T) -> Result<Manifest> {
    Ok(Manifest {
        target,
        body: serde_json::to_value(document)?,
    })
}

pub fn namespace(name: &str) -> Result<Manifest> {
    let ns = Namespace {
        metadata: metadata(name, None, managed_labels()),
        ..Namespace::default()
    };
    manifest(ResourceRef::cluster(ResourceKind::Namespace, name), &ns)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OperatorGroupSpec {
    target_namespaces: Vec<String>,
}

pub fn operator_group(settings: &OperatorSettings) -> Result<Manifest> {
    let doc = Document::new(
        ResourceKind::OperatorGroup,
        metadata(
            &settings.operator_group,
            Some(&settings.namespace),
            managed_labels(),
        ),
        OperatorGroupSpec {
            target_namespaces: vec![settings.namespace.clone()],
        },
    );
    manifest(
        ResourceRef::namespaced(
            ResourceKind::OperatorGroup,
            &settings.namespace,
            &settings.operator_group,
        ),
        &doc,
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionSpec {
    channel: String,
    name: String,
    source: String,
    source_namespace: String,
    install_plan_approval: &'static str,
}

pub fn subscription(settings: &OperatorSettings) -> Result<Manifest> {
    let doc = Document::new(
        ResourceKind::Subscription,
        metadata(
            &settings.subscription,
            Some(&settings.namespace),
            managed_labels(),
        ),
        SubscriptionSpec {
            channel: settings.channel.clone(),
            name: settings.package.clone(),
            source: settings.source.clone(),
            source_namespace: settings.source_namespace.clone(),
            install_plan_approval: "Automatic",
        },
    );
    manifest(
        ResourceRef::namespaced(
            ResourceKind::Subscription,
            &settings.namespace,
            &settings.subscription,
        ),
        &doc,
    )
}

/// Namespace, operator group and subscription, in apply order.
pub fn operator_bundle(settings: &OperatorSettings) -> Result<Vec<Manifest>> {
    Ok(vec![
        namespace(&settings.namespace)?,
        operator_group(settings)?,
        subscription(settings)?,
    ])
}

pub fn capability(settings: &OperatorSettings) -> Result<Manifest> {
    let doc = Document::new(
        ResourceKind::HyperConverged,
        metadata(
            &settings.capability_name,
            Some(&settings.namespace),
            managed_labels(),
        ),
        Empty::default(),
    );
    manifest(capability_ref(settings), &doc)
}

pub fn capability_ref(settings: &OperatorSettings) -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::HyperConverged,
        &settings.namespace,
        &settings.capability_name,
    )
}

pub fn subscription_ref(settings: &OperatorSettings) -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::Subscription,
        &settings.namespace,
        &settings.subscription,
    )
}

/// Additive JSON patch appending `gate` to the capability's feature-gate list.
///
/// Missing parent objects are created by the patch itself. Returns `None` when
/// the gate is already listed. A parent that is not an object, or a gate field
/// that is not a list, is reported instead of being overwritten.
pub fn feature_gate_patch(current: &Value, gate: &str) -> Result<Option<ResourcePatch>> {
    let mut pointer = String::new();
    let mut node = current;

    for (i, segment) in FEATURE_GATES_PATH.iter().enumerate() {
        if !node.is_object() {
            return Err(unexpected_shape(&pointer, "an object", node));
        }
        pointer.push('/');
        pointer.push_str(segment);
        match node.get(*segment) {
            Some(child) if !child.is_null() => node = child,
            _ => {
                let mut value = json!([gate]);
                for inner in FEATURE_GATES_PATH[i + 1..].iter().rev() {
                    let mut wrapper = serde_json::Map::new();
                    wrapper.insert(inner.to_string(), value);
                    value = Value::Object(wrapper);
                }
                return json_patch_add(&pointer, value).map(Some);
            }
        }
    }

    match node.as_array() {
        Some(gates) if gates.iter().any(|g| g.as_str() == Some(gate)) => Ok(None),
        Some(_) => json_patch_add(&format!("{}/-", pointer), json!(gate)).map(Some),
        None => Err(unexpected_shape(&pointer, "a list", node)),
    }
}

fn unexpected_shape(pointer: &str, expected: &str, found: &Value) -> Error {
    let kind = match found {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    };
    let at = if pointer.is_empty() { "/" } else { pointer };
    Error::QueryFailed {
        resource: format!("HyperConverged field '{}'", at),
        detail: format!("expected {}, found {}; refusing to overwrite it", expected, kind),
    }
}

fn json_patch_add(path: &str, value: Value) -> Result<ResourcePatch> {
    let ops = json!([{ "op": "add", "path": path, "value": value }]);
    Ok(ResourcePatch::Json(serde_json::from_value(ops)?))
}

/// Merge patch forcing one environment variable on the operator subscription.
///
/// Merge patches replace lists wholesale, so every existing entry is carried
/// over. Returns `None` when the variable already has the desired value.
pub fn subscription_env_patch(
    subscription: &Value,
    name: &str,
    value: &str,
) -> Result<Option<ResourcePatch>> {
    let mut env: Vec<EnvVar> = match subscription.pointer("/spec/config/env") {
        Some(list) if !list.is_null() => serde_json::from_value(list.clone())?,
        _ => Vec::new(),
    };

    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) if existing.value.as_deref() == Some(value) => return Ok(None),
        Some(existing) => {
            existing.value = Some(value.to_string());
            existing.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..EnvVar::default()
        }),
    }

    Ok(Some(ResourcePatch::Merge(
        json!({ "spec": { "config": { "env": env } } }),
    )))
}

// --- VirtualMachine ---

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStrategy {
    Always,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineSpec {
    run_strategy: RunStrategy,
    template: InstanceTemplate,
}

#[derive(Serialize)]
struct InstanceTemplate {
    metadata: ObjectMeta,
    spec: InstanceSpec,
}

#[derive(Serialize)]
struct InstanceSpec {
    domain: Domain,
    networks: Vec<Network>,
    volumes: Vec<Volume>,
}

#[derive(Serialize)]
struct Domain {
    cpu: Cpu,
    memory: Memory,
    devices: Devices,
}

#[derive(Serialize)]
struct Cpu {
    cores: u32,
}

#[derive(Serialize)]
struct Memory {
    guest: String,
}

#[derive(Serialize)]
struct Devices {
    disks: Vec<Disk>,
    interfaces: Vec<Interface>,
}

#[derive(Serialize)]
struct Disk {
    name: &'static str,
    disk: DiskTarget,
}

#[derive(Serialize)]
struct DiskTarget {
    bus: &'static str,
}

#[derive(Serialize)]
struct Interface {
    name: &'static str,
    masquerade: Empty,
}

#[derive(Serialize)]
struct Network {
    name: &'static str,
    pod: Empty,
}

#[derive(Serialize)]
struct Volume {
    name: &'static str,
    #[serde(flatten)]
    source: VolumeSource,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum VolumeSource {
    ContainerDisk {
        image: String,
    },
    CloudInitNoCloud {
        #[serde(rename = "userData")]
        user_data: String,
    },
}

#[derive(Serialize)]
struct CloudConfig<'a> {
    user: &'a str,
    password: &'a str,
    chpasswd: Chpasswd,
    ssh_pwauth: bool,
    ssh_authorized_keys: Vec<&'a str>,
}

#[derive(Serialize)]
struct Chpasswd {
    expire: bool,
}

/// `#cloud-config` payload creating the login user with every authorized key.
pub fn cloud_init_user_data(user: &str, password: &str, keys: &[String]) -> Result<String> {
    let config = CloudConfig {
        user,
        password,
        chpasswd: Chpasswd { expire: false },
        ssh_pwauth: true,
        ssh_authorized_keys: keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect(),
    };
    Ok(format!("#cloud-config\n{}", serde_yaml::to_string(&config)?))
}

pub fn vm_ref(settings: &VmSettings, name: &str) -> ResourceRef {
    ResourceRef::namespaced(ResourceKind::VirtualMachine, &settings.namespace, name)
}

pub fn vmi_ref(settings: &VmSettings, name: &str) -> ResourceRef {
    ResourceRef::namespaced(ResourceKind::VirtualMachineInstance, &settings.namespace, name)
}

/// Full VirtualMachine manifest for one fleet member.
pub fn virtual_machine(settings: &VmSettings, name: &str) -> Result<Manifest> {
    let mut labels = managed_labels();
    labels.insert(FLEET_LABEL.to_string(), settings.prefix.clone());
    labels.insert(VM_LABEL.to_string(), name.to_string());
    let template_labels = BTreeMap::from([(VM_LABEL.to_string(), name.to_string())]);

    let user_data = cloud_init_user_data(
        &settings.user,
        &settings.password,
        &settings.ssh_public_keys,
    )?;

    let spec = VirtualMachineSpec {
        run_strategy: RunStrategy::Always,
        template: InstanceTemplate {
            metadata: ObjectMeta {
                labels: Some(template_labels),
                ..ObjectMeta::default()
            },
            spec: InstanceSpec {
                domain: Domain {
                    cpu: Cpu {
                        cores: settings.cpu_cores,
                    },
                    memory: Memory {
                        guest: settings.memory.clone(),
                    },
                    devices: Devices {
                        disks: vec![
                            Disk {
                                name: "containerdisk",
                                disk: DiskTarget { bus: "virtio" },
                            },
                            Disk {
                                name: "cloudinitdisk",
                                disk: DiskTarget { bus: "virtio" },
                            },
                        ],
                        interfaces: vec![Interface {
                            name: "default",
                            masquerade: Empty::default(),
                        }],
                    },
                },
                networks: vec![Network {
                    name: "default",
                    pod: Empty::default(),
                }],
                volumes: vec![
                    Volume {
                        name: "containerdisk",
                        source: VolumeSource::ContainerDisk {
                            image: settings.image.clone(),
                        },
                    },
                    Volume {
                        name: "cloudinitdisk",
                        source: VolumeSource::CloudInitNoCloud { user_data },
                    },
                ],
            },
        },
    };

    let doc = Document::new(
        ResourceKind::VirtualMachine,
        metadata(name, Some(&settings.namespace), labels),
        spec,
    );
    manifest(vm_ref(settings, name), &doc)
}

/// Merge patch switching a VM to always-run; clears the legacy `running` field.
pub fn run_strategy_patch(strategy: RunStrategy) -> Result<ResourcePatch> {
    Ok(ResourcePatch::Merge(json!({
        "spec": { "runStrategy": serde_json::to_value(strategy)?, "running": null }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_settings() -> VmSettings {
        VmSettings {
            prefix: "test".to_string(),
            ssh_public_keys: vec![
                "ssh-ed25519 AAAA one@host".to_string(),
                "ssh-rsa BBBB two@host\n".to_string(),
            ],
            ..VmSettings::default()
        }
    }

    #[test]
    fn test_operator_bundle_order_and_shape() {
        let settings = OperatorSettings::default();
        let bundle = operator_bundle(&settings).unwrap();
        let kinds: Vec<_> = bundle.iter().map(|m| m.target.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Namespace,
                ResourceKind::OperatorGroup,
                ResourceKind::Subscription
            ]
        );

        let ns = &bundle[0].body;
        assert_eq!(ns["apiVersion"], "v1");
        assert_eq!(ns["kind"], "Namespace");
        assert_eq!(ns["metadata"]["name"], "openshift-cnv");

        let sub = &bundle[2].body;
        assert_eq!(sub["apiVersion"], "operators.coreos.com/v1alpha1");
        assert_eq!(sub["spec"]["name"], "community-kubevirt-hyperconverged");
        assert_eq!(sub["spec"]["sourceNamespace"], "openshift-marketplace");
        assert_eq!(sub["spec"]["installPlanApproval"], "Automatic");

        let og = &bundle[1].body;
        assert_eq!(og["spec"]["targetNamespaces"], json!(["openshift-cnv"]));
    }

    #[test]
    fn test_feature_gate_patch_creates_missing_parents() {
        let hco = json!({"spec": {}});
        let patch = feature_gate_patch(&hco, "Sidecar").unwrap().unwrap();
        let ResourcePatch::Json(patch) = patch else {
            panic!("expected a JSON patch");
        };
        let mut doc = hco.clone();
        json_patch::patch(&mut doc, &patch.0).unwrap();
        assert_eq!(
            doc.pointer("/spec/configuration/developerConfiguration/featureGates"),
            Some(&json!(["Sidecar"]))
        );
    }

    #[test]
    fn test_feature_gate_patch_appends_to_existing_list() {
        let hco = json!({"spec": {"configuration": {"developerConfiguration": {"featureGates": ["Snapshot"]}}}});
        let Some(ResourcePatch::Json(patch)) = feature_gate_patch(&hco, "Sidecar").unwrap() else {
            panic!("expected a JSON patch");
        };
        let mut doc = hco.clone();
        json_patch::patch(&mut doc, &patch.0).unwrap();
        assert_eq!(
            doc.pointer("/spec/configuration/developerConfiguration/featureGates"),
            Some(&json!(["Snapshot", "Sidecar"]))
        );
    }

    #[test]
    fn test_feature_gate_patch_skips_present_gate() {
        let hco = json!({"spec": {"configuration": {"developerConfiguration": {"featureGates": ["Sidecar"]}}}});
        assert!(feature_gate_patch(&hco, "Sidecar").unwrap().is_none());
    }

    #[test]
    fn test_feature_gate_patch_refuses_to_replace_a_gate_map() {
        let hco = json!({"spec": {"configuration": {"developerConfiguration": {"featureGates": {"Snapshot": true}}}}});
        let err = feature_gate_patch(&hco, "Sidecar").unwrap_err();
        match err {
            Error::QueryFailed { resource, detail } => {
                assert!(resource.contains("/spec/configuration/developerConfiguration/featureGates"));
                assert!(detail.contains("expected a list, found an object"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_feature_gate_patch_refuses_a_scalar_parent() {
        let hco = json!({"spec": {"configuration": "managed-elsewhere"}});
        let err = feature_gate_patch(&hco, "Sidecar").unwrap_err();
        assert!(matches!(err, Error::QueryFailed { .. }));
        assert!(err.to_string().contains("found a string"));
    }

    #[test]
    fn test_subscription_env_patch() {
        let sub = json!({"spec": {"config": {"env": [{"name": "OTHER", "value": "1"}]}}});
        let Some(ResourcePatch::Merge(patch)) =
            subscription_env_patch(&sub, "KVM_EMULATION", "true").unwrap()
        else {
            panic!("expected a merge patch");
        };
        assert_eq!(
            patch,
            json!({"spec": {"config": {"env": [
                {"name": "OTHER", "value": "1"},
                {"name": "KVM_EMULATION", "value": "true"}
            ]}}})
        );

        let sub = json!({"spec": {"config": {"env": [{"name": "KVM_EMULATION", "value": "true"}]}}});
        assert!(subscription_env_patch(&sub, "KVM_EMULATION", "true")
            .unwrap()
            .is_none());

        let sub = json!({"spec": {"config": {"env": [{"name": "KVM_EMULATION", "value": "false"}]}}});
        assert!(subscription_env_patch(&sub, "KVM_EMULATION", "true")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_virtual_machine_manifest() {
        let settings = vm_settings();
        let vm = virtual_machine(&settings, "test-2").unwrap();
        assert_eq!(vm.target, vm_ref(&settings, "test-2"));

        let body = &vm.body;
        assert_eq!(body["apiVersion"], "kubevirt.io/v1");
        assert_eq!(body["kind"], "VirtualMachine");
        assert_eq!(body["metadata"]["namespace"], "default");
        assert_eq!(body["metadata"]["labels"][FLEET_LABEL], "test");
        assert_eq!(body["spec"]["runStrategy"], "Always");

        let template = &body["spec"]["template"];
        assert_eq!(template["metadata"]["labels"][VM_LABEL], "test-2");
        assert_eq!(template["spec"]["domain"]["cpu"]["cores"], 1);
        assert_eq!(template["spec"]["domain"]["memory"]["guest"], "2Gi");
        assert_eq!(template["spec"]["domain"]["devices"]["interfaces"][0]["masquerade"], json!({}));
        assert_eq!(template["spec"]["networks"][0]["pod"], json!({}));
        assert_eq!(
            template["spec"]["volumes"][0]["containerDisk"]["image"],
            crate::config::DEFAULT_VM_IMAGE
        );

        let user_data = template["spec"]["volumes"][1]["cloudInitNoCloud"]["userData"]
            .as_str()
            .unwrap();
        assert!(user_data.starts_with("#cloud-config\n"));
    }

    #[test]
    fn test_cloud_init_lists_every_key() {
        let settings = vm_settings();
        let user_data =
            cloud_init_user_data("fedora", "secret", &settings.ssh_public_keys).unwrap();
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(user_data.trim_start_matches("#cloud-config\n")).unwrap();
        assert_eq!(parsed["user"], "fedora");
        assert_eq!(parsed["password"], "secret");
        assert_eq!(parsed["chpasswd"]["expire"], false);
        let keys = parsed["ssh_authorized_keys"].as_sequence().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1], "ssh-rsa BBBB two@host");
    }

    #[test]
    fn test_run_strategy_patch() {
        let patch = run_strategy_patch(RunStrategy::Always).unwrap();
        assert_eq!(
            patch,
            ResourcePatch::Merge(json!({"spec": {"runStrategy": "Always", "running": null}}))
        );
    }
}
