/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/cluster/mod.rs
*
* The resource client seam. Workflow components talk to the cluster only
* through the `ResourceClient` trait: declarative apply, typed get, and patch.
* `KubeResourceClient` is the production implementation; tests substitute an
* in-memory store.
*
* SPDX-License-Identifier: Apache-2.0 */

pub mod kube_client;
pub mod manifests;
pub mod status;

pub use kube_client::KubeResourceClient;

use crate::error::Result;
use async_trait::async_trait;
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::Value;
use std::fmt;

/// Every resource kind the tool reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    OperatorGroup,
    Subscription,
    ClusterServiceVersion,
    CatalogSource,
    HyperConverged,
    VirtualMachine,
    VirtualMachineInstance,
}

impl ResourceKind {
    /// (group, version, kind, plural)
    fn gvkp(self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            ResourceKind::Namespace => ("", "v1", "Namespace", "namespaces"),
            ResourceKind::OperatorGroup => {
                ("operators.coreos.com", "v1", "OperatorGroup", "operatorgroups")
            }
            ResourceKind::Subscription => {
                ("operators.coreos.com", "v1alpha1", "Subscription", "subscriptions")
            }
            ResourceKind::ClusterServiceVersion => (
                "operators.coreos.com",
                "v1alpha1",
                "ClusterServiceVersion",
                "clusterserviceversions",
            ),
            ResourceKind::CatalogSource => {
                ("operators.coreos.com", "v1alpha1", "CatalogSource", "catalogsources")
            }
            ResourceKind::HyperConverged => {
                ("hco.kubevirt.io", "v1beta1", "HyperConverged", "hyperconvergeds")
            }
            ResourceKind::VirtualMachine => {
                ("kubevirt.io", "v1", "VirtualMachine", "virtualmachines")
            }
            ResourceKind::VirtualMachineInstance => (
                "kubevirt.io",
                "v1",
                "VirtualMachineInstance",
                "virtualmachineinstances",
            ),
        }
    }

    pub fn kind(self) -> &'static str {
        self.gvkp().2
    }

    /// `apiVersion` as written in manifests.
    pub fn api_version(self) -> String {
        let (group, version, _, _) = self.gvkp();
        if group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{}", group, version)
        }
    }

    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::Namespace)
    }

    /// Static descriptor used to build dynamic `Api` handles without discovery.
    pub fn api_resource(self) -> ApiResource {
        let (group, version, kind, plural) = self.gvkp();
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of one resource in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: if kind.is_namespaced() {
                namespace.map(str::to_string)
            } else {
                None
            },
            name: name.to_string(),
        }
    }

    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self::new(kind, Some(namespace), name)
    }

    pub fn cluster(kind: ResourceKind, name: &str) -> Self {
        Self::new(kind, None, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A fully rendered document ready for declarative apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub target: ResourceRef,
    pub body: Value,
}

/// A mutation of an existing resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePatch {
    /// RFC 7386 merge patch.
    Merge(Value),
    /// RFC 6902 JSON patch.
    Json(json_patch::Patch),
}

/// Declarative access to the remote cluster resource store.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Returns the API server version; fails if the cluster is unreachable.
    async fn server_version(&self) -> Result<String>;

    /// Applies every manifest; re-applying identical manifests is a no-op.
    async fn apply(&self, manifests: &[Manifest]) -> Result<()>;

    /// Fetches a resource as JSON, `Ok(None)` when it does not exist.
    async fn get(&self, target: &ResourceRef) -> Result<Option<Value>>;

    async fn patch(&self, target: &ResourceRef, patch: &ResourcePatch) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_versions() {
        assert_eq!(ResourceKind::Namespace.api_version(), "v1");
        assert_eq!(ResourceKind::VirtualMachine.api_version(), "kubevirt.io/v1");
        assert_eq!(
            ResourceKind::Subscription.api_version(),
            "operators.coreos.com/v1alpha1"
        );
    }

    #[test]
    fn test_api_resource_plural() {
        let ar = ResourceKind::VirtualMachineInstance.api_resource();
        assert_eq!(ar.plural, "virtualmachineinstances");
        assert_eq!(ar.group, "kubevirt.io");
        assert_eq!(ar.kind, "VirtualMachineInstance");
    }

    #[test]
    fn test_namespace_dropped_for_cluster_scoped() {
        let r = ResourceRef::new(ResourceKind::Namespace, Some("ignored"), "openshift-cnv");
        assert_eq!(r.namespace, None);
        assert_eq!(r.to_string(), "Namespace openshift-cnv");

        let r = ResourceRef::namespaced(ResourceKind::VirtualMachine, "default", "vm-1");
        assert_eq!(r.to_string(), "VirtualMachine default/vm-1");
    }
}
