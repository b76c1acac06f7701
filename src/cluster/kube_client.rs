/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/cluster/kube_client.rs
*
* Production `ResourceClient` backed by `kube-rs`. Every kind is reached
* through `Api<DynamicObject>` with a static `ApiResource`, so the tool works
* against clusters whose CRDs are not compiled in. Apply is server-side apply
* under a fixed field manager, which makes re-applying identical manifests a
* no-op on the server.
*
* SPDX-License-Identifier: Apache-2.0 */

use super::{Manifest, ResourceClient, ResourcePatch, ResourceRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DynamicObject, Patch, PatchParams},
    Client, Config,
};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

const FIELD_MANAGER: &str = "virt-fleet";

pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Loads the given kubeconfig, or infers one (in-cluster, `KUBECONFIG`, ~/.kube/config).
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                    Error::PrereqMissing(format!(
                        "cannot read kubeconfig '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                    .await
                    .map_err(|e| Error::PrereqMissing(format!("invalid kubeconfig: {}", e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::PrereqMissing(format!("no cluster configuration found: {}", e)))?,
        };
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn api(&self, target: &ResourceRef) -> Api<DynamicObject> {
        let ar = target.kind.api_resource();
        match &target.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn server_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::PrereqMissing(format!("cluster API is unreachable: {}", e)))?;
        Ok(info.git_version)
    }

    async fn apply(&self, manifests: &[Manifest]) -> Result<()> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        for manifest in manifests {
            let api = self.api(&manifest.target);
            api.patch(&manifest.target.name, &params, &Patch::Apply(&manifest.body))
                .await
                .map_err(|source| Error::ApplyFailed {
                    resource: manifest.target.to_string(),
                    source,
                })?;
            info!(resource = %manifest.target, "Applied");
        }
        Ok(())
    }

    async fn get(&self, target: &ResourceRef) -> Result<Option<Value>> {
        let object = self.api(target).get_opt(&target.name).await.map_err(|e| {
            Error::QueryFailed {
                resource: target.to_string(),
                detail: e.to_string(),
            }
        })?;
        debug!(resource = %target, found = object.is_some(), "Fetched");
        object.map(serde_json::to_value).transpose().map_err(Error::from)
    }

    async fn patch(&self, target: &ResourceRef, patch: &ResourcePatch) -> Result<()> {
        let api = self.api(target);
        let params = PatchParams::default();
        let result = match patch {
            ResourcePatch::Merge(value) => api.patch(&target.name, &params, &Patch::Merge(value)).await,
            ResourcePatch::Json(ops) => {
                api.patch(&target.name, &params, &Patch::<()>::Json(ops.clone()))
                    .await
            }
        };
        result.map_err(|source| Error::PatchFailed {
            resource: target.to_string(),
            source,
        })?;
        info!(resource = %target, "Patched");
        Ok(())
    }
}
