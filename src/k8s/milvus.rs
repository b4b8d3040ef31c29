//! Milvus custom resource access via Kubernetes Dynamic API.
//!
//! Uses the `milvus.io/v1beta1` Milvus CRD. The raw document is kept next to
//! the typed fields so that whole-object updates never drop fields this tool
//! does not model.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::Api;
use kube::api::{ApiResource, DynamicObject, PostParams};
use serde_json::{Map, Value};
use tracing::debug;

use super::handle::{ClusterResourceHandle, ResourceError};

pub const MILVUS_GROUP: &str = "milvus.io";
pub const MILVUS_VERSION: &str = "v1beta1";

/// Marker annotation stamped before the version patch to force a reconcile.
pub const RECONCILE_ANNOTATION: &str = "milvus-upgrade.io/reconcile-requested";

/// Annotation holding `<holder>@<rfc3339>` while an upgrade is being applied.
pub const LOCK_ANNOTATION: &str = "milvus-upgrade.io/upgrade-lock";

const IMAGE_PATH: &[&str] = &["spec", "components", "image"];
const ROLLING_UPDATE_PATH: &[&str] = &["spec", "components", "enableRollingUpdate"];
const IMAGE_UPDATE_MODE_PATH: &[&str] = &["spec", "components", "imageUpdateMode"];
const PULSAR_TAG_PATH: &[&str] = &[
    "spec",
    "dependencies",
    "pulsar",
    "inCluster",
    "values",
    "images",
    "broker",
    "tag",
];
const ETCD_TAG_PATH: &[&str] = &[
    "spec",
    "dependencies",
    "etcd",
    "inCluster",
    "values",
    "image",
    "tag",
];

/// ApiResource definition for the `milvus.io` Milvus CRD.
pub fn milvus_api_resource() -> ApiResource {
    ApiResource {
        group: MILVUS_GROUP.to_string(),
        version: MILVUS_VERSION.to_string(),
        api_version: format!("{}/{}", MILVUS_GROUP, MILVUS_VERSION),
        kind: "Milvus".to_string(),
        plural: "milvuses".to_string(),
    }
}

/// Fields under `spec.components` that the upgrade writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Components {
    pub image: Option<String>,
    pub enable_rolling_update: Option<bool>,
    pub image_update_mode: Option<String>,
}

/// Dependency version tags as stored in the in-cluster Helm values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyTags {
    pub pulsar: Option<String>,
    pub etcd: Option<String>,
}

/// Typed view of one Milvus resource.
#[derive(Debug, Clone)]
pub struct MilvusResource {
    pub name: String,
    pub resource_version: Option<String>,
    pub annotations: BTreeMap<String, String>,
    pub components: Components,
    /// Read-only; never written back.
    pub dependencies: DependencyTags,
    raw: DynamicObject,
}

impl MilvusResource {
    /// Build the typed view from a dynamic object returned by the API server.
    pub fn from_dynamic(obj: DynamicObject) -> Self {
        let data = &obj.data;

        let components = Components {
            image: string_at(data, IMAGE_PATH),
            enable_rolling_update: value_at(data, ROLLING_UPDATE_PATH).and_then(Value::as_bool),
            image_update_mode: string_at(data, IMAGE_UPDATE_MODE_PATH),
        };
        let dependencies = DependencyTags {
            pulsar: string_at(data, PULSAR_TAG_PATH),
            etcd: string_at(data, ETCD_TAG_PATH),
        };

        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            resource_version: obj.metadata.resource_version.clone(),
            annotations: obj.metadata.annotations.clone().unwrap_or_default(),
            components,
            dependencies,
            raw: obj,
        }
    }

    /// Build a resource from its name, namespace and raw `spec`/`status` document.
    #[cfg(test)]
    pub fn from_document(name: &str, namespace: &str, data: Value) -> Self {
        let obj = DynamicObject::new(name, &milvus_api_resource())
            .within(namespace)
            .data(data);
        Self::from_dynamic(obj)
    }

    /// Render the typed fields back onto the preserved raw document.
    pub fn to_dynamic(&self) -> DynamicObject {
        let mut obj = self.raw.clone();
        obj.metadata.resource_version = self.resource_version.clone();
        obj.metadata.annotations = if self.annotations.is_empty() {
            None
        } else {
            Some(self.annotations.clone())
        };

        if let Some(image) = &self.components.image {
            set_path(&mut obj.data, IMAGE_PATH, Value::from(image.as_str()));
        }
        if let Some(enabled) = self.components.enable_rolling_update {
            set_path(&mut obj.data, ROLLING_UPDATE_PATH, Value::from(enabled));
        }
        if let Some(mode) = &self.components.image_update_mode {
            set_path(&mut obj.data, IMAGE_UPDATE_MODE_PATH, Value::from(mode.as_str()));
        }

        obj
    }
}

fn value_at<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(data, |current, key| current.get(*key))
}

/// A string at `path`; absent or non-string values yield `None`.
fn string_at(data: &Value, path: &[&str]) -> Option<String> {
    value_at(data, path)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Set `path` to `new_value`, creating intermediate objects as needed.
fn set_path(root: &mut Value, path: &[&str], new_value: Value) {
    let mut current = root;
    for key in path {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(key.to_string()).or_insert(Value::Null),
            _ => return,
        };
    }
    *current = new_value;
}

/// [`ClusterResourceHandle`] backed by a live kube client.
#[derive(Clone)]
pub struct KubeMilvusHandle {
    client: kube::Client,
    api_resource: ApiResource,
}

impl KubeMilvusHandle {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            api_resource: milvus_api_resource(),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.api_resource)
    }
}

#[async_trait]
impl ClusterResourceHandle for KubeMilvusHandle {
    async fn get(&self, namespace: &str, name: &str) -> Result<MilvusResource, ResourceError> {
        debug!("Fetching Milvus {}/{}", namespace, name);
        let obj = self.api(namespace).get(name).await.map_err(map_kube_error)?;
        Ok(MilvusResource::from_dynamic(obj))
    }

    async fn update(
        &self,
        namespace: &str,
        resource: &MilvusResource,
    ) -> Result<MilvusResource, ResourceError> {
        debug!(
            "Replacing Milvus {}/{} (resourceVersion: {:?})",
            namespace, resource.name, resource.resource_version
        );
        let obj = self
            .api(namespace)
            .replace(&resource.name, &PostParams::default(), &resource.to_dynamic())
            .await
            .map_err(map_kube_error)?;
        Ok(MilvusResource::from_dynamic(obj))
    }
}

/// Translate kube client errors into handle outcomes.
fn map_kube_error(err: kube::Error) -> ResourceError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ResourceError::NotFound,
        kube::Error::Api(resp) if resp.code == 409 => ResourceError::Conflict(resp.message),
        other => ResourceError::Transport(other.to_string()),
    }
}
