//! Fixtures shared by the unit tests of this crate.
use crate::{Result, WorkloadHooks};
use async_trait::async_trait;
use kube::{
    core::{ApiResource, DynamicObject, GroupVersionKind},
    CustomResource,
};
use opkit_core::{Workload, WorkloadStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "apps.example.io",
    version = "v1alpha1",
    kind = "WebStore",
    namespaced,
    status = "WorkloadStatus",
    schema = "disabled"
)]
pub struct WebStoreSpec {
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Workload for WebStore {
    fn workload_status(&self) -> Option<&WorkloadStatus> {
        self.status.as_ref()
    }

    fn workload_status_mut(&mut self) -> &mut WorkloadStatus {
        self.status.get_or_insert_with(WorkloadStatus::default)
    }

    fn dependencies(&self) -> Vec<GroupVersionKind> {
        self.spec
            .depends_on
            .iter()
            .map(|kind| GroupVersionKind::gvk("apps.example.io", "v1alpha1", kind))
            .collect()
    }
}

/// An unsaved workload in namespace `shop` with a uid, as read from the apiserver
pub fn webstore() -> WebStore {
    let mut store = WebStore::new("shop", WebStoreSpec {
        replicas: 1,
        depends_on: vec![],
    });
    store.metadata.namespace = Some("shop".into());
    store.metadata.uid = Some("0e5e9d8a-7b5e-4f5e-9d8a-7b5e4f5e9d8a".into());
    store
}

pub fn config_map(name: &str, port: &str) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
    let mut cm = DynamicObject::new(name, &ar).within("shop");
    cm.data = json!({ "data": { "port": port } });
    cm
}

/// A deployment without status, which is never ready
pub fn deployment(name: &str) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
    let mut deploy = DynamicObject::new(name, &ar).within("shop");
    deploy.data = json!({
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": { "metadata": { "labels": { "app": name } } }
        }
    });
    deploy
}

pub fn namespace(name: &str, phase: &str) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Namespace"));
    let mut ns = DynamicObject::new(name, &ar);
    ns.data = json!({ "status": { "phase": phase } });
    ns
}

/// Hooks returning a fixed list of children
#[derive(Default)]
pub struct StaticHooks {
    pub children: Vec<DynamicObject>,
    pub not_ready: bool,
    pub fail_with: Option<String>,
    pub ready_error: Option<String>,
}

impl StaticHooks {
    pub fn new(children: Vec<DynamicObject>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }
}

#[async_trait]
impl WorkloadHooks<WebStore> for StaticHooks {
    async fn desired_resources(&self, _workload: &WebStore) -> Result<Vec<DynamicObject>> {
        if let Some(msg) = &self.fail_with {
            return Err(crate::Error::hook(msg));
        }
        Ok(self.children.clone())
    }

    async fn check_ready(&self, _workload: &WebStore) -> Result<bool> {
        match &self.ready_error {
            Some(msg) => Err(crate::Error::hook(msg)),
            None => Ok(!self.not_ready),
        }
    }
}
