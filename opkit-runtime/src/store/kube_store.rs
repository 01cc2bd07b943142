//! An [`ObjectStore`] backed by the Kubernetes api through dynamic [`Api`] handles.
use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    core::{
        discovery::{ApiCapabilities, Scope},
        ApiResource, DynamicObject, GroupVersionKind, ResourceExt,
    },
    discovery, Client,
};
use opkit_core::{identity::gvk_of, ObjectKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

#[derive(Clone, Debug)]
struct Kind {
    resource: ApiResource,
    namespaced: bool,
}

/// An [`ObjectStore`] backed by the Kubernetes api
///
/// The api resource of every kind is discovered on first use and cached for the
/// lifetime of the store. Kinds known up front can be seeded with [`KubeStore::with_kind`]
/// to skip discovery.
pub struct KubeStore {
    client: Client,
    kinds: RwLock<HashMap<GroupVersionKind, Kind>>,
}

impl KubeStore {
    /// Create a store on top of a client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the discovery cache with a known kind
    #[must_use]
    pub fn with_kind(self, gvk: GroupVersionKind, resource: ApiResource, namespaced: bool) -> Self {
        self.kinds.write().insert(gvk, Kind { resource, namespaced });
        self
    }

    async fn kind(&self, gvk: &GroupVersionKind) -> Result<Kind, StoreError> {
        let cached = self.kinds.read().get(gvk).cloned();
        if let Some(kind) = cached {
            return Ok(kind);
        }
        trace!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, "discovering api resource");
        let (resource, caps): (ApiResource, ApiCapabilities) = discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|source| StoreError::Discovery {
                kind: gvk.kind.clone(),
                source,
            })?;
        let kind = Kind {
            resource,
            namespaced: caps.scope == Scope::Namespaced,
        };
        self.kinds.write().insert(gvk.clone(), kind.clone());
        Ok(kind)
    }

    fn api(&self, kind: &Kind, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(self.client.clone(), ns, &kind.resource),
            _ => Api::all_with(self.client.clone(), &kind.resource),
        }
    }

    async fn api_for(&self, obj: &DynamicObject) -> Result<Api<DynamicObject>, StoreError> {
        let gvk = gvk_of(obj).map_err(|e| StoreError::Other(e.to_string()))?;
        let kind = self.kind(&gvk).await?;
        Ok(self.api(&kind, obj.namespace().as_deref()))
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        let kind = self.kind(&key.gvk).await?;
        Ok(self.api(&kind, key.namespace.as_deref()).get_opt(&key.name).await?)
    }

    async fn list(&self, gvk: &GroupVersionKind) -> Result<Vec<DynamicObject>, StoreError> {
        let kind = self.kind(gvk).await?;
        let list = Api::<DynamicObject>::all_with(self.client.clone(), &kind.resource)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject, StoreError> {
        let pp = PostParams {
            field_manager: Some(field_manager.to_string()),
            ..PostParams::default()
        };
        Ok(self.api_for(obj).await?.create(&pp, obj).await?)
    }

    async fn patch(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject, StoreError> {
        let pp = PatchParams {
            field_manager: Some(field_manager.to_string()),
            ..PatchParams::default()
        };
        let api = self.api_for(obj).await?;
        Ok(api.patch(&obj.name_any(), &pp, &Patch::Merge(obj)).await?)
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let api = self.api_for(obj).await?;
        Ok(api.replace(&obj.name_any(), &PostParams::default(), obj).await?)
    }

    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let api = self.api_for(obj).await?;
        let data = serde_json::to_vec(obj)?;
        Ok(api.replace_status(&obj.name_any(), &PostParams::default(), data).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Request, Response};
    use kube::client::Body;
    use serde_json::json;

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    fn config_map_gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "ConfigMap")
    }

    fn testcontext() -> (KubeStore, ApiServerHandle) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let gvk = config_map_gvk();
        let store = KubeStore::new(client).with_kind(gvk.clone(), ApiResource::from_gvk(&gvk), true);
        (store, handle)
    }

    fn status_response(code: u16, reason: &str, message: &str) -> Response<Body> {
        let body = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code
        });
        Response::builder()
            .status(code)
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn config_map() -> DynamicObject {
        let mut cm = DynamicObject::new("web", &ApiResource::from_gvk(&config_map_gvk())).within("shop");
        cm.metadata.resource_version = Some("41".into());
        cm.data = json!({ "data": { "port": "8080" } });
        cm
    }

    #[tokio::test]
    async fn not_found_is_none() {
        let (store, mut handle) = testcontext();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(request.uri().path(), "/api/v1/namespaces/shop/configmaps/web");
            send.send_response(status_response(404, "NotFound", "configmaps \"web\" not found"));
        });

        let key = ObjectKey::new(config_map_gvk(), Some("shop"), "web");
        assert!(store.get(&key).await.unwrap().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stale_writes_are_conflicts() {
        let (store, mut handle) = testcontext();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PUT);
            send.send_response(status_response(
                409,
                "Conflict",
                "Operation cannot be fulfilled on configmaps \"web\": the object has been modified; please apply your changes to the latest version and try again",
            ));
        });

        let err = store.replace(&config_map()).await.unwrap_err();
        assert!(err.is_conflict(), "unexpected error {err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn other_api_errors_are_not_conflicts() {
        let (store, mut handle) = testcontext();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(
                request.headers().get("content-type").unwrap(),
                "application/merge-patch+json"
            );
            assert!(request.uri().query().unwrap_or_default().contains("fieldManager=opkit"));
            send.send_response(status_response(403, "Forbidden", "configmaps \"web\" is forbidden"));
        });

        let err = store.patch(&config_map(), "opkit").await.unwrap_err();
        assert!(matches!(err, StoreError::Api(_)));
        assert!(!err.is_conflict());
        server.await.unwrap();
    }
}
