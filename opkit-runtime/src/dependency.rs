//! Whether the workloads a workload depends on are in place.
use crate::{
    context::{Context, Request},
    Error, Result,
};
use kube::core::{GroupVersionKind, ResourceExt};
use opkit_core::Workload;
use serde_json::Value;
use tracing::trace;

/// Whether every dependency of the workload is satisfied
///
/// A dependency kind is satisfied when exactly one instance of it exists and that
/// instance reports `status.created: true`. No instance, or more than one, leaves the
/// dependency unsatisfied without an error. Once a workload has recorded its
/// dependencies as satisfied they are not checked again.
///
/// # Errors
///
/// Fails when listing a dependency kind fails, or when `status.created` of the
/// single instance holds something other than a bool.
pub async fn satisfied<W: Workload>(ctx: &Context<W>, req: &Request<W>) -> Result<bool> {
    if req.workload.dependency_status() {
        return Ok(true);
    }
    for gvk in req.workload.dependencies() {
        if !dependency_satisfied(ctx, req, &gvk).await? {
            trace!(dependency = %gvk.kind, workload = %req.display_name(), "dependency not satisfied");
            return Ok(false);
        }
    }
    Ok(true)
}

async fn dependency_satisfied<W: Workload>(
    ctx: &Context<W>,
    req: &Request<W>,
    gvk: &GroupVersionKind,
) -> Result<bool> {
    let instances = req.run(ctx.store().list(gvk)).await?;
    let [instance] = instances.as_slice() else {
        return Ok(false);
    };
    match instance.data.pointer("/status/created") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(created)) => Ok(*created),
        Some(_) => Err(Error::DependencyStatus {
            kind: gvk.kind.clone(),
            name: instance.name_any(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        testing::{webstore, StaticHooks, WebStore},
    };
    use kube::core::{ApiResource, DynamicObject};
    use serde_json::json;

    fn database(name: &str, status: Value) -> DynamicObject {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("apps.example.io", "v1alpha1", "Database"));
        let mut db = DynamicObject::new(name, &ar).within("shop");
        db.data = json!({ "status": status });
        db
    }

    fn request() -> Request<WebStore> {
        let mut workload = webstore();
        workload.spec.depends_on = vec!["Database".into()];
        Request::new(workload)
    }

    #[tokio::test]
    async fn missing_dependencies_are_unsatisfied() {
        let ctx = Context::new(MemoryStore::new(), StaticHooks::default());
        assert!(!satisfied(&ctx, &request()).await.unwrap());
    }

    #[tokio::test]
    async fn ambiguous_dependencies_are_unsatisfied() {
        let store = MemoryStore::new();
        store.insert(database("orders", json!({ "created": true }))).unwrap();
        store.insert(database("billing", json!({ "created": true }))).unwrap();
        let ctx = Context::new(store, StaticHooks::default());
        assert!(!satisfied(&ctx, &request()).await.unwrap());
    }

    #[tokio::test]
    async fn single_created_dependency_is_satisfied() {
        let store = MemoryStore::new();
        store.insert(database("orders", json!({ "created": false }))).unwrap();
        let ctx = Context::new(store.clone(), StaticHooks::default());
        assert!(!satisfied(&ctx, &request()).await.unwrap());

        store.insert(database("orders", json!({ "created": true }))).unwrap();
        assert!(satisfied(&ctx, &request()).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_created_flag_is_an_error() {
        let store = MemoryStore::new();
        store.insert(database("orders", json!({ "created": "yes" }))).unwrap();
        let ctx = Context::new(store, StaticHooks::default());
        let err = satisfied(&ctx, &request()).await.unwrap_err();
        assert!(matches!(err, Error::DependencyStatus { name, .. } if name == "orders"));
    }

    #[tokio::test]
    async fn cached_flag_skips_the_lookup() {
        let ctx = Context::new(MemoryStore::new(), StaticHooks::default());
        let mut req = request();
        req.workload.set_dependency_status(true);
        assert!(satisfied(&ctx, &req).await.unwrap());
    }
}
