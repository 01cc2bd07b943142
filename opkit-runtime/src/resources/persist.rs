//! Writing child resources to the cluster.
//!
//! All writes carry the configured field manager. Children are created as is and
//! updated through a json merge patch, and only when the live object has drifted
//! from the desired one.
use crate::{
    context::{Context, Request},
    events::ResourceEvent,
    Error, Result,
};
use kube::core::{DynamicObject, ResourceExt};
use opkit_core::{
    identity::{gvk_of, message_for},
    ObjectKey, Workload,
};
use tracing::{debug, info, trace};

/// What [`create_or_update`] did to a child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Persisted {
    /// The child did not exist and was created
    Created,
    /// The child had drifted and was patched
    Updated,
    /// The child already matched its desired state
    Unchanged,
}

/// Fetch the live copy of a desired child
///
/// # Errors
///
/// Store errors other than not found, which is `Ok(None)`.
pub async fn get<W: Workload>(
    ctx: &Context<W>,
    req: &Request<W>,
    desired: &DynamicObject,
) -> Result<Option<DynamicObject>> {
    let key = ObjectKey::from_object(desired)?;
    req.run(ctx.store().get(&key))
        .await
        .map_err(|err| Error::resource("unable to get resource", message_for(desired), err))
}

/// Create a child
///
/// # Errors
///
/// Store errors, wrapped with the name of the child.
pub async fn create<W: Workload>(ctx: &Context<W>, req: &Request<W>, obj: &DynamicObject) -> Result<DynamicObject> {
    let gvk = gvk_of(obj)?;
    info!(
        kind = %gvk.kind,
        name = %obj.name_any(),
        namespace = obj.namespace().unwrap_or_default(),
        "creating resource"
    );
    req.run(ctx.store().create(obj, &ctx.config().field_manager))
        .await
        .map_err(|err| Error::resource("unable to create resource", message_for(obj), err))
}

/// Whether `actual` has to be patched to reach `desired`
///
/// Equality is checked first so that kinds which are never updated stay quiet when
/// they match anyway. CustomResourceDefinitions are never updated, and anything else
/// is left to the [`DriftPolicy`](crate::DriftPolicy) of the context.
///
/// # Errors
///
/// Fails when the two objects cannot be compared, e.g. when their kinds differ.
pub fn needs_update<W: Workload>(ctx: &Context<W>, desired: &DynamicObject, actual: &DynamicObject) -> Result<bool> {
    if opkit_core::are_equal(desired, actual)? {
        return Ok(false);
    }

    let gvk = gvk_of(desired)?;
    if gvk.kind == "CustomResourceDefinition" {
        debug!(name = %desired.name_any(), "skipping update of CustomResourceDefinition");
        trace!(
            name = %desired.name_any(),
            "if updates are desired, consider re-deploying the parent resource or generating a new api version with the desired changes"
        );
        return Ok(false);
    }

    Ok(!ctx.drift().is_desired(desired, actual)?)
}

/// Patch a child when it has drifted from its desired state
///
/// Returns whether a patch was sent.
///
/// # Errors
///
/// Comparison and store errors, wrapped with the name of the child.
pub async fn update<W: Workload>(
    ctx: &Context<W>,
    req: &Request<W>,
    desired: &DynamicObject,
    actual: &DynamicObject,
) -> Result<bool> {
    if !needs_update(ctx, desired, actual)? {
        return Ok(false);
    }

    let gvk = gvk_of(actual)?;
    info!(
        kind = %gvk.kind,
        name = %actual.name_any(),
        namespace = actual.namespace().unwrap_or_default(),
        "updating resource"
    );
    req.run(ctx.store().patch(desired, &ctx.config().field_manager))
        .await
        .map_err(|err| Error::resource("unable to update resource", message_for(desired), err))?;
    Ok(true)
}

/// Make the cluster hold `desired`, owned by the workload of the request
///
/// The child gets a controller owner reference to the workload before anything is
/// written. New children are announced with a `Created` event and their kind is
/// handed to the watch registrar; patched children get an `Updated` event.
///
/// # Errors
///
/// Fails when the workload has no uid yet, and on any store or comparison error.
pub async fn create_or_update<W: Workload>(
    ctx: &Context<W>,
    req: &Request<W>,
    desired: &DynamicObject,
) -> Result<Persisted> {
    let mut desired = desired.clone();
    set_controller_reference(&req.workload, &mut desired)?;

    let Some(actual) = get(ctx, req, &desired).await? else {
        create(ctx, req, &desired).await?;
        publish(ctx, req, ResourceEvent::Created, &desired).await;
        ctx.watches().ensure(&gvk_of(&desired)?).await?;
        return Ok(Persisted::Created);
    };

    ensure_not_controlled_elsewhere(&req.workload, &actual)?;
    if update(ctx, req, &desired, &actual).await? {
        publish(ctx, req, ResourceEvent::Updated, &desired).await;
        Ok(Persisted::Updated)
    } else {
        Ok(Persisted::Unchanged)
    }
}

async fn publish<W: Workload>(ctx: &Context<W>, req: &Request<W>, event: ResourceEvent, child: &DynamicObject) {
    let event = event.for_child(child, &req.display_name());
    ctx.events().publish(&req.object_ref(), event).await;
}

/// Point `child` at `owner` as its controller
///
/// An existing reference to the same owner is replaced, other owner references are
/// kept.
///
/// # Errors
///
/// [`Error::AlreadyOwned`] when another owner already controls `child`.
fn set_controller_reference<W: Workload>(owner: &W, child: &mut DynamicObject) -> Result<()> {
    let mut reference = owner
        .controller_owner_ref(&())
        .ok_or_else(|| Error::OwnerReference(message_for(child)))?;
    reference.block_owner_deletion = Some(true);

    ensure_not_controlled_elsewhere(owner, child)?;
    let references = child.owner_references_mut();
    references.retain(|r| r.uid != reference.uid);
    references.push(reference);
    Ok(())
}

fn ensure_not_controlled_elsewhere<W: Workload>(owner: &W, child: &DynamicObject) -> Result<()> {
    let uid = owner.meta().uid.as_deref();
    match child
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true) && Some(r.uid.as_str()) != uid)
    {
        Some(other) => Err(Error::AlreadyOwned {
            object: message_for(child),
            owner: format!("{}/{}", other.kind, other.name),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::RecordingEventPublisher,
        store::{MemoryStore, ObjectStore},
        testing::{config_map, webstore, StaticHooks},
        watch::ChannelWatchRegistrar,
    };
    use futures::StreamExt;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::core::{ApiResource, GroupVersionKind};
    use serde_json::json;
    use std::sync::Arc;

    fn config_map_gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "ConfigMap")
    }

    #[tokio::test]
    async fn creates_missing_children_with_owner() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEventPublisher::default());
        let (registrar, mut watched) = ChannelWatchRegistrar::channel();
        let ctx = Context::new(store.clone(), StaticHooks::default())
            .with_events(events.clone())
            .with_watches(registrar);
        let req = Request::new(webstore());

        let outcome = create_or_update(&ctx, &req, &config_map("web", "8080")).await.unwrap();
        assert_eq!(outcome, Persisted::Created);

        let created = store.lookup(&config_map_gvk(), Some("shop"), "web").unwrap();
        let owners = created.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "WebStore");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(owners[0].block_owner_deletion, Some(true));

        assert_eq!(events.events()[0].reason, "Created");
        assert_eq!(watched.next().await, Some(config_map_gvk()));
    }

    #[tokio::test]
    async fn patches_only_drifted_children() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEventPublisher::default());
        let ctx = Context::new(store.clone(), StaticHooks::default()).with_events(events.clone());
        let req = Request::new(webstore());

        create_or_update(&ctx, &req, &config_map("web", "8080")).await.unwrap();
        let again = create_or_update(&ctx, &req, &config_map("web", "8080")).await.unwrap();
        assert_eq!(again, Persisted::Unchanged);

        let changed = create_or_update(&ctx, &req, &config_map("web", "9090")).await.unwrap();
        assert_eq!(changed, Persisted::Updated);

        let reasons: Vec<_> = events.events().into_iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec!["Created", "Updated"]);
        let live = store.lookup(&config_map_gvk(), Some("shop"), "web").unwrap();
        assert_eq!(live.data["data"]["port"], "9090");
    }

    #[test]
    fn custom_resource_definitions_are_never_updated() {
        let ctx = Context::new(MemoryStore::new(), StaticHooks::default());
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "apiextensions.k8s.io",
            "v1",
            "CustomResourceDefinition",
        ));
        let mut live = DynamicObject::new("webstores.apps.example.io", &ar);
        live.data = json!({ "spec": { "group": "apps.example.io", "scope": "Namespaced" } });
        let mut desired = live.clone();
        desired.data["spec"]["scope"] = json!("Cluster");

        assert!(!needs_update(&ctx, &desired, &live).unwrap());
        assert!(needs_update(&ctx, &config_map("web", "1"), &config_map("web", "2")).unwrap());
    }

    #[tokio::test]
    async fn server_defaults_inside_lists_do_not_trigger_patches() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEventPublisher::default());
        let ctx = Context::new(store.clone(), StaticHooks::default()).with_events(events.clone());
        let req = Request::new(webstore());
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Service"));
        let mut service = DynamicObject::new("web", &ar).within("shop");
        service.data = json!({ "spec": { "ports": [{ "port": 80, "targetPort": 8080 }] } });

        create_or_update(&ctx, &req, &service).await.unwrap();
        let mut defaulted = store.lookup(&GroupVersionKind::gvk("", "v1", "Service"), Some("shop"), "web").unwrap();
        defaulted.data["spec"]["ports"][0]["protocol"] = json!("TCP");
        defaulted.data["spec"]["clusterIP"] = json!("10.96.4.12");
        store.insert(defaulted).unwrap();

        for _ in 0..3 {
            let outcome = create_or_update(&ctx, &req, &service).await.unwrap();
            assert_eq!(outcome, Persisted::Unchanged);
        }
        let reasons: Vec<_> = events.events().into_iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec!["Created"]);
    }

    #[tokio::test]
    async fn children_controlled_by_another_owner_are_left_alone() {
        let store = MemoryStore::new();
        let ctx = Context::new(store.clone(), StaticHooks::default());
        let req = Request::new(webstore());
        let foreign = OwnerReference {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "legacy".into(),
            uid: "9f1c2d3e-0000-4000-8000-000000000001".into(),
            controller: Some(true),
            ..OwnerReference::default()
        };

        let mut claimed = config_map("web", "8080");
        claimed.owner_references_mut().push(foreign.clone());
        let err = create_or_update(&ctx, &req, &claimed).await.unwrap_err();
        assert!(matches!(&err, Error::AlreadyOwned { object, owner }
            if object == "ConfigMap/web" && owner == "Deployment/legacy"));
        assert!(ctx.store().list(&config_map_gvk()).await.unwrap().is_empty());

        let mut live = config_map("web", "8080");
        live.owner_references_mut().push(foreign);
        store.insert(live).unwrap();
        let err = create_or_update(&ctx, &req, &config_map("web", "9090")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyOwned { .. }));
        let live = store.lookup(&config_map_gvk(), Some("shop"), "web").unwrap();
        assert_eq!(live.data["data"]["port"], "8080");
    }

    #[tokio::test]
    async fn workloads_without_uid_cannot_own_children() {
        let ctx = Context::new(MemoryStore::new(), StaticHooks::default());
        let mut unsaved = webstore();
        unsaved.metadata.uid = None;
        let req = Request::new(unsaved);

        let err = create_or_update(&ctx, &req, &config_map("web", "8080")).await.unwrap_err();
        assert!(matches!(err, Error::OwnerReference(name) if name == "ConfigMap/web"));
        assert!(ctx.store().list(&config_map_gvk()).await.unwrap().is_empty());
    }
}
