//! An operator for a `WebStore` custom resource that owns a Deployment and a Service.
//!
//! Install the crd with `cargo run --example webstore_operator -- crd | kubectl apply -f -`
//! and run the operator against the current kube context with `cargo run --example webstore_operator`.
use futures::StreamExt;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::{controller::Controller, watcher},
    Client, CustomResource, CustomResourceExt, ResourceExt,
};
use opkit::{
    core::{Workload, WorkloadStatus},
    runtime::{
        events::KubeEventPublisher, watch::ChannelWatchRegistrar, Action, Config, Context, KubeStore,
        Registry, Request, WorkloadHooks,
    },
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.example.io",
    version = "v1alpha1",
    kind = "WebStore",
    namespaced,
    status = "WorkloadStatus",
    shortname = "ws"
)]
pub struct WebStoreSpec {
    image: String,
    replicas: i32,
}

impl Workload for WebStore {
    fn workload_status(&self) -> Option<&WorkloadStatus> {
        self.status.as_ref()
    }

    fn workload_status_mut(&mut self) -> &mut WorkloadStatus {
        self.status.get_or_insert_with(WorkloadStatus::default)
    }
}

struct WebStoreHooks;

#[async_trait::async_trait]
impl WorkloadHooks<WebStore> for WebStoreHooks {
    async fn desired_resources(&self, ws: &WebStore) -> opkit::Result<Vec<DynamicObject>> {
        let name = ws.name_any();
        let ns = ws.namespace().unwrap_or_default();
        let labels = json!({ "app.kubernetes.io/name": name });

        let deploy = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        let mut deployment = DynamicObject::new(&name, &deploy).within(&ns);
        deployment.data = json!({
            "spec": {
                "replicas": ws.spec.replicas,
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": { "containers": [{ "name": "web", "image": ws.spec.image }] }
                }
            }
        });

        let svc = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Service"));
        let mut service = DynamicObject::new(&name, &svc).within(&ns);
        service.data = json!({
            "spec": {
                "selector": labels,
                "ports": [{ "port": 80, "targetPort": 8080 }]
            }
        });

        Ok(vec![deployment, service])
    }
}

async fn reconcile(ws: Arc<WebStore>, ctx: Arc<Operator>) -> opkit::Result<Action> {
    let mut req = Request::new(ws.as_ref().clone());
    ctx.registry.reconcile(&ctx.context, &mut req).await
}

fn error_policy(_ws: Arc<WebStore>, err: &opkit::Error, _ctx: Arc<Operator>) -> Action {
    warn!("reconcile failed: {err}");
    Action::requeue(Duration::from_secs(15))
}

struct Operator {
    context: Context<WebStore>,
    registry: Registry<WebStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", serde_json::to_string_pretty(&WebStore::crd())?);
        return Ok(());
    }

    tracing_subscriber::fmt::init();
    let client = Client::try_default().await?;

    let (registrar, mut registered) = ChannelWatchRegistrar::channel();
    tokio::spawn(async move {
        while let Some(gvk) = registered.next().await {
            info!("operator now owns {}/{} {}", gvk.group, gvk.version, gvk.kind);
        }
    });

    let store = KubeStore::new(client.clone()).with_kind(
        WebStore::workload_gvk(),
        ApiResource::erase::<WebStore>(&()),
        true,
    );
    let context = Context::new(store, WebStoreHooks)
        .with_events(Arc::new(KubeEventPublisher::new(client.clone(), "webstore-operator")))
        .with_watches(registrar)
        .with_config(Config::default().field_manager("webstore-operator"));
    let operator = Arc::new(Operator {
        context,
        registry: Registry::standard(),
    });

    Controller::new(Api::<WebStore>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, operator)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("reconciled {:?}", o),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;

    Ok(())
}
