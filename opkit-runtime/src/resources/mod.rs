//! Readiness of live child resources.
//!
//! Every supported kind has its own readiness predicate over the status the
//! cluster reports. Kinds this module does not model are considered ready, so an
//! unmodeled child never blocks a reconcile; operators can still give such a kind
//! a readiness check through the [`READY_PATH_ANNOTATION`] and
//! [`READY_VALUE_ANNOTATION`] annotations.
use crate::{context::from_dynamic, store::ObjectStore, Error, Result};
use jsonpath_rust::JsonPath;
use k8s_openapi::{
    api::{
        admissionregistration::v1::{
            MutatingWebhookConfiguration, ServiceReference, ValidatingWebhookConfiguration,
        },
        apps::v1::{DaemonSet, Deployment, StatefulSet},
        batch::v1::Job,
        core::v1::{ConfigMap, Endpoints, Namespace, Secret, Service},
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::core::{DynamicObject, GroupVersionKind, ResourceExt};
use opkit_core::{identity::gvk_of, ObjectKey};
use serde_json::Value;
use tracing::trace;

pub mod persist;

/// Annotation holding a JSONPath into an unmodeled object, e.g. `.status.phase`
pub const READY_PATH_ANNOTATION: &str = "opkit.io/ready-path";

/// Annotation holding the value [`READY_PATH_ANNOTATION`] must resolve to for the object to be ready
pub const READY_VALUE_ANNOTATION: &str = "opkit.io/ready-value";

/// A kind with a built-in readiness predicate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnownKind {
    /// `v1/Namespace`
    Namespace,
    /// `apps/v1/Deployment`
    Deployment,
    /// `apps/v1/DaemonSet`
    DaemonSet,
    /// `apps/v1/StatefulSet`
    StatefulSet,
    /// `batch/v1/Job`
    Job,
    /// `v1/Service`
    Service,
    /// `v1/ConfigMap`
    ConfigMap,
    /// `v1/Secret`
    Secret,
    /// `apiextensions.k8s.io/v1/CustomResourceDefinition`
    CustomResourceDefinition,
    /// `admissionregistration.k8s.io/v1/MutatingWebhookConfiguration`
    MutatingWebhookConfiguration,
    /// `admissionregistration.k8s.io/v1/ValidatingWebhookConfiguration`
    ValidatingWebhookConfiguration,
    /// cert-manager `Issuer`
    Issuer,
    /// cert-manager `ClusterIssuer`
    ClusterIssuer,
    /// cert-manager `Certificate`
    Certificate,
}

/// Kind strings with a built-in readiness predicate
pub const KINDS: &[(&str, KnownKind)] = &[
    ("Namespace", KnownKind::Namespace),
    ("Deployment", KnownKind::Deployment),
    ("DaemonSet", KnownKind::DaemonSet),
    ("StatefulSet", KnownKind::StatefulSet),
    ("Job", KnownKind::Job),
    ("Service", KnownKind::Service),
    ("ConfigMap", KnownKind::ConfigMap),
    ("Secret", KnownKind::Secret),
    ("CustomResourceDefinition", KnownKind::CustomResourceDefinition),
    ("MutatingWebhookConfiguration", KnownKind::MutatingWebhookConfiguration),
    ("ValidatingWebhookConfiguration", KnownKind::ValidatingWebhookConfiguration),
    ("Issuer", KnownKind::Issuer),
    ("ClusterIssuer", KnownKind::ClusterIssuer),
    ("Certificate", KnownKind::Certificate),
];

impl KnownKind {
    /// Look up a kind string
    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Self> {
        KINDS.iter().find(|(name, _)| *name == kind).map(|(_, known)| *known)
    }
}

/// A live object paired with the readiness predicate for its kind
#[allow(clippy::large_enum_variant)]
#[derive(Clone, Debug)]
pub enum ResourceChecker {
    /// A namespace
    Namespace(Namespace),
    /// A deployment
    Deployment(Deployment),
    /// A daemon set
    DaemonSet(DaemonSet),
    /// A stateful set
    StatefulSet(StatefulSet),
    /// A job
    Job(Job),
    /// A service
    Service(Service),
    /// A config map
    ConfigMap(ConfigMap),
    /// A secret
    Secret(Secret),
    /// A custom resource definition
    CustomResourceDefinition(CustomResourceDefinition),
    /// A mutating admission webhook configuration
    MutatingWebhook(MutatingWebhookConfiguration),
    /// A validating admission webhook configuration
    ValidatingWebhook(ValidatingWebhookConfiguration),
    /// A cert-manager issuer, cluster issuer or certificate
    CertManager(DynamicObject),
    /// Any other kind
    Unknown(DynamicObject),
}

impl ResourceChecker {
    /// Parse a live object into the checker for its kind
    ///
    /// # Errors
    ///
    /// Fails when the object has no type information, or does not deserialize into the typed
    /// struct of its kind.
    pub fn new(obj: &DynamicObject) -> Result<Self> {
        let gvk = gvk_of(obj)?;
        let Some(known) = KnownKind::from_kind(&gvk.kind) else {
            return Ok(ResourceChecker::Unknown(obj.clone()));
        };
        let obj = obj.clone();
        let kind = gvk.kind.as_str();
        Ok(match known {
            KnownKind::Namespace => ResourceChecker::Namespace(from_dynamic(obj, kind)?),
            KnownKind::Deployment => ResourceChecker::Deployment(from_dynamic(obj, kind)?),
            KnownKind::DaemonSet => ResourceChecker::DaemonSet(from_dynamic(obj, kind)?),
            KnownKind::StatefulSet => ResourceChecker::StatefulSet(from_dynamic(obj, kind)?),
            KnownKind::Job => ResourceChecker::Job(from_dynamic(obj, kind)?),
            KnownKind::Service => ResourceChecker::Service(from_dynamic(obj, kind)?),
            KnownKind::ConfigMap => ResourceChecker::ConfigMap(from_dynamic(obj, kind)?),
            KnownKind::Secret => ResourceChecker::Secret(from_dynamic(obj, kind)?),
            KnownKind::CustomResourceDefinition => {
                ResourceChecker::CustomResourceDefinition(from_dynamic(obj, kind)?)
            }
            KnownKind::MutatingWebhookConfiguration => ResourceChecker::MutatingWebhook(from_dynamic(obj, kind)?),
            KnownKind::ValidatingWebhookConfiguration => {
                ResourceChecker::ValidatingWebhook(from_dynamic(obj, kind)?)
            }
            KnownKind::Issuer | KnownKind::ClusterIssuer | KnownKind::Certificate => {
                ResourceChecker::CertManager(obj)
            }
        })
    }

    /// Whether the object has reached a steady state
    ///
    /// Only the webhook configurations consult the store, to look up the endpoints of the
    /// services they call.
    ///
    /// # Errors
    ///
    /// Fails for a job that completed without succeeding, on store errors while
    /// checking webhook services, and on an unparsable readiness annotation.
    pub async fn is_ready(&self, store: &dyn ObjectStore) -> Result<bool> {
        match self {
            ResourceChecker::Namespace(ns) => Ok(namespace_ready(ns)),
            ResourceChecker::Deployment(deploy) => Ok(deployment_ready(deploy)),
            ResourceChecker::DaemonSet(ds) => Ok(daemon_set_ready(ds)),
            ResourceChecker::StatefulSet(sts) => Ok(stateful_set_ready(sts)),
            ResourceChecker::Job(job) => job_ready(job),
            ResourceChecker::Service(svc) => Ok(service_ready(svc)),
            ResourceChecker::ConfigMap(cm) => Ok(!cm.name_any().is_empty()),
            ResourceChecker::Secret(secret) => Ok(!secret.name_any().is_empty()),
            ResourceChecker::CustomResourceDefinition(crd) => Ok(!crd.name_any().is_empty()),
            ResourceChecker::MutatingWebhook(webhook) => {
                if webhook.name_any().is_empty() {
                    return Ok(false);
                }
                let services = webhook.webhooks.iter().flatten().filter_map(|w| w.client_config.service.as_ref());
                services_have_endpoints(store, services).await
            }
            ResourceChecker::ValidatingWebhook(webhook) => {
                if webhook.name_any().is_empty() {
                    return Ok(false);
                }
                let services = webhook.webhooks.iter().flatten().filter_map(|w| w.client_config.service.as_ref());
                services_have_endpoints(store, services).await
            }
            ResourceChecker::CertManager(obj) => Ok(has_ready_condition(obj)),
            ResourceChecker::Unknown(obj) => annotated_ready(obj),
        }
    }
}

/// Whether a live object is ready
///
/// `None`, an object that was not found, is never ready.
///
/// # Errors
///
/// See [`ResourceChecker::is_ready`].
pub async fn is_ready(store: &dyn ObjectStore, obj: Option<&DynamicObject>) -> Result<bool> {
    match obj {
        Some(obj) => ResourceChecker::new(obj)?.is_ready(store).await,
        None => Ok(false),
    }
}

/// Whether every live object is ready
///
/// Stops at the first object that is not ready or fails its check.
///
/// # Errors
///
/// The error of the first failing check.
pub async fn are_ready(store: &dyn ObjectStore, objs: &[Option<DynamicObject>]) -> Result<bool> {
    for obj in objs {
        if !is_ready(store, obj.as_ref()).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn namespace_ready(ns: &Namespace) -> bool {
    !ns.name_any().is_empty() && ns.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Active")
}

fn deployment_ready(deploy: &Deployment) -> bool {
    let Some(status) = deploy.status.as_ref() else {
        return false;
    };
    !deploy.name_any().is_empty()
        && deploy.metadata.generation == status.observed_generation
        && status.ready_replicas.unwrap_or_default() == status.replicas.unwrap_or_default()
        && status.unavailable_replicas.unwrap_or_default() == 0
}

fn daemon_set_ready(ds: &DaemonSet) -> bool {
    let Some(status) = ds.status.as_ref() else {
        return false;
    };
    status.desired_number_scheduled == status.number_ready
        && status.number_ready > 0
        && status.number_unavailable.unwrap_or_default() < 1
}

fn stateful_set_ready(sts: &StatefulSet) -> bool {
    let (Some(spec), Some(status)) = (sts.spec.as_ref(), sts.status.as_ref()) else {
        return false;
    };
    if sts.name_any().is_empty() || sts.metadata.generation != status.observed_generation {
        return false;
    }
    let Some(replicas) = spec.replicas else {
        return false;
    };
    let partition = spec
        .update_strategy
        .as_ref()
        .and_then(|s| s.rolling_update.as_ref())
        .and_then(|r| r.partition)
        .filter(|p| *p > 0)
        .unwrap_or_default();

    let not_updated = (replicas - partition).max(0) - status.updated_replicas.unwrap_or_default();
    let not_ready = replicas - status.ready_replicas.unwrap_or_default();
    let not_deleted = status.replicas - replicas;
    not_updated <= 0 && not_ready <= 0 && not_deleted <= 0
}

fn job_ready(job: &Job) -> Result<bool> {
    if job.name_any().is_empty() {
        return Ok(false);
    }
    let Some(status) = job.status.as_ref() else {
        return Ok(false);
    };
    if status.active.unwrap_or_default() > 0 || status.completion_time.is_none() {
        return Ok(false);
    }
    if status.succeeded.unwrap_or_default() != 1 {
        return Err(Error::JobFailed(job.name_any()));
    }
    Ok(true)
}

/// ExternalName services are ready as soon as they exist, ClusterIP services once an
/// address is allocated and LoadBalancer services once an ingress point is published.
///
/// Services without a type and NodePort services have nothing further to wait on, so
/// they are ready once they exist.
fn service_ready(svc: &Service) -> bool {
    if svc.name_any().is_empty() {
        return false;
    }
    let Some(spec) = svc.spec.as_ref() else {
        return false;
    };
    match spec.type_.as_deref() {
        Some("ExternalName") => true,
        Some("ClusterIP") => {
            spec.cluster_ip.as_deref().is_some_and(|ip| !ip.is_empty())
                || spec.cluster_ips.as_ref().is_some_and(|ips| !ips.is_empty())
        }
        Some("LoadBalancer") => svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .is_some_and(|ingress| !ingress.is_empty()),
        _ => true,
    }
}

async fn services_have_endpoints<'a>(
    store: &dyn ObjectStore,
    services: impl Iterator<Item = &'a ServiceReference>,
) -> Result<bool> {
    let endpoints_gvk = GroupVersionKind::gvk("", "v1", "Endpoints");
    for service in services {
        let key = ObjectKey::new(endpoints_gvk.clone(), Some(&service.namespace), &service.name);
        let Some(found) = store.get(&key).await? else {
            trace!(service = %service.name, namespace = %service.namespace, "webhook service has no endpoints");
            return Ok(false);
        };
        let endpoints: Endpoints = from_dynamic(found, "Endpoints")?;
        if endpoints.name_any().is_empty() || endpoints.subsets.as_ref().is_none_or(Vec::is_empty) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn has_ready_condition(obj: &DynamicObject) -> bool {
    obj.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .any(|c| c.get("type") == Some(&Value::from("Ready")) && c.get("status") == Some(&Value::from("True")))
}

fn annotated_ready(obj: &DynamicObject) -> Result<bool> {
    let annotations = obj.annotations();
    let (Some(path), Some(expected)) = (
        annotations.get(READY_PATH_ANNOTATION),
        annotations.get(READY_VALUE_ANNOTATION),
    ) else {
        return Ok(true);
    };

    let expression = normalize_path(path);
    let parsed = expression.parse::<JsonPath>().map_err(|err| Error::ReadyPath {
        path: path.clone(),
        reason: err.to_string(),
    })?;
    let value = serde_json::to_value(obj).map_err(|source| Error::Conversion {
        kind: obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
        source,
    })?;
    let found = parsed.find_slice(&value).into_iter().next().map(|v| v.to_data());
    let actual = match found {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => return Ok(false),
        Some(other) => other.to_string(),
    };
    Ok(actual == *expected)
}

/// Accept kubectl style `{.status.phase}` and bare `.status.phase` as well as `$.status.phase`
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('{').trim_end_matches('}');
    if trimmed.starts_with('$') {
        trimmed.to_string()
    } else if trimmed.starts_with('.') || trimmed.starts_with('[') {
        format!("${trimmed}")
    } else {
        format!("$.{trimmed}")
    }
}
