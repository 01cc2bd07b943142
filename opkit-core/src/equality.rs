//! Deciding whether a live object already matches the object an operator wants.
//!
//! A live object carries plenty of server populated state that a desired object
//! never sets, so a plain deep comparison would report drift forever. Instead the
//! desired object is merged onto a copy of the live one and the result is diffed
//! against the live object; any difference left over is real drift.
use crate::{identity::gvk_of, Error, Result};
use kube_core::DynamicObject;
use serde_json::{Map, Value};

/// Whether `actual` already holds every field that `desired` sets
///
/// Server owned fields (`resourceVersion`, `generation`, `managedFields`, the
/// `status` subresource and a few immutable bookkeeping fields) never count as a
/// difference.
///
/// # Errors
///
/// Fails when the two objects are not of the same group, version and kind, or when
/// either cannot be represented as json.
pub fn are_equal(desired: &DynamicObject, actual: &DynamicObject) -> Result<bool> {
    compare(desired, actual, Mode::Exact)
}

/// Whether `actual` already reflects the intent of `desired`
///
/// A looser form of [`are_equal`]: fields that `desired` leaves empty (`""`, `[]`,
/// `{}`) are treated as unset, and owner references and finalizers are ignored
/// since other controllers may legitimately add to them. Lists are merged element
/// by element, matching elements on their `name` when they have one, so fields the
/// server defaults inside list elements (a container's `imagePullPolicy`, a port's
/// `protocol`) are tolerated.
///
/// # Errors
///
/// Same as [`are_equal`].
pub fn are_desired(desired: &DynamicObject, actual: &DynamicObject) -> Result<bool> {
    compare(desired, actual, Mode::Intent)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Exact,
    Intent,
}

fn compare(desired: &DynamicObject, actual: &DynamicObject, mode: Mode) -> Result<bool> {
    let (desired_gvk, actual_gvk) = (gvk_of(desired)?, gvk_of(actual)?);
    if desired_gvk != actual_gvk {
        return Err(Error::KindMismatch {
            desired: desired_gvk.api_version() + "/" + &desired_gvk.kind,
            actual: actual_gvk.api_version() + "/" + &actual_gvk.kind,
        });
    }

    let mut desired = serde_json::to_value(desired)?;
    let mut actual = serde_json::to_value(actual)?;

    normalize_server_fields(&mut desired, &actual);
    if mode == Mode::Intent {
        prune_empty(&mut desired);
    }

    let mut merged = actual.clone();
    merge(&mut merged, &desired, mode);

    let kind = actual_gvk.kind.as_str();
    for value in [&mut actual, &mut merged] {
        strip_ignored(value, kind);
        if mode == Mode::Intent {
            if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.remove("ownerReferences");
                meta.remove("finalizers");
            }
        }
    }

    Ok(json_patch::diff(&actual, &merged).0.is_empty())
}

/// Carry fields only the server sets from `actual` over to `desired`
fn normalize_server_fields(desired: &mut Value, actual: &Value) {
    let actual_meta = actual.get("metadata").and_then(Value::as_object);
    let Some(meta) = desired.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    for field in ["resourceVersion", "generation"] {
        match actual_meta.and_then(|m| m.get(field)) {
            Some(v) => {
                meta.insert(field.to_string(), v.clone());
            }
            None => {
                meta.remove(field);
            }
        }
    }
    let cluster_scoped = actual_meta
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .is_none_or(str::is_empty);
    if cluster_scoped {
        meta.remove("namespace");
    }
}

/// Merge `patch` onto `base`: objects merge key by key, anything else replaces
///
/// `null` in the patch never clears a value from the base. In [`Mode::Intent`] lists
/// are merged too, see [`merge_list`].
fn merge(base: &mut Value, patch: &Value, mode: Mode) {
    match (base, patch) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge(existing, value, mode),
                    None if value.is_null() => {}
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(patch)) if mode == Mode::Intent => merge_list(base, patch),
        (base, patch) => *base = patch.clone(),
    }
}

/// Rebuild `base` with one element per element of `patch`, in the order of `patch`
///
/// Each element is merged onto its counterpart in `base`: the element with the same
/// `name`, or the one at the same index for elements without a name. Elements of
/// `base` without a counterpart are dropped.
fn merge_list(base: &mut Vec<Value>, patch: &[Value]) {
    let merged = patch
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let counterpart = match name_of(item) {
                Some(name) => base.iter().find(|b| name_of(b) == Some(name)),
                None => base.get(idx).filter(|b| name_of(b).is_none()),
            };
            let mut slot = counterpart.cloned().unwrap_or(Value::Null);
            merge(&mut slot, item, Mode::Intent);
            slot
        })
        .collect();
    *base = merged;
}

fn name_of(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

fn strip_ignored(value: &mut Value, kind: &str) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    obj.remove("status");
    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
    let Some(spec) = obj.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    if let Some(templates) = spec.get_mut("volumeClaimTemplates").and_then(Value::as_array_mut) {
        for template in templates.iter_mut().filter_map(Value::as_object_mut) {
            template.remove("apiVersion");
            template.remove("kind");
            template.remove("status");
        }
    }
    if kind == "PodDisruptionBudget" {
        spec.remove("selector");
    }
}

/// Drop empty strings, lists and maps so they read as unset
///
/// Returns whether the value itself is empty after pruning.
fn prune_empty(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => {
            prune_map(map);
            map.is_empty()
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Value::Object(map) = item {
                    prune_map(map);
                }
            }
            items.is_empty()
        }
        Value::String(s) => s.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn prune_map(map: &mut Map<String, Value>) {
    map.retain(|_, v| !prune_empty(v));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "shop", "labels": { "app": "web" } },
            "spec": {
                "replicas": 2,
                "template": { "spec": { "containers": [{ "name": "web", "image": "nginx:1.27" }] } }
            }
        })
    }

    fn live(mut value: Value) -> Value {
        let meta = value["metadata"].as_object_mut().unwrap();
        meta.insert("resourceVersion".into(), json!("4711"));
        meta.insert("generation".into(), json!(3));
        meta.insert("uid".into(), json!("5c1b6f2e"));
        meta.insert("managedFields".into(), json!([{ "manager": "kubectl" }]));
        value["spec"]["progressDeadlineSeconds"] = json!(600);
        value["status"] = json!({ "replicas": 2, "readyReplicas": 1 });
        value
    }

    #[test]
    fn equality_is_reflexive() {
        let obj = object(live(deployment()));
        assert!(are_equal(&obj, &obj).unwrap());
        assert!(are_desired(&obj, &obj).unwrap());
    }

    #[test]
    fn server_populated_fields_are_not_drift() {
        let desired = object(deployment());
        let actual = object(live(deployment()));
        assert!(are_equal(&desired, &actual).unwrap());
    }

    #[test]
    fn changed_spec_is_drift() {
        let mut changed = deployment();
        changed["spec"]["replicas"] = json!(3);
        let actual = object(live(deployment()));
        assert!(!are_equal(&object(changed), &actual).unwrap());
    }

    #[test]
    fn arrays_are_replaced_not_merged() {
        let mut desired = deployment();
        desired["spec"]["template"]["spec"]["containers"] = json!([{ "name": "web" }]);
        let actual = object(live(deployment()));
        assert!(!are_equal(&object(desired), &actual).unwrap());
    }

    #[test]
    fn null_never_overrides() {
        let mut desired = deployment();
        desired["metadata"]["labels"] = Value::Null;
        let actual = object(live(deployment()));
        assert!(are_equal(&object(desired), &actual).unwrap());
    }

    #[test]
    fn cluster_scoped_actual_ignores_desired_namespace() {
        let desired = object(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "shop", "namespace": "default" }
        }));
        let actual = object(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "shop", "resourceVersion": "12" },
            "status": { "phase": "Active" }
        }));
        assert!(are_equal(&desired, &actual).unwrap());
    }

    #[test]
    fn volume_claim_template_bookkeeping_is_ignored() {
        let template = json!({ "metadata": { "name": "data" }, "spec": { "accessModes": ["ReadWriteOnce"] } });
        let desired = object(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": "db", "namespace": "shop" },
            "spec": { "volumeClaimTemplates": [template.clone()] }
        }));
        let mut live_template = template;
        live_template["apiVersion"] = json!("v1");
        live_template["kind"] = json!("PersistentVolumeClaim");
        live_template["status"] = json!({ "phase": "Pending" });
        let actual = object(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": "db", "namespace": "shop" },
            "spec": { "volumeClaimTemplates": [live_template] }
        }));
        assert!(are_equal(&desired, &actual).unwrap());
    }

    #[test]
    fn pod_disruption_budget_selector_is_ignored() {
        let pdb = |app: &str| {
            object(json!({
                "apiVersion": "policy/v1",
                "kind": "PodDisruptionBudget",
                "metadata": { "name": "web", "namespace": "shop" },
                "spec": { "minAvailable": 1, "selector": { "matchLabels": { "app": app } } }
            }))
        };
        assert!(are_equal(&pdb("web"), &pdb("web-v2")).unwrap());
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let desired = object(deployment());
        let mut other = deployment();
        other["kind"] = json!("DaemonSet");
        let err = are_equal(&desired, &object(other)).unwrap_err();
        assert!(matches!(err, Error::KindMismatch { .. }));
    }

    #[test]
    fn desired_tolerates_server_defaults_inside_lists() {
        let service = |port: Value| {
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": { "name": "web", "namespace": "shop" },
                "spec": { "selector": { "app": "web" }, "ports": [port] }
            })
        };
        let desired = object(service(json!({ "port": 80, "targetPort": 8080 })));
        let mut actual = service(json!({ "port": 80, "targetPort": 8080, "protocol": "TCP" }));
        actual["spec"]["clusterIP"] = json!("10.96.4.12");
        let actual = object(actual);
        assert!(!are_equal(&desired, &actual).unwrap());
        assert!(are_desired(&desired, &actual).unwrap());

        let moved = object(service(json!({ "port": 443, "targetPort": 8080, "protocol": "TCP" })));
        assert!(!are_desired(&desired, &moved).unwrap());
    }

    #[test]
    fn desired_matches_named_list_elements() {
        let mut desired = deployment();
        desired["spec"]["template"]["spec"]["containers"] = json!([
            { "name": "web", "image": "nginx:1.27" },
            { "name": "metrics", "image": "exporter:0.3" }
        ]);
        let mut actual = live(desired.clone());
        actual["spec"]["template"]["spec"]["containers"] = json!([
            { "name": "web", "image": "nginx:1.27", "imagePullPolicy": "IfNotPresent",
              "terminationMessagePath": "/dev/termination-log" },
            { "name": "metrics", "image": "exporter:0.3", "imagePullPolicy": "IfNotPresent" }
        ]);
        assert!(are_desired(&object(desired.clone()), &object(actual.clone())).unwrap());

        desired["spec"]["template"]["spec"]["containers"][1]["image"] = json!("exporter:0.4");
        assert!(!are_desired(&object(desired.clone()), &object(actual.clone())).unwrap());

        desired["spec"]["template"]["spec"]["containers"] = json!([{ "name": "web", "image": "nginx:1.27" }]);
        assert!(!are_desired(&object(desired), &object(actual)).unwrap());
    }

    #[test]
    fn desired_tolerates_empty_fields_and_ownership() {
        let mut desired = deployment();
        desired["metadata"]["annotations"] = json!({});
        desired["metadata"]["finalizers"] = json!(["apps.example.io/Finalizer"]);
        desired["spec"]["template"]["spec"]["serviceAccountName"] = json!("");

        let mut actual = live(deployment());
        actual["metadata"]["annotations"] = json!({ "deployment.kubernetes.io/revision": "1" });
        actual["spec"]["template"]["spec"]["serviceAccountName"] = json!("default");

        let (desired, actual) = (object(desired), object(actual));
        assert!(!are_equal(&desired, &actual).unwrap());
        assert!(are_desired(&desired, &actual).unwrap());
    }
}
