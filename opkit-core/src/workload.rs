//! The contract between an operator's custom resource and the phase engine.
use crate::conditions::{self, ChildResourceCondition, PhaseCondition};
use kube_core::{GroupVersionKind, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// Status block that every workload carries
///
/// Embed this as the `status` of a custom resource to satisfy [`Workload`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Whether every child resource of the workload has been created and reported ready
    #[serde(default)]
    pub created: bool,

    /// Whether the dependencies of the workload were found satisfied
    #[serde(default)]
    pub dependencies_satisfied: bool,

    /// One condition per phase of the reconcile pipeline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PhaseCondition>,

    /// One condition per child resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ChildResourceCondition>,
}

/// A custom resource whose reconciliation is driven by the phase engine
///
/// Implementors only describe where their [`WorkloadStatus`] lives and which other
/// workload kinds they depend on; every other accessor has a provided default.
///
/// ```ignore
/// impl Workload for WebStore {
///     fn workload_status(&self) -> Option<&WorkloadStatus> {
///         self.status.as_ref()
///     }
///
///     fn workload_status_mut(&mut self) -> &mut WorkloadStatus {
///         self.status.get_or_insert_with(WorkloadStatus::default)
///     }
/// }
/// ```
pub trait Workload:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// The status block, if the object has one yet
    fn workload_status(&self) -> Option<&WorkloadStatus>;

    /// The status block, created empty when missing
    fn workload_status_mut(&mut self) -> &mut WorkloadStatus;

    /// Kinds of other workloads that must exist and be created before this one
    fn dependencies(&self) -> Vec<GroupVersionKind> {
        Vec::new()
    }

    /// Group, version and kind of this workload type
    fn workload_gvk() -> GroupVersionKind {
        GroupVersionKind::gvk(&Self::group(&()), &Self::version(&()), &Self::kind(&()))
    }

    /// The finalizer gating deletion of this workload type
    ///
    /// Always `<group>/Finalizer`.
    fn finalizer_name() -> String {
        format!("{}/Finalizer", Self::group(&()))
    }

    /// Whether the finalizer is present on the object
    fn has_finalizer(&self) -> bool {
        let name = Self::finalizer_name();
        self.finalizers().iter().any(|f| *f == name)
    }

    /// Whether the object has a deletion timestamp
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Whether the workload was reconciled to completion
    fn ready_status(&self) -> bool {
        self.workload_status().is_some_and(|s| s.created)
    }

    /// Record whether the workload was reconciled to completion
    fn set_ready_status(&mut self, ready: bool) {
        self.workload_status_mut().created = ready;
    }

    /// Whether the dependencies were satisfied on an earlier reconcile
    fn dependency_status(&self) -> bool {
        self.workload_status().is_some_and(|s| s.dependencies_satisfied)
    }

    /// Cache the outcome of the dependency check
    fn set_dependency_status(&mut self, satisfied: bool) {
        self.workload_status_mut().dependencies_satisfied = satisfied;
    }

    /// The recorded phase conditions
    fn phase_conditions(&self) -> &[PhaseCondition] {
        self.workload_status().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }

    /// The recorded child resource conditions
    fn child_resource_conditions(&self) -> &[ChildResourceCondition] {
        self.workload_status().map(|s| s.resources.as_slice()).unwrap_or_default()
    }

    /// The recorded phase conditions, for in-place edits
    fn phase_conditions_mut(&mut self) -> &mut Vec<PhaseCondition> {
        &mut self.workload_status_mut().conditions
    }

    /// The recorded child resource conditions, for in-place edits
    fn child_resource_conditions_mut(&mut self) -> &mut Vec<ChildResourceCondition> {
        &mut self.workload_status_mut().resources
    }

    /// Replace or append the condition for a phase
    fn set_phase_condition(&mut self, condition: PhaseCondition) {
        conditions::set_phase_condition(self.phase_conditions_mut(), condition);
    }

    /// Replace or append the condition for a child resource
    fn set_child_resource_condition(&mut self, condition: ChildResourceCondition) {
        conditions::set_child_resource_condition(self.child_resource_conditions_mut(), condition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::PhaseState;
    use kube::CustomResource;

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
    #[kube(
        group = "apps.example.io",
        version = "v1alpha1",
        kind = "WebStore",
        namespaced,
        status = "WorkloadStatus",
        schema = "disabled"
    )]
    struct WebStoreSpec {
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

    #[test]
    fn identity_comes_from_resource() {
        assert_eq!(
            WebStore::workload_gvk(),
            GroupVersionKind::gvk("apps.example.io", "v1alpha1", "WebStore")
        );
        assert_eq!(WebStore::finalizer_name(), "apps.example.io/Finalizer");
    }

    #[test]
    fn flags_default_to_false_without_status() {
        let mut store = WebStore::new("shop", WebStoreSpec::default());
        assert!(!store.ready_status());
        assert!(!store.dependency_status());
        assert!(store.phase_conditions().is_empty());

        store.set_ready_status(true);
        store.set_dependency_status(true);
        assert!(store.ready_status());
        assert!(store.dependency_status());
    }

    #[test]
    fn conditions_are_replaced_on_the_status() {
        let mut store = WebStore::new("shop", WebStoreSpec::default());
        store.set_phase_condition(PhaseCondition::pending("Dependency"));
        store.set_phase_condition(PhaseCondition::complete("Dependency"));
        assert_eq!(store.phase_conditions().len(), 1);
        assert_eq!(store.phase_conditions()[0].state, PhaseState::Complete);
    }

    #[test]
    fn finalizer_and_deletion_come_from_metadata() {
        let mut store = WebStore::new("shop", WebStoreSpec::default());
        assert!(!store.has_finalizer());
        assert!(!store.is_deleting());

        store.finalizers_mut().push(WebStore::finalizer_name());
        store.meta_mut().deletion_timestamp = serde_json::from_value(serde_json::json!("2024-05-01T10:00:00Z")).unwrap();
        assert!(store.has_finalizer());
        assert!(store.is_deleting());
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = WorkloadStatus {
            created: true,
            dependencies_satisfied: true,
            ..WorkloadStatus::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, serde_json::json!({"created": true, "dependenciesSatisfied": true}));
    }

    #[test]
    fn status_reads_back_from_manifest() {
        let status: WorkloadStatus = serde_yaml::from_str(
            r#"
created: false
dependenciesSatisfied: true
conditions:
- phase: Dependency
  state: Complete
  message: Successfully Completed Phase
  lastModified: "2024-05-01T10:00:00Z"
resources:
- group: apps
  version: v1
  kind: Deployment
  name: web
  namespace: shop
  created: true
"#,
        )
        .unwrap();
        assert!(status.dependencies_satisfied);
        assert_eq!(status.conditions[0].state, PhaseState::Complete);

        assert_json_diff::assert_json_include!(
            actual: serde_json::to_value(&status).unwrap(),
            expected: serde_json::json!({
                "dependenciesSatisfied": true,
                "resources": [{ "kind": "Deployment", "name": "web", "created": true }]
            })
        );
    }
}
