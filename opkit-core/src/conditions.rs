//! Status conditions recorded on a workload while it is reconciled.
//!
//! Two lists live on the workload status: one [`PhaseCondition`] per phase of the
//! reconcile pipeline and one [`ChildResourceCondition`] per child object. Both
//! lists are written with replace-or-append semantics, so neither ever holds two
//! entries for the same phase name or the same child identity.
use chrono::{SecondsFormat, Utc};
use kube_core::{DynamicObject, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The current state of a phase
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum PhaseState {
    /// The phase is waiting on the cluster to converge
    Pending,
    /// The phase is running
    Reconciling,
    /// The phase returned an error
    Failed,
    /// The phase finished and the pipeline may move on
    Complete,
}

/// An event that occurred during one phase of the reconcile pipeline
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PhaseCondition {
    /// The phase in which the condition was set
    pub phase: String,
    /// State of the phase
    pub state: PhaseState,
    /// A helpful message from the phase
    pub message: String,
    /// The time at which the condition was last written, RFC 3339 in UTC
    pub last_modified: String,
}

impl PhaseCondition {
    fn new(phase: &str, state: PhaseState, message: String) -> Self {
        Self {
            phase: phase.to_string(),
            state,
            message,
            last_modified: now(),
        }
    }

    /// The condition written when a phase proceeds
    #[must_use]
    pub fn complete(phase: &str) -> Self {
        Self::new(phase, PhaseState::Complete, "Successfully Completed Phase".into())
    }

    /// The condition written when a phase asks to be retried
    #[must_use]
    pub fn pending(phase: &str) -> Self {
        Self::new(phase, PhaseState::Pending, "Pending Execution of Phase".into())
    }

    /// The condition written when a phase fails
    #[must_use]
    pub fn failed(phase: &str, err: &impl Display) -> Self {
        Self::new(phase, PhaseState::Failed, format!("Failed Phase with Error; {err}"))
    }
}

/// The condition of one child resource managed by a workload
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ChildResourceCondition {
    /// API group of the child, empty for the core group
    pub group: String,
    /// API version of the child
    pub version: String,
    /// Kind of the child
    pub kind: String,
    /// `metadata.name` of the child
    pub name: String,
    /// `metadata.namespace` of the child, empty when cluster scoped
    pub namespace: String,
    /// Whether the child has been created successfully
    pub created: bool,
    /// The time at which the condition was last written
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    /// A helpful message about the child
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ChildResourceCondition {
    /// Identity fields of a child object, with no condition recorded yet
    #[must_use]
    pub fn for_object(obj: &DynamicObject) -> Self {
        let (group, version) = obj
            .types
            .as_ref()
            .map(|tm| split_api_version(&tm.api_version))
            .unwrap_or_default();
        Self {
            group,
            version,
            kind: obj.types.as_ref().map(|tm| tm.kind.clone()).unwrap_or_default(),
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Mark the child as successfully created
    #[must_use]
    pub fn created(self) -> Self {
        self.with_state(true, "resource creation successful".into())
    }

    /// Mark the child as waiting to be created
    #[must_use]
    pub fn pending(self) -> Self {
        self.with_state(false, "Pending Execution of Resource Creation".into())
    }

    /// Mark the child as failed
    #[must_use]
    pub fn failed(self, err: &impl Display) -> Self {
        self.with_state(false, format!("unable to proceed with resource creation {err}"))
    }

    fn with_state(mut self, created: bool, message: String) -> Self {
        self.created = created;
        self.message = message;
        self.last_modified = now();
        self
    }

    /// Whether two conditions describe the same child object
    #[must_use]
    pub fn same_resource(&self, other: &Self) -> bool {
        self.group == other.group
            && self.version == other.version
            && self.kind == other.kind
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

/// Replace the condition for the same phase, or append it
pub fn set_phase_condition(conditions: &mut Vec<PhaseCondition>, condition: PhaseCondition) {
    match conditions.iter_mut().find(|c| c.phase == condition.phase) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Replace the condition for the same child identity, or append it
pub fn set_child_resource_condition(
    conditions: &mut Vec<ChildResourceCondition>,
    condition: ChildResourceCondition,
) {
    match conditions.iter_mut().find(|c| c.same_resource(&condition)) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
