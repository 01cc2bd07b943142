//! Filters deciding whether a watch event on a workload or one of its children
//! should trigger a reconcile.
//!
//! These are plain functions over the old and new copies of an object, meant to
//! be called from the operator's watch streams before an object is queued.
use crate::DriftPolicy;
use kube::core::{DynamicObject, Resource};
use opkit_core::identity::{equal_gvk, equal_namespace_name, message_for};
use tracing::error;

/// Whether an update to a child resource should trigger a reconcile of its workload
///
/// Children that track a generation are reconciled when it moved. Children without
/// one are always reconciled. Otherwise the child is reconciled when it is not part of
/// `desired`, or when `policy` finds it no longer reflects its desired state.
#[must_use]
pub fn needs_reconciliation(
    existing: &DynamicObject,
    requested: &DynamicObject,
    desired: &[DynamicObject],
    policy: &dyn DriftPolicy,
) -> bool {
    let old = existing.metadata.generation.unwrap_or_default();
    let new = requested.metadata.generation.unwrap_or_default();
    if old > 0 && new > 0 && old != new {
        return true;
    }
    if old == 0 && new == 0 {
        return true;
    }

    let Some(desired) = find_desired(desired, requested) else {
        return true;
    };
    match policy.is_desired(desired, requested) {
        Ok(is_desired) => !is_desired,
        Err(err) => {
            error!(object = %message_for(desired), error = %err, "unable to determine equality for reconciliation");
            true
        }
    }
}

/// Whether an update to a workload changed its generation
///
/// Status and metadata only updates leave the generation alone and are filtered out.
#[must_use]
pub fn workload_generation_changed<K: Resource>(old: &K, new: &K) -> bool {
    old.meta().generation != new.meta().generation
}

/// The desired object with the same kind, namespace and name as `compared`
#[must_use]
pub fn find_desired<'a>(desired: &'a [DynamicObject], compared: &DynamicObject) -> Option<&'a DynamicObject> {
    desired
        .iter()
        .find(|d| equal_gvk(compared, d) && equal_namespace_name(compared, d))
}
