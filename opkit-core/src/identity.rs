//! Identity helpers for type-erased child objects.
use crate::{Error, Result};
use kube_core::{DynamicObject, GroupVersionKind, ResourceExt};
use std::fmt;

/// Read the group, version and kind of a dynamic object
///
/// # Errors
///
/// Fails when the object carries no `apiVersion`/`kind`, which the store needs to
/// locate the right API endpoint.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::MissingTypeMeta(obj.name_any()))?;
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(Error::MissingTypeMeta(obj.name_any()));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((_, "")) | Some(("", _)) => return Err(Error::InvalidApiVersion(types.api_version.clone())),
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Everything needed to address one object in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Type of the object
    pub gvk: GroupVersionKind,
    /// Namespace, `None` for cluster scoped objects
    pub namespace: Option<String>,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Build a key from its parts
    #[must_use]
    pub fn new(gvk: GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            gvk,
            namespace: namespace.filter(|ns| !ns.is_empty()).map(String::from),
            name: name.to_string(),
        }
    }

    /// Key of an existing dynamic object
    ///
    /// # Errors
    ///
    /// Fails when the object has no type information.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        Ok(Self::new(gvk_of(obj)?, obj.namespace().as_deref(), &obj.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.gvk.kind, self.name, ns),
            None => write!(f, "{}/{}", self.gvk.kind, self.name),
        }
    }
}

/// Whether two objects share group, version and kind
#[must_use]
pub fn equal_gvk(left: &DynamicObject, right: &DynamicObject) -> bool {
    match (gvk_of(left), gvk_of(right)) {
        (Ok(l), Ok(r)) => l == r,
        _ => false,
    }
}

/// Whether two objects share namespace and name
#[must_use]
pub fn equal_namespace_name(left: &DynamicObject, right: &DynamicObject) -> bool {
    left.name_any() == right.name_any() && left.namespace() == right.namespace()
}

/// The `Kind/name` string used in events and log lines
#[must_use]
pub fn message_for(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map(|tm| tm.kind.as_str()).unwrap_or_default();
    format!("{}/{}", kind, obj.name_any())
}
