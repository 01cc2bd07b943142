//! An in-process [`ObjectStore`] that behaves like a small apiserver, for tests.
use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::core::{DynamicObject, GroupVersionKind, ResourceExt};
use opkit_core::{identity::gvk_of, ObjectKey};
use parking_lot::RwLock;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Default)]
struct State {
    objects: BTreeMap<String, (ObjectKey, DynamicObject)>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// An in-process [`ObjectStore`]
///
/// Behaves like the apiserver where the phase engine can observe it: every write bumps
/// `metadata.resourceVersion`, replaces are rejected with a conflict when they carry a stale
/// version, spec changes bump `metadata.generation` and an object that is being deleted goes
/// away once its last finalizer is removed.
///
/// Cloning yields another handle to the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

fn key_of(obj: &DynamicObject) -> Result<ObjectKey, StoreError> {
    ObjectKey::from_object(obj).map_err(|e| StoreError::Other(e.to_string()))
}

fn index(key: &ObjectKey) -> String {
    format!(
        "{}/{}/{}/{}",
        key.gvk.api_version(),
        key.gvk.kind,
        key.namespace.as_deref().unwrap_or_default(),
        key.name
    )
}

fn spec_of(obj: &DynamicObject) -> Value {
    match &obj.data {
        Value::Object(map) => map
            .iter()
            .filter(|(k, _)| k.as_str() != "status" && k.as_str() != "metadata")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        other => other.clone(),
    }
}

fn status_of(obj: &DynamicObject) -> Option<Value> {
    obj.data.get("status").cloned()
}

fn set_status(obj: &mut DynamicObject, status: Option<Value>) {
    let Some(map) = obj.data.as_object_mut() else {
        return;
    };
    match status {
        Some(status) => {
            map.insert("status".into(), status);
        }
        None => {
            map.remove("status");
        }
    }
}

impl MemoryStore {
    /// An empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object into the store as is, replacing any object with the same identity
    ///
    /// A missing `resourceVersion` is assigned.
    pub fn insert(&self, mut obj: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = key_of(&obj)?;
        let mut state = self.state.write();
        if obj.metadata.resource_version.is_none() {
            obj.metadata.resource_version = Some(state.next_version());
        }
        state.objects.insert(index(&key), (key, obj.clone()));
        Ok(obj)
    }

    /// The current copy of an object
    #[must_use]
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.state.read().objects.get(&index(key)).map(|(_, o)| o.clone())
    }

    /// Every object currently held
    #[must_use]
    pub fn objects(&self) -> Vec<DynamicObject> {
        self.state.read().objects.values().map(|(_, o)| o.clone()).collect()
    }

    /// Delete an object the way the apiserver would
    ///
    /// Objects holding finalizers only get a deletion timestamp; everything else is removed.
    pub fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let idx = index(key);
        let version = state.next_version();
        let Some((_, obj)) = state.objects.get_mut(&idx) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if obj.finalizers().is_empty() {
            state.objects.remove(&idx);
        } else if obj.metadata.deletion_timestamp.is_none() {
            obj.metadata.deletion_timestamp = serde_json::from_value(Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ))?;
            obj.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    fn write<F>(&self, obj: &DynamicObject, check_version: bool, apply: F) -> Result<DynamicObject, StoreError>
    where
        F: FnOnce(&DynamicObject, &mut DynamicObject) -> Result<(), StoreError>,
    {
        let key = key_of(obj)?;
        let idx = index(&key);
        let mut state = self.state.write();
        let version = state.next_version();
        let Some((_, stored)) = state.objects.get_mut(&idx) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if check_version
            && obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let mut updated = stored.clone();
        apply(obj, &mut updated)?;
        if spec_of(&updated) != spec_of(stored) {
            updated.metadata.generation = Some(stored.metadata.generation.unwrap_or(1) + 1);
        }
        updated.metadata.resource_version = Some(version);

        let released = updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty();
        if released {
            state.objects.remove(&idx);
        } else {
            *stored = updated.clone();
        }
        Ok(updated)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.object(key))
    }

    async fn list(&self, gvk: &GroupVersionKind) -> Result<Vec<DynamicObject>, StoreError> {
        Ok(self
            .state
            .read()
            .objects
            .values()
            .filter(|(key, _)| &key.gvk == gvk)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject, _field_manager: &str) -> Result<DynamicObject, StoreError> {
        let key = key_of(obj)?;
        let idx = index(&key);
        let mut state = self.state.write();
        if state.objects.contains_key(&idx) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut created = obj.clone();
        created.metadata.resource_version = Some(state.next_version());
        created.metadata.uid = Some(format!("uid-{}", state.version));
        created.metadata.generation = Some(1);
        state.objects.insert(idx, (key, created.clone()));
        Ok(created)
    }

    async fn patch(&self, obj: &DynamicObject, _field_manager: &str) -> Result<DynamicObject, StoreError> {
        self.write(obj, false, |patch, stored| {
            let mut patch = serde_json::to_value(patch)?;
            if let Some(meta) = patch.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.remove("resourceVersion");
            }
            let mut merged = serde_json::to_value(&*stored)?;
            json_patch::merge(&mut merged, &patch);
            *stored = serde_json::from_value(merged)?;
            Ok(())
        })
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.write(obj, true, |replacement, stored| {
            let status = status_of(stored);
            let (uid, generation) = (stored.metadata.uid.clone(), stored.metadata.generation);
            *stored = replacement.clone();
            stored.metadata.uid = uid;
            stored.metadata.generation = generation;
            set_status(stored, status);
            Ok(())
        })
    }

    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.write(obj, true, |replacement, stored| {
            set_status(stored, status_of(replacement));
            Ok(())
        })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("objects", &self.state.read().objects.len())
            .finish()
    }
}

impl MemoryStore {
    /// Shorthand for [`MemoryStore::object`] by kind, namespace and name
    #[must_use]
    pub fn lookup(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.object(&ObjectKey::new(gvk.clone(), namespace, name))
    }

    /// `Kind/name` of every object currently held, in a stable order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.objects()
            .iter()
            .filter_map(|o| gvk_of(o).ok().map(|gvk| format!("{}/{}", gvk.kind, o.name_any())))
            .collect()
    }
}
