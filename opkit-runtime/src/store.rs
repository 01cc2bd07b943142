//! The boundary between the phase engine and wherever cluster objects live.
//!
//! The engine never talks to an `Api` directly. Every read and write goes through
//! an [`ObjectStore`], which works on type-erased [`DynamicObject`]s and classifies
//! failures into a [`StoreError`] so that callers can match on a conflict instead
//! of reading error messages.
use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use opkit_core::ObjectKey;
use thiserror::Error;

pub mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// The message the apiserver attaches to a write carrying a stale `resourceVersion`
///
/// Only consulted by [`StoreError::from_message`] for stores that report nothing but text.
pub const OPTIMISTIC_LOCK_MESSAGE: &str =
    "the object has been modified; please apply your changes to the latest version and try again";

/// A failure reported by an [`ObjectStore`]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object changed between read and write
    #[error("Operation cannot be fulfilled on {0}: {OPTIMISTIC_LOCK_MESSAGE}")]
    Conflict(String),

    /// The object to create exists already
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The object to write does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Any other error from the Kubernetes api
    #[error("api request failed: {0}")]
    Api(#[source] kube::Error),

    /// The api resource for a kind could not be discovered
    #[error("unable to discover api resource for {kind}: {source}")]
    Discovery {
        /// Kind that was looked up
        kind: String,
        /// Discovery error
        #[source]
        source: kube::Error,
    },

    /// An object could not be encoded for the store
    #[error("unable to serialize object: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error some other store reported as text
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Whether the write was rejected because of a stale `resourceVersion`
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Classify an error that is only available as text
    ///
    /// Falls back on matching [`OPTIMISTIC_LOCK_MESSAGE`] to recognise conflicts.
    pub fn from_message(target: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(OPTIMISTIC_LOCK_MESSAGE) {
            StoreError::Conflict(target.to_string())
        } else {
            StoreError::Other(message)
        }
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict" => {
                StoreError::Conflict(resp.message)
            }
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(resp.message)
            }
            kube::Error::Api(resp) if resp.message.contains(OPTIMISTIC_LOCK_MESSAGE) => {
                StoreError::Conflict(resp.message)
            }
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(resp.message),
            err => StoreError::Api(err),
        }
    }
}

/// Get, list and write cluster objects of any kind
///
/// Not found on [`get`](ObjectStore::get) is `Ok(None)`, never an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError>;

    /// List every object of a kind across all namespaces
    async fn list(&self, gvk: &GroupVersionKind) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create a new object
    async fn create(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject, StoreError>;

    /// Apply `obj` to the existing object as a json merge patch
    async fn patch(&self, obj: &DynamicObject, field_manager: &str) -> Result<DynamicObject, StoreError>;

    /// Replace the object, guarded by the `resourceVersion` it carries
    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace the status subresource, guarded by the `resourceVersion` it carries
    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;
}
