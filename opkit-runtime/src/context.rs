//! Everything a phase needs besides the workload itself.
use crate::{
    events::{EventPublisher, NoopEventPublisher},
    store::ObjectStore,
    watch::{NoopWatchRegistrar, WatchRegistrar, Watches},
    Config, Error, Result,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::core::{DynamicObject, Resource, ResourceExt};
use opkit_core::Workload;
use serde::{de::DeserializeOwned, Serialize};
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Operator supplied behaviour for one workload type
#[async_trait]
pub trait WorkloadHooks<W: Workload>: Send + Sync {
    /// The child resources the workload should own, in the order they are created
    ///
    /// Called fresh on every reconcile.
    async fn desired_resources(&self, workload: &W) -> Result<Vec<DynamicObject>>;

    /// Readiness criteria beyond what the built-in checks cover
    async fn check_ready(&self, _workload: &W) -> Result<bool> {
        Ok(true)
    }

    /// Transform or expand a child resource before it is persisted
    async fn mutate(&self, _workload: &W, resource: DynamicObject) -> Result<Vec<DynamicObject>> {
        Ok(vec![resource])
    }
}

/// Decides whether a child that is not strictly equal to its desired form still needs a patch
pub trait DriftPolicy: Send + Sync {
    /// Whether `actual` already reflects the intent of `desired`
    fn is_desired(&self, desired: &DynamicObject, actual: &DynamicObject) -> Result<bool>;
}

/// The default [`DriftPolicy`], backed by [`opkit_core::are_desired`]
#[derive(Clone, Copy, Debug, Default)]
pub struct IntentDriftPolicy;

impl DriftPolicy for IntentDriftPolicy {
    fn is_desired(&self, desired: &DynamicObject, actual: &DynamicObject) -> Result<bool> {
        Ok(opkit_core::are_desired(desired, actual)?)
    }
}

/// Shared state for reconciling one workload type
///
/// Built once at startup and shared by reference with every reconcile.
pub struct Context<W: Workload> {
    store: Arc<dyn ObjectStore>,
    hooks: Arc<dyn WorkloadHooks<W>>,
    events: Arc<dyn EventPublisher>,
    drift: Arc<dyn DriftPolicy>,
    watches: Watches,
    config: Config,
}

impl<W: Workload> Context<W> {
    /// A context with no events, no watches and the default configuration
    pub fn new(store: impl ObjectStore + 'static, hooks: impl WorkloadHooks<W> + 'static) -> Self {
        Self {
            store: Arc::new(store),
            hooks: Arc::new(hooks),
            events: Arc::new(NoopEventPublisher),
            drift: Arc::new(IntentDriftPolicy),
            watches: Watches::new(NoopWatchRegistrar),
            config: Config::default(),
        }
    }

    /// Publish events through `events`
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Register watches on newly created kinds through `registrar`
    #[must_use]
    pub fn with_watches(mut self, registrar: impl WatchRegistrar + 'static) -> Self {
        self.watches = Watches::new(registrar);
        self
    }

    /// Replace the drift tolerance used before patching children
    #[must_use]
    pub fn with_drift_policy(mut self, drift: impl DriftPolicy + 'static) -> Self {
        self.drift = Arc::new(drift);
        self
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The object store
    #[must_use]
    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// The operator hooks
    #[must_use]
    pub fn hooks(&self) -> &dyn WorkloadHooks<W> {
        self.hooks.as_ref()
    }

    /// The event publisher
    #[must_use]
    pub fn events(&self) -> &dyn EventPublisher {
        self.events.as_ref()
    }

    /// The drift policy
    #[must_use]
    pub fn drift(&self) -> &dyn DriftPolicy {
        self.drift.as_ref()
    }

    /// The kinds watched so far
    #[must_use]
    pub fn watches(&self) -> &Watches {
        &self.watches
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// One reconcile of one workload
///
/// The request owns its copy of the workload for the duration of the reconcile, and
/// replaces it with the stored copy after every write.
pub struct Request<W> {
    /// The workload as last read from or written to the store
    pub workload: W,
    cancel: CancellationToken,
}

impl<W: Workload> Request<W> {
    /// A request that is never cancelled
    pub fn new(workload: W) -> Self {
        Self::with_cancellation(workload, CancellationToken::new())
    }

    /// A request whose store calls are abandoned once `cancel` fires
    pub fn with_cancellation(workload: W, cancel: CancellationToken) -> Self {
        Self { workload, cancel }
    }

    /// The token cancelling this request
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a store call unless the request is cancelled first
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] once the request is cancelled, otherwise whatever the call returns.
    pub async fn run<T, E, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<Error>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = call => res.map_err(Into::into),
        }
    }

    /// Reference to the workload, for events
    #[must_use]
    pub fn object_ref(&self) -> ObjectReference {
        self.workload.object_ref(&())
    }

    /// `Kind/name` of the workload
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}/{}", W::kind(&()), self.workload.name_any())
    }

    /// Kind of the workload
    #[must_use]
    pub fn kind(&self) -> String {
        W::kind(&()).into_owned()
    }

    /// The workload as a dynamic object
    pub(crate) fn dynamic(&self) -> Result<DynamicObject> {
        to_dynamic(&self.workload)
    }

    /// Swap in the copy of the workload returned by a write
    pub(crate) fn refresh(&mut self, stored: DynamicObject) -> Result<()> {
        self.workload = from_dynamic(stored, &self.kind())?;
        Ok(())
    }

    /// Persist the status of the workload and pick up the stored copy
    pub(crate) async fn update_status(&mut self, ctx: &Context<W>) -> Result<()> {
        let obj = self.dynamic()?;
        let stored = self.run(ctx.store().replace_status(&obj)).await?;
        self.refresh(stored)
    }

    /// Persist the whole workload and pick up the stored copy
    pub(crate) async fn update(&mut self, ctx: &Context<W>) -> Result<()> {
        let obj = self.dynamic()?;
        let stored = self.run(ctx.store().replace(&obj)).await?;
        self.refresh(stored)
    }
}

/// Convert any serializable resource to a dynamic object
pub(crate) fn to_dynamic<K: Resource + Serialize>(obj: &K) -> Result<DynamicObject>
where
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).into_owned();
    let value = serde_json::to_value(obj).map_err(|source| Error::Conversion {
        kind: kind.clone(),
        source,
    })?;
    serde_json::from_value(value).map_err(|source| Error::Conversion { kind, source })
}

/// Convert a dynamic object to its typed form
pub(crate) fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject, kind: &str) -> Result<K> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|source| Error::Conversion {
            kind: kind.to_string(),
            source,
        })
}
