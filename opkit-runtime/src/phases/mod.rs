//! The reconcile pipeline of a workload, as an ordered list of phases.
//!
//! A phase is a named [`PhaseHandler`] answering whether the reconcile may move on.
//! Phases are grouped per [`LifecycleEvent`] in a [`Registry`], which runs them in
//! order and records a [`PhaseCondition`](opkit_core::PhaseCondition) for each one on
//! the workload status.
use crate::{
    context::{Context, Request},
    Result,
};
use async_trait::async_trait;
use kube::runtime::controller::Action;
use opkit_core::Workload;
use std::{fmt, sync::Arc};

mod handlers;
pub use handlers::{CheckReadyPhase, CompletePhase, CreateResourcesPhase, DeletionCompletePhase, DependencyPhase};

mod registry;
pub use registry::Registry;

/// Which list of phases a reconcile runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The workload has not been reconciled to completion yet
    Create,
    /// The workload was reconciled to completion before
    Update,
    /// The workload is being deleted and still holds its finalizer
    Delete,
}

/// Changes how a phase deploys child resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceOption {
    /// Hold back the remaining children until each persisted child reports ready
    WithWait,
}

/// How a run of a phase list ended
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Every phase proceeded
    Completed,
    /// A phase did not proceed, or hit a conflict, and the reconcile should come back
    Stopped(Action),
}

impl Outcome {
    /// The action to hand back to the controller
    ///
    /// A completed run waits for the next change.
    #[must_use]
    pub fn into_action(self) -> Action {
        match self {
            Outcome::Completed => Action::await_change(),
            Outcome::Stopped(action) => action,
        }
    }
}

/// One step of the reconcile pipeline
///
/// Returns whether the pipeline may proceed to the next phase. `Ok(false)` is the
/// expected answer while the cluster converges and leads to a requeue, not a failure.
#[async_trait]
pub trait PhaseHandler<W: Workload>: Send + Sync {
    /// Run the phase against the workload of the request
    async fn run(&self, ctx: &Context<W>, req: &mut Request<W>, options: &[ResourceOption]) -> Result<bool>;
}

/// A named phase, ready to be registered
pub struct Phase<W: Workload> {
    /// Name recorded on the phase condition
    pub name: String,
    handler: Arc<dyn PhaseHandler<W>>,
    requeue: Option<Action>,
    resource_options: Vec<ResourceOption>,
}

impl<W: Workload> Phase<W> {
    /// A phase named `name` running `handler`
    pub fn new(name: impl Into<String>, handler: impl PhaseHandler<W> + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            requeue: None,
            resource_options: Vec::new(),
        }
    }

    /// Requeue with `action` instead of the configured default when the phase does not proceed
    #[must_use]
    pub fn requeue_with(mut self, action: Action) -> Self {
        self.requeue = Some(action);
        self
    }

    /// Add options for deploying child resources
    #[must_use]
    pub fn resource_options(mut self, options: impl IntoIterator<Item = ResourceOption>) -> Self {
        self.resource_options.extend(options);
        self
    }

    /// The requeue used when the phase does not proceed
    #[must_use]
    pub fn requeue(&self, ctx: &Context<W>) -> Action {
        self.requeue
            .clone()
            .unwrap_or_else(|| Action::requeue(ctx.config().requeue_after))
    }

    async fn run(&self, ctx: &Context<W>, req: &mut Request<W>) -> Result<bool> {
        self.handler.run(ctx, req, &self.resource_options).await
    }
}

impl<W: Workload> fmt::Debug for Phase<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("requeue", &self.requeue)
            .field("resource_options", &self.resource_options)
            .finish()
    }
}
