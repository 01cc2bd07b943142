use super::{
    CheckReadyPhase, CompletePhase, CreateResourcesPhase, DeletionCompletePhase, DependencyPhase, LifecycleEvent,
    Outcome, Phase,
};
use crate::{
    context::{Context, Request},
    finalizer, Error, Result,
};
use kube::runtime::controller::Action;
use opkit_core::{PhaseCondition, Workload};
use tracing::{debug, error, info, trace};

/// The phases run for each [`LifecycleEvent`]
///
/// Built once when the operator starts and shared by reference with every reconcile.
///
/// ```ignore
/// let registry = Registry::standard().register(
///     LifecycleEvent::Delete,
///     Phase::new("ReleaseVolumes", ReleaseVolumes),
/// );
/// let action = registry.reconcile(&ctx, &mut Request::new(webstore)).await?;
/// ```
pub struct Registry<W: Workload> {
    create: PhaseList<W>,
    update: PhaseList<W>,
    delete: PhaseList<W>,
}

impl<W: Workload> Default for Registry<W> {
    fn default() -> Self {
        Self {
            create: PhaseList::default(),
            update: PhaseList::default(),
            delete: PhaseList::default(),
        }
    }
}

/// Phases of one event, with the last `pinned` of them kept at the end
struct PhaseList<W: Workload> {
    phases: Vec<Phase<W>>,
    pinned: usize,
}

impl<W: Workload> Default for PhaseList<W> {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            pinned: 0,
        }
    }
}

impl<W: Workload> PhaseList<W> {
    fn push(&mut self, phase: Phase<W>) {
        let at = self.phases.len() - self.pinned;
        self.phases.insert(at, phase);
    }

    fn pin(&mut self, phase: Phase<W>) {
        self.phases.push(phase);
        self.pinned += 1;
    }
}

/// How the pipeline continues after a phase
enum Exit {
    Proceed,
    Requeue(Action),
}

impl<W: Workload> Registry<W> {
    /// A registry without phases
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical pipeline
    ///
    /// Create and update run `Dependency`, `CreateResources`, `CheckReady` and
    /// `Complete`. Delete runs `DeletionComplete`. `Complete` and `DeletionComplete`
    /// stay last: phases added with [`Registry::register`] run before them.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for event in [LifecycleEvent::Create, LifecycleEvent::Update] {
            registry = registry
                .register(event, Phase::new("Dependency", DependencyPhase))
                .register(event, Phase::new("CreateResources", CreateResourcesPhase))
                .register(event, Phase::new("CheckReady", CheckReadyPhase));
            registry.list_mut(event).pin(Phase::new("Complete", CompletePhase));
        }
        registry
            .list_mut(LifecycleEvent::Delete)
            .pin(Phase::new("DeletionComplete", DeletionCompletePhase));
        registry
    }

    /// Add `phase` to the list run for `event`
    ///
    /// The phase runs after every phase registered before it, and before the closing
    /// phase of a [`Registry::standard`] list.
    #[must_use]
    pub fn register(mut self, event: LifecycleEvent, phase: Phase<W>) -> Self {
        self.list_mut(event).push(phase);
        self
    }

    /// The phases run for `event`, in order
    #[must_use]
    pub fn phases(&self, event: LifecycleEvent) -> &[Phase<W>] {
        match event {
            LifecycleEvent::Create => &self.create.phases,
            LifecycleEvent::Update => &self.update.phases,
            LifecycleEvent::Delete => &self.delete.phases,
        }
    }

    fn list_mut(&mut self, event: LifecycleEvent) -> &mut PhaseList<W> {
        match event {
            LifecycleEvent::Create => &mut self.create,
            LifecycleEvent::Update => &mut self.update,
            LifecycleEvent::Delete => &mut self.delete,
        }
    }

    /// Reconcile the workload of the request
    ///
    /// A workload being deleted runs the delete phases while it holds its finalizer,
    /// and has the finalizer removed once every delete phase proceeded. Any other
    /// workload gets the finalizer first, then runs the create phases until it has been
    /// reconciled to completion once, and the update phases after that.
    ///
    /// # Errors
    ///
    /// The wrapped error of the first failing phase, and failures to add or remove the
    /// finalizer. Conflicts are never returned; they become a requeue.
    pub async fn reconcile(&self, ctx: &Context<W>, req: &mut Request<W>) -> Result<Action> {
        if req.workload.is_deleting() {
            if !req.workload.has_finalizer() {
                return Ok(Action::await_change());
            }
            info!(workload = %req.display_name(), "deleting workload");
            return match self.execute(ctx, req, LifecycleEvent::Delete).await? {
                Outcome::Completed => requeue_on_conflict(ctx, finalizer::remove_finalizer(ctx, req).await),
                Outcome::Stopped(action) => Ok(action),
            };
        }

        if let Err(err) = finalizer::register_delete_hooks(ctx, req).await {
            return requeue_on_conflict(ctx, Err(err));
        }
        let event = if req.workload.ready_status() {
            LifecycleEvent::Update
        } else {
            LifecycleEvent::Create
        };
        Ok(self.execute(ctx, req, event).await?.into_action())
    }

    /// Run the phases of `event` in order
    ///
    /// Every phase leaves a condition on the workload status, which is written before the
    /// next phase starts. The run is [`Outcome::Completed`] only when every phase
    /// proceeded. A phase that does not proceed stops the run with its requeue, a
    /// conflict stops it with the default requeue, and an error ends it with that error.
    ///
    /// # Errors
    ///
    /// The error of the failing phase, wrapped with the phase name and workload kind.
    pub async fn execute(&self, ctx: &Context<W>, req: &mut Request<W>, event: LifecycleEvent) -> Result<Outcome> {
        for phase in self.phases(event) {
            trace!(phase = %phase.name, workload = %req.display_name(), "enter phase");
            let outcome = phase.run(ctx, req).await;
            match self.exit(ctx, req, phase, outcome).await {
                Ok(Exit::Proceed) => {
                    trace!(phase = %phase.name, workload = %req.display_name(), "completed phase");
                }
                Ok(Exit::Requeue(action)) => {
                    debug!(phase = %phase.name, workload = %req.display_name(), "not ready; requeuing");
                    return Ok(Outcome::Stopped(action));
                }
                Err(err) => {
                    let err = Error::Phase {
                        phase: phase.name.clone(),
                        kind: req.kind(),
                        source: Box::new(err),
                    };
                    error!(phase = %phase.name, workload = %req.display_name(), error = %err, "phase failed");
                    return Err(err);
                }
            }
        }
        Ok(Outcome::Completed)
    }

    /// Record the condition for the outcome of a phase and decide how to continue
    async fn exit(
        &self,
        ctx: &Context<W>,
        req: &mut Request<W>,
        phase: &Phase<W>,
        outcome: Result<bool>,
    ) -> Result<Exit> {
        let (condition, result) = match outcome {
            Err(err) if err.is_conflict() => {
                trace!(phase = %phase.name, error = %err, "conflict, retrying with the latest version");
                (
                    PhaseCondition::complete(&phase.name),
                    Ok(Exit::Requeue(Action::requeue(ctx.config().requeue_after))),
                )
            }
            Err(err) => (PhaseCondition::failed(&phase.name, &err), Err(err)),
            Ok(false) => (PhaseCondition::pending(&phase.name), Ok(Exit::Requeue(phase.requeue(ctx)))),
            Ok(true) => (PhaseCondition::complete(&phase.name), Ok(Exit::Proceed)),
        };

        req.workload.set_phase_condition(condition);
        match (req.update_status(ctx).await, result) {
            (Ok(()), result) => result,
            (Err(update), Err(err)) if update.is_conflict() => Err(err),
            (Err(update), Err(err)) => Err(Error::StatusUpdate {
                update: Box::new(update),
                phase: Box::new(err),
            }),
            (Err(update), Ok(exit)) if update.is_conflict() => {
                trace!(phase = %phase.name, "conflict writing phase condition, retrying with the latest version");
                Ok(match exit {
                    Exit::Proceed => Exit::Requeue(Action::requeue(ctx.config().requeue_after)),
                    requeue => requeue,
                })
            }
            (Err(update), Ok(_)) => Err(update),
        }
    }
}

fn requeue_on_conflict<W: Workload>(ctx: &Context<W>, res: Result<()>) -> Result<Action> {
    match res {
        Ok(()) => Ok(Action::await_change()),
        Err(err) if err.is_conflict() => {
            trace!(error = %err, "conflict updating finalizers, retrying with the latest version");
            Ok(Action::requeue(ctx.config().requeue_after))
        }
        Err(err) => Err(err),
    }
}
