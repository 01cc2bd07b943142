use super::{PhaseHandler, ResourceOption};
use crate::{
    context::{Context, Request},
    dependency,
    resources::{self, persist},
    wait, Error, Result,
};
use async_trait::async_trait;
use kube::core::{DynamicObject, ResourceExt};
use opkit_core::{identity::message_for, ChildResourceCondition, Workload};
use tracing::{debug, info, trace};

/// The children the operator wants, after its mutation hook has run on each of them
async fn desired_resources<W: Workload>(ctx: &Context<W>, req: &Request<W>) -> Result<Vec<DynamicObject>> {
    let mut desired = Vec::new();
    for resource in ctx.hooks().desired_resources(&req.workload).await? {
        desired.extend(ctx.hooks().mutate(&req.workload, resource).await?);
    }
    Ok(desired)
}

/// Proceeds once the workloads this workload depends on exist and are created
///
/// The outcome is cached on the workload status, so a satisfied workload is not
/// checked again.
pub struct DependencyPhase;

#[async_trait]
impl<W: Workload> PhaseHandler<W> for DependencyPhase {
    async fn run(&self, ctx: &Context<W>, req: &mut Request<W>, _options: &[ResourceOption]) -> Result<bool> {
        if req.workload.dependency_status() {
            return Ok(true);
        }
        let satisfied = dependency::satisfied(ctx, req).await?;
        if satisfied {
            req.workload.set_dependency_status(true);
        }
        Ok(satisfied)
    }
}

/// Creates or updates every desired child, in order
///
/// Each child gets its condition written to the workload status as soon as it is
/// handled. A child whose namespace is not active yet is left pending and the others
/// are still handled. With [`ResourceOption::WithWait`] the phase stops at the first
/// child that is not ready. The first error ends the phase.
pub struct CreateResourcesPhase;

enum ChildOutcome {
    Persisted,
    NamespacePending,
    NotReady,
}

async fn persist_child<W: Workload>(
    ctx: &Context<W>,
    req: &Request<W>,
    resource: &DynamicObject,
    wait_ready: bool,
) -> Result<ChildOutcome> {
    if let Some(namespace) = resource.namespace().filter(|ns| !ns.is_empty()) {
        if !wait::namespace_is_ready(ctx, req, &namespace).await? {
            trace!(object = %message_for(resource), %namespace, "namespace not ready");
            return Ok(ChildOutcome::NamespacePending);
        }
    }

    persist::create_or_update(ctx, req, resource).await?;

    if wait_ready {
        let live = persist::get(ctx, req, resource).await?;
        if !req.run(resources::is_ready(ctx.store(), live.as_ref())).await? {
            return Ok(ChildOutcome::NotReady);
        }
    }
    Ok(ChildOutcome::Persisted)
}

#[async_trait]
impl<W: Workload> PhaseHandler<W> for CreateResourcesPhase {
    async fn run(&self, ctx: &Context<W>, req: &mut Request<W>, options: &[ResourceOption]) -> Result<bool> {
        let wait_ready = options.contains(&ResourceOption::WithWait);
        let mut proceed = true;

        for resource in desired_resources(ctx, req).await? {
            let condition = ChildResourceCondition::for_object(&resource);
            let (condition, outcome) = match persist_child(ctx, req, &resource, wait_ready).await {
                Ok(ChildOutcome::Persisted) => (condition.created(), Ok(true)),
                Ok(ChildOutcome::NamespacePending) => (condition.pending(), Ok(true)),
                Ok(ChildOutcome::NotReady) => (condition.pending(), Ok(false)),
                Err(err) if err.is_conflict() => {
                    trace!(object = %message_for(&resource), "conflict while persisting resource");
                    (condition.created(), Ok(true))
                }
                Err(err) => (condition.failed(&err), Err(err)),
            };
            let created = condition.created;

            req.workload.set_child_resource_condition(condition);
            if let Err(update) = req.update_status(ctx).await {
                return Err(match outcome {
                    Err(err) if update.is_conflict() => err,
                    Err(err) => Error::StatusUpdate {
                        update: Box::new(update),
                        phase: Box::new(err),
                    },
                    Ok(_) => update,
                });
            }

            match outcome {
                Err(err) => return Err(err),
                Ok(false) => {
                    debug!(object = %message_for(&resource), "resource not ready");
                    return Ok(false);
                }
                Ok(true) => proceed &= created,
            }
        }
        Ok(proceed)
    }
}

/// Proceeds once every desired child reports ready and the operator's own readiness
/// hook agrees
pub struct CheckReadyPhase;

#[async_trait]
impl<W: Workload> PhaseHandler<W> for CheckReadyPhase {
    async fn run(&self, ctx: &Context<W>, req: &mut Request<W>, _options: &[ResourceOption]) -> Result<bool> {
        let mut live = Vec::new();
        for resource in desired_resources(ctx, req).await? {
            live.push(persist::get(ctx, req, &resource).await?);
        }
        if !req.run(resources::are_ready(ctx.store(), &live)).await? {
            return Ok(false);
        }
        ctx.hooks().check_ready(&req.workload).await
    }
}

/// Marks the workload as reconciled
pub struct CompletePhase;

#[async_trait]
impl<W: Workload> PhaseHandler<W> for CompletePhase {
    async fn run(&self, _ctx: &Context<W>, req: &mut Request<W>, _options: &[ResourceOption]) -> Result<bool> {
        req.workload.set_ready_status(true);
        info!(workload = %req.display_name(), "successfully reconciled");
        Ok(true)
    }
}

/// Last phase of the delete pipeline
///
/// Cleanup belongs in phases registered before it.
pub struct DeletionCompletePhase;

#[async_trait]
impl<W: Workload> PhaseHandler<W> for DeletionCompletePhase {
    async fn run(&self, _ctx: &Context<W>, req: &mut Request<W>, _options: &[ResourceOption]) -> Result<bool> {
        info!(workload = %req.display_name(), "successfully deleted");
        Ok(true)
    }
}
