//! Waiting on child resources.
//!
//! The phase engine never sleeps. [`namespace_is_ready`] answers right away and
//! leaves the retry to the next reconcile. [`poll_until_ready`] is for operator
//! code outside the engine that has to block until a child converges.
use crate::{
    context::{Context, Request},
    resources::{self, persist},
    Error, Result,
};
use kube::core::{DynamicObject, GroupVersionKind};
use opkit_core::{identity::message_for, ObjectKey, Workload};
use std::time::Duration;
use tracing::trace;

/// Whether the namespace named `namespace` exists and is active
///
/// A namespace that does not exist is not ready.
///
/// # Errors
///
/// Store errors other than not found.
pub async fn namespace_is_ready<W: Workload>(ctx: &Context<W>, req: &Request<W>, namespace: &str) -> Result<bool> {
    let key = ObjectKey::new(GroupVersionKind::gvk("", "v1", "Namespace"), None, namespace);
    let live = req
        .run(ctx.store().get(&key))
        .await
        .map_err(|err| Error::resource("unable to get namespace", namespace.to_string(), err))?;
    resources::is_ready(ctx.store(), live.as_ref()).await
}

/// Block until the live copy of `object` reports ready
///
/// Re-checks every [`Config::poll_interval`](crate::Config::poll_interval) and gives up
/// after [`Config::poll_timeout`](crate::Config::poll_timeout).
///
/// # Errors
///
/// [`Error::Timeout`] when the object is still not ready at the deadline,
/// [`Error::Cancelled`] when the request is cancelled first, and any error of the
/// readiness check itself.
pub async fn poll_until_ready<W: Workload>(ctx: &Context<W>, req: &Request<W>, object: &DynamicObject) -> Result<()> {
    let config = ctx.config();
    let polling = req.run(poll(ctx, req, object, config.poll_interval));
    match tokio::time::timeout(config.poll_timeout, polling).await {
        Ok(res) => res,
        Err(_elapsed) => Err(Error::Timeout(message_for(object))),
    }
}

async fn poll<W: Workload>(
    ctx: &Context<W>,
    req: &Request<W>,
    object: &DynamicObject,
    interval: Duration,
) -> Result<()> {
    loop {
        let live = persist::get(ctx, req, object).await?;
        if resources::is_ready(ctx.store(), live.as_ref()).await? {
            return Ok(());
        }
        trace!(object = %message_for(object), "not ready, polling again");
        tokio::time::sleep(interval).await;
    }
}
