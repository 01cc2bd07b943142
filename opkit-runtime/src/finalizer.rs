//! Holding on to a workload while its delete phases run.
//!
//! Every workload carries the `<group>/Finalizer` finalizer from its first
//! reconcile on. Kubernetes does not remove a workload that holds it, so the delete
//! phases get a chance to run, and the finalizer is only removed once they all
//! proceeded.
use crate::{
    context::{Context, Request},
    Error, Result,
};
use kube::ResourceExt;
use opkit_core::Workload;
use tracing::debug;

/// Add the finalizer to a workload that is not being deleted and does not hold it yet
///
/// The workload is written back and the request picks up the stored copy.
///
/// # Errors
///
/// Store errors while writing the workload, wrapped with its kind.
pub async fn register_delete_hooks<W: Workload>(ctx: &Context<W>, req: &mut Request<W>) -> Result<()> {
    if req.workload.is_deleting() || req.workload.has_finalizer() {
        return Ok(());
    }
    let kind = req.kind();
    req.workload.finalizers_mut().push(W::finalizer_name());
    req.update(ctx)
        .await
        .map_err(|err| Error::resource("unable to register delete hook on", kind, err))?;
    debug!(workload = %req.display_name(), finalizer = %W::finalizer_name(), "registered finalizer");
    Ok(())
}

/// Remove the finalizer, releasing the workload to Kubernetes
///
/// # Errors
///
/// Store errors while writing the workload, wrapped with its kind.
pub async fn remove_finalizer<W: Workload>(ctx: &Context<W>, req: &mut Request<W>) -> Result<()> {
    if !req.workload.has_finalizer() {
        return Ok(());
    }
    let (kind, name) = (req.kind(), W::finalizer_name());
    req.workload.finalizers_mut().retain(|f| *f != name);
    req.update(ctx)
        .await
        .map_err(|err| Error::resource("unable to remove finalizer from", kind, err))?;
    debug!(workload = %req.display_name(), finalizer = %name, "removed finalizer");
    Ok(())
}
