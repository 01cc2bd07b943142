//! Making sure changes to child resources trigger another reconcile.
//!
//! Starting watchers is the operator's business. The engine only tells a
//! [`WatchRegistrar`] which kinds it has created, once per kind.
use crate::{Error, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use kube::core::GroupVersionKind;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

/// Starts watching a kind of child resource on behalf of the engine
#[async_trait]
pub trait WatchRegistrar: Send + Sync {
    /// Ensure objects of `gvk` owned by a workload re-trigger its reconcile
    async fn watch(&self, gvk: &GroupVersionKind) -> Result<()>;
}

/// Tracks the kinds already handed to a [`WatchRegistrar`]
///
/// Registering the same kind twice is a no-op, and `batch/v1` jobs are never
/// registered since they run once and would only churn the queue.
pub struct Watches {
    registrar: Box<dyn WatchRegistrar>,
    watched: Mutex<HashSet<GroupVersionKind>>,
}

impl Watches {
    /// Track registrations made through `registrar`
    pub fn new(registrar: impl WatchRegistrar + 'static) -> Self {
        Self {
            registrar: Box::new(registrar),
            watched: Mutex::new(HashSet::new()),
        }
    }

    /// Register `gvk` unless it was registered before
    pub async fn ensure(&self, gvk: &GroupVersionKind) -> Result<()> {
        if is_ephemeral(gvk) || self.watched.lock().contains(gvk) {
            return Ok(());
        }
        self.registrar.watch(gvk).await?;
        debug!(kind = %gvk.kind, version = %gvk.version, "watching child resource kind");
        self.watched.lock().insert(gvk.clone());
        Ok(())
    }

    /// Kinds registered so far
    #[must_use]
    pub fn watched(&self) -> Vec<GroupVersionKind> {
        self.watched.lock().iter().cloned().collect()
    }
}

fn is_ephemeral(gvk: &GroupVersionKind) -> bool {
    gvk.kind.eq_ignore_ascii_case("job") && gvk.version == "v1"
}

/// Sends every registration over a channel
///
/// The receiving end is typically polled by the operator's main loop, which spawns
/// a watcher for each kind it receives.
pub struct ChannelWatchRegistrar {
    sender: mpsc::UnboundedSender<GroupVersionKind>,
}

impl ChannelWatchRegistrar {
    /// A registrar and the stream of kinds it registers
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GroupVersionKind>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl WatchRegistrar for ChannelWatchRegistrar {
    async fn watch(&self, gvk: &GroupVersionKind) -> Result<()> {
        self.sender
            .unbounded_send(gvk.clone())
            .map_err(|_| Error::hook(format!("unable to watch resource {}, receiver dropped", gvk.kind)))
    }
}

/// Accepts every registration and does nothing
pub struct NoopWatchRegistrar;

#[async_trait]
impl WatchRegistrar for NoopWatchRegistrar {
    async fn watch(&self, _gvk: &GroupVersionKind) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn kinds_are_registered_once() {
        let (registrar, mut receiver) = ChannelWatchRegistrar::channel();
        let watches = Watches::new(registrar);
        let deployment = GroupVersionKind::gvk("apps", "v1", "Deployment");

        watches.ensure(&deployment).await.unwrap();
        watches.ensure(&deployment).await.unwrap();
        drop(watches);

        let registered: Vec<_> = receiver.by_ref().collect().await;
        assert_eq!(registered, vec![deployment]);
    }

    #[tokio::test]
    async fn jobs_are_never_watched() {
        let (registrar, mut receiver) = ChannelWatchRegistrar::channel();
        let watches = Watches::new(registrar);
        watches.ensure(&GroupVersionKind::gvk("batch", "v1", "Job")).await.unwrap();
        watches.ensure(&GroupVersionKind::gvk("batch", "v1", "job")).await.unwrap();
        assert!(watches.watched().is_empty());
        drop(watches);
        assert!(receiver.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_channels_fail_registration() {
        let (registrar, receiver) = ChannelWatchRegistrar::channel();
        drop(receiver);
        let watches = Watches::new(registrar);
        let err = watches
            .ensure(&GroupVersionKind::gvk("", "v1", "Service"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Service"));
        assert!(watches.watched().is_empty());
    }
}
