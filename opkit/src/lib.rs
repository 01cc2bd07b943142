//! Toolkit for building Kubernetes operators
//!
//! An operator built on opkit describes its custom resource as a
//! [`Workload`](core::Workload) and hands the engine the child resources the workload
//! should own. The engine takes care of the rest of a reconcile: dependencies between
//! workloads, creating and patching children, waiting for them to become ready,
//! recording status conditions and holding on to the workload while it is deleted.
//!
//! The crate is split in two:
//!
//! - [`core`] holds the client-less parts: the workload contract, status conditions and
//!   the equality engine
//! - [`runtime`] holds everything that talks to a cluster, with the phase engine at its heart
//!
//! # Example
//!
//! ```ignore
//! use opkit::runtime::{Context, KubeStore, Registry, Request};
//!
//! let ctx = Context::new(KubeStore::new(client.clone()), WebStoreHooks)
//!     .with_events(Arc::new(KubeEventPublisher::new(client, "webstore-operator")));
//! let registry = Registry::standard();
//!
//! // inside the reconcile function of a kube Controller
//! let mut req = Request::new(webstore.as_ref().clone());
//! let action = registry.reconcile(&ctx, &mut req).await?;
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

/// Re-exports from [`opkit_core`]
#[doc(inline)]
pub use opkit_core as core;

/// Re-exports from [`opkit_runtime`]
#[doc(inline)]
pub use opkit_runtime as runtime;

pub use crate::core::{Workload, WorkloadStatus};
pub use crate::runtime::{Context, Error, Registry, Request, Result};
